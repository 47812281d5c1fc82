// SPDX-License-Identifier: MPL-2.0

//! A bitmap-backed identifier allocator.
//!
//! [`IdAlloc`] tracks which ids in `[0, capacity)` are in use. It never
//! wraps around on its own: [`IdAlloc::alloc_from`] searches forward from
//! a caller-provided position, which lets the caller keep a rotating cursor
//! and decide what happens when the tail of the space is exhausted.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

use core::fmt::Debug;

use bitvec::prelude::BitVec;

/// An id allocator implemented by the bitmap.
#[derive(Clone)]
pub struct IdAlloc {
    bitset: BitVec<u64>,
}

impl IdAlloc {
    /// Constructs a new id allocator with a maximum capacity.
    ///
    /// All ids start out free.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "an id allocator needs at least one id");
        Self {
            bitset: BitVec::repeat(false, capacity),
        }
    }

    /// Returns the capacity of the id allocator.
    pub fn capacity(&self) -> usize {
        self.bitset.len()
    }

    /// Returns the number of allocated ids.
    pub fn count(&self) -> usize {
        self.bitset.count_ones()
    }

    /// Returns true if the `id` is allocated.
    ///
    /// # Panics
    ///
    /// If the `id` is out of bounds, this method will panic.
    pub fn is_allocated(&self, id: usize) -> bool {
        self.check_bounds(id);
        self.bitset[id]
    }

    /// Allocates the first free id in `[start, capacity)`.
    ///
    /// Ids below `start` are not considered, even if they are free.
    /// Returns `None` if no free id is left in the range.
    pub fn alloc_from(&mut self, start: usize) -> Option<usize> {
        if start >= self.capacity() {
            return None;
        }
        let id = start + self.bitset[start..].first_zero()?;
        self.bitset.set(id, true);
        Some(id)
    }

    /// Allocates a specific id.
    ///
    /// If the id is already allocated, it returns `None`, otherwise it
    /// returns the allocated id.
    ///
    /// # Panics
    ///
    /// If the `id` is out of bounds, this method will panic.
    pub fn alloc_specific(&mut self, id: usize) -> Option<usize> {
        self.check_bounds(id);
        if self.bitset.replace(id, true) {
            None
        } else {
            Some(id)
        }
    }

    /// Marks `id` as allocated, whether or not it already was.
    ///
    /// # Panics
    ///
    /// If the `id` is out of bounds, this method will panic.
    pub fn mark(&mut self, id: usize) {
        self.check_bounds(id);
        self.bitset.set(id, true);
    }

    /// Releases the id.
    ///
    /// # Panics
    ///
    /// If the `id` is out of bounds, this method will panic. With debug
    /// assertions enabled, it also panics if the `id` is not allocated.
    pub fn free(&mut self, id: usize) {
        debug_assert!(self.is_allocated(id));
        self.check_bounds(id);
        self.bitset.set(id, false);
    }

    /// Releases every id.
    pub fn clear(&mut self) {
        self.bitset.fill(false);
    }

    /// Marks every id that is allocated in `other` as allocated in `self`.
    ///
    /// # Panics
    ///
    /// Panics if the two allocators differ in capacity.
    pub fn union_with(&mut self, other: &IdAlloc) {
        assert_eq!(self.capacity(), other.capacity());
        for id in other.bitset.iter_ones() {
            self.bitset.set(id, true);
        }
    }

    /// Iterates over the allocated ids in ascending order.
    pub fn iter_allocated(&self) -> impl Iterator<Item = usize> + '_ {
        self.bitset.iter_ones()
    }

    fn check_bounds(&self, id: usize) {
        assert!(
            id < self.capacity(),
            "id {} is out of range (capacity {})",
            id,
            self.capacity()
        );
    }
}

impl Debug for IdAlloc {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IdAlloc")
            .field("len", &self.bitset.len())
            .field("allocated", &self.count())
            .finish()
    }
}
