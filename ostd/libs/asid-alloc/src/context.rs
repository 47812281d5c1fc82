// SPDX-License-Identifier: MPL-2.0

//! The per-address-space state owned by the allocator.

use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::{
    asid::Asid,
    cpu::{AtomicCpuSet, CpuSet},
};

/// The ASID record of one address space.
///
/// Every address space embeds one of these. It starts out unassigned and
/// is only written by the [`AsidAllocator`] it is switched through.
///
/// [`AsidAllocator`]: crate::AsidAllocator
#[derive(Debug)]
pub struct MmContext {
    pub(crate) id: AtomicU64,
    // Only changed with the allocator lock held.
    pub(crate) pinned: AtomicU32,
    pub(crate) cpus: AtomicCpuSet,
}

impl MmContext {
    /// Creates a context with no ASID for a system of `num_cpus` CPUs.
    ///
    /// Contexts are handed out by [`AsidAllocator::new_mm_context`], which
    /// sizes the CPU mask to match.
    ///
    /// [`AsidAllocator::new_mm_context`]: crate::AsidAllocator::new_mm_context
    pub(crate) fn new(num_cpus: usize) -> Self {
        Self {
            id: AtomicU64::new(0),
            pinned: AtomicU32::new(0),
            cpus: AtomicCpuSet::new(CpuSet::new_empty(num_cpus)),
        }
    }

    /// Returns the ASID last assigned to this address space.
    ///
    /// The value may be stale; only the allocator can tell.
    pub fn asid(&self) -> Asid {
        Asid::from_u64(self.id.load(Ordering::Relaxed))
    }

    /// Returns how many times the address space is pinned.
    pub fn pin_count(&self) -> u32 {
        self.pinned.load(Ordering::Relaxed)
    }

    /// Returns the CPUs the address space has been switched to since its
    /// current raw id was handed out.
    ///
    /// These are the CPUs that may still hold TLB entries tagged with it.
    pub fn cpus(&self) -> CpuSet {
        self.cpus.load(Ordering::Acquire)
    }
}
