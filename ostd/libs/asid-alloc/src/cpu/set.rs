// SPDX-License-Identifier: MPL-2.0

//! This module contains the implementation of the CPU set and atomic CPU set.

use core::sync::atomic::{AtomicU64, Ordering};

use smallvec::SmallVec;

use super::CpuId;

/// A subset of a fixed number of CPUs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CpuSet {
    // A bitset representing the CPUs in the system.
    bits: SmallVec<[InnerPart; NR_PARTS_NO_ALLOC]>,
    num_cpus: usize,
}

type InnerPart = u64;

const BITS_PER_PART: usize = InnerPart::BITS as usize;
const NR_PARTS_NO_ALLOC: usize = 2;

const fn part_idx(cpu_id: CpuId) -> usize {
    cpu_id.as_usize() / BITS_PER_PART
}

const fn bit_idx(cpu_id: CpuId) -> usize {
    cpu_id.as_usize() % BITS_PER_PART
}

const fn parts_for_cpus(num_cpus: usize) -> usize {
    num_cpus.div_ceil(BITS_PER_PART)
}

impl CpuSet {
    /// Creates a new `CpuSet` with none of the `num_cpus` CPUs.
    pub fn new_empty(num_cpus: usize) -> Self {
        Self {
            bits: Self::with_bit_pattern(num_cpus, 0),
            num_cpus,
        }
    }

    /// Creates a new bitmap with each of its parts filled with the given bits.
    ///
    /// Depending on the bit pattern and the number of CPUs,
    /// the resulting bitmap may end with some invalid bits.
    fn with_bit_pattern(
        num_cpus: usize,
        part_bits: InnerPart,
    ) -> SmallVec<[InnerPart; NR_PARTS_NO_ALLOC]> {
        let num_parts = parts_for_cpus(num_cpus);
        let mut bits = SmallVec::with_capacity(num_parts);
        bits.resize(num_parts, part_bits);
        bits
    }

    fn clear_invalid_cpu_bits(&mut self) {
        if self.num_cpus % BITS_PER_PART != 0 {
            let num_parts = parts_for_cpus(self.num_cpus);
            self.bits[num_parts - 1] &= (1 << (self.num_cpus % BITS_PER_PART)) - 1;
        }
    }

    /// Adds a CPU to the set.
    ///
    /// # Panics
    ///
    /// Panics if the CPU is out of range.
    pub fn add(&mut self, cpu_id: CpuId) {
        self.check_cpu(cpu_id);
        self.bits[part_idx(cpu_id)] |= 1 << bit_idx(cpu_id);
    }

    /// Removes a CPU from the set.
    pub fn remove(&mut self, cpu_id: CpuId) {
        let part_idx = part_idx(cpu_id);
        if part_idx < self.bits.len() {
            self.bits[part_idx] &= !(1 << bit_idx(cpu_id));
        }
    }

    /// Removes a CPU from the set, returning whether it was present.
    pub fn test_and_remove(&mut self, cpu_id: CpuId) -> bool {
        let present = self.contains(cpu_id);
        self.remove(cpu_id);
        present
    }

    /// Returns true if the set contains the specified CPU.
    pub fn contains(&self, cpu_id: CpuId) -> bool {
        let part_idx = part_idx(cpu_id);
        part_idx < self.bits.len() && (self.bits[part_idx] & (1 << bit_idx(cpu_id))) != 0
    }

    /// Returns the number of CPUs in the set.
    pub fn count(&self) -> usize {
        self.bits
            .iter()
            .map(|part| part.count_ones() as usize)
            .sum()
    }

    /// Returns true if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|part| *part == 0)
    }

    /// Adds all CPUs to the set.
    pub fn add_all(&mut self) {
        self.bits.fill(!0);
        self.clear_invalid_cpu_bits();
    }

    /// Removes all CPUs from the set.
    pub fn clear(&mut self) {
        self.bits.fill(0);
    }

    /// Iterates over the CPUs in the set.
    ///
    /// The order of the iteration is guaranteed to be in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = CpuId> + '_ {
        self.bits.iter().enumerate().flat_map(|(part_idx, &part)| {
            (0..BITS_PER_PART).filter_map(move |bit_idx| {
                if (part & (1 << bit_idx)) != 0 {
                    Some(CpuId::new((part_idx * BITS_PER_PART + bit_idx) as u32))
                } else {
                    None
                }
            })
        })
    }

    fn check_cpu(&self, cpu_id: CpuId) {
        assert!(
            cpu_id.as_usize() < self.num_cpus,
            "{:?} is out of range ({} CPUs)",
            cpu_id,
            self.num_cpus
        );
    }
}

/// A subset of a fixed number of CPUs with atomic operations.
///
/// It provides atomic operations for each CPU. When the operation contains
/// multiple CPUs, the ordering is not guaranteed.
#[derive(Debug)]
pub struct AtomicCpuSet {
    bits: SmallVec<[AtomicInnerPart; NR_PARTS_NO_ALLOC]>,
    num_cpus: usize,
}

type AtomicInnerPart = AtomicU64;

impl AtomicCpuSet {
    /// Creates a new `AtomicCpuSet` with an initial value.
    pub fn new(value: CpuSet) -> Self {
        let num_cpus = value.num_cpus;
        let bits = value.bits.into_iter().map(AtomicU64::new).collect();
        Self { bits, num_cpus }
    }

    /// Loads the value of the set with the given ordering.
    ///
    /// This operation is not atomic. When racing with a [`Self::clear`]
    /// operation, this load may return a set that contains a portion of the
    /// new value and a portion of the old value. Load on each specific
    /// word is atomic, and follows the specified ordering.
    pub fn load(&self, ordering: Ordering) -> CpuSet {
        let bits = self.bits.iter().map(|part| part.load(ordering)).collect();
        CpuSet {
            bits,
            num_cpus: self.num_cpus,
        }
    }

    /// Atomically adds a CPU with the given ordering.
    ///
    /// # Panics
    ///
    /// Panics if the CPU is out of range.
    pub fn add(&self, cpu_id: CpuId, ordering: Ordering) {
        assert!(
            cpu_id.as_usize() < self.num_cpus,
            "{:?} is out of range ({} CPUs)",
            cpu_id,
            self.num_cpus
        );
        self.bits[part_idx(cpu_id)].fetch_or(1 << bit_idx(cpu_id), ordering);
    }

    /// Removes every CPU. Each word is cleared atomically on its own.
    pub fn clear(&self, ordering: Ordering) {
        for part in self.bits.iter() {
            part.store(0, ordering);
        }
    }
}
