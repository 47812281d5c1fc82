// SPDX-License-Identifier: MPL-2.0

//! CPU-related definitions.

mod set;

pub use set::{AtomicCpuSet, CpuSet};

/// The ID of a CPU in the system.
///
/// CPU IDs start from 0. Whether an ID is in range is decided by the
/// allocator it is passed to, not by this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CpuId(u32);

impl CpuId {
    /// Creates a CPU ID.
    pub const fn new(id: u32) -> Self {
        CpuId(id)
    }

    /// Returns the CPU ID of the bootstrap processor (BSP).
    pub const fn bsp() -> Self {
        CpuId(0)
    }

    /// Converts the CPU ID to an `usize`.
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for CpuId {
    fn from(id: u32) -> Self {
        CpuId(id)
    }
}
