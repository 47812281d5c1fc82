// SPDX-License-Identifier: MPL-2.0

//! Construction-time parameters of an allocator.

use crate::{
    asid::AsidLayout,
    error::{AsidError, Result},
};

/// The parameters an [`AsidAllocator`] is built from.
///
/// [`AsidAllocator`]: crate::AsidAllocator
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct AsidConfig {
    /// The width of the raw id field.
    pub asid_bits: u32,
    /// The number of CPUs that will switch through the allocator.
    pub num_cpus: usize,
    /// Whether a switch to an address space with a current ASID may skip
    /// the allocator lock.
    pub fast_path: bool,
    /// The most address spaces that may be pinned at once.
    ///
    /// `None` selects the largest limit the configuration allows.
    pub max_pinned: Option<usize>,
}

impl AsidConfig {
    /// Creates a configuration with the fast path on and the default pin
    /// limit.
    pub const fn new(asid_bits: u32, num_cpus: usize) -> Self {
        Self {
            asid_bits,
            num_cpus,
            fast_path: true,
            max_pinned: None,
        }
    }

    /// Sets whether the lock-free fast path is used.
    pub const fn with_fast_path(mut self, fast_path: bool) -> Self {
        self.fast_path = fast_path;
        self
    }

    /// Sets the pin limit.
    pub const fn with_max_pinned(mut self, max_pinned: usize) -> Self {
        self.max_pinned = Some(max_pinned);
        self
    }

    /// Checks the configuration and returns the ASID layout and the
    /// effective pin limit.
    pub fn validate(&self) -> Result<(AsidLayout, usize)> {
        let layout = AsidLayout::new(self.asid_bits)?;
        if self.num_cpus == 0 {
            return Err(AsidError::InvalidCpuCount);
        }

        // After a rollover every CPU may keep one reserved id, id 0 is
        // never handed out, and one id has to be left for the allocation
        // that caused the rollover.
        let num_user_asids = layout.num_user_asids();
        if num_user_asids - 1 <= self.num_cpus {
            return Err(AsidError::TooManyCpus {
                num_cpus: self.num_cpus,
                num_user_asids,
            });
        }

        let max = num_user_asids - self.num_cpus - 2;
        let max_pinned = match self.max_pinned {
            Some(requested) if requested > max => {
                return Err(AsidError::TooManyPinned { requested, max });
            }
            Some(requested) => requested,
            None => max,
        };

        Ok((layout, max_pinned))
    }
}
