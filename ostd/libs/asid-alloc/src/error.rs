// SPDX-License-Identifier: MPL-2.0

/// The error type returned by fallible allocator operations.
///
/// Invariant violations inside the allocator are not reported through
/// this type; they panic.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AsidError {
    /// The ASID width is outside of the supported `2..=32` range.
    InvalidAsidBits(u32),
    /// The allocator must serve at least one CPU.
    InvalidCpuCount,
    /// The ASID space is too small to keep one reserved id per CPU and
    /// still have a free id after a rollover.
    TooManyCpus {
        /// The number of CPUs requested.
        num_cpus: usize,
        /// The number of ids in the space, including id 0.
        num_user_asids: usize,
    },
    /// The requested pin limit would leave no id free after a rollover.
    TooManyPinned {
        /// The requested limit.
        requested: usize,
        /// The largest limit the configuration allows.
        max: usize,
    },
    /// No more address spaces can be pinned.
    PinLimitReached,
    /// The address space is not pinned.
    NotPinned,
}

/// The result type of fallible allocator operations.
pub type Result<T> = core::result::Result<T, AsidError>;
