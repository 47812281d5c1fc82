// SPDX-License-Identifier: MPL-2.0

//! The layout of an ASID value.
//!
//! A full ASID carries two fields in one `u64`. The low `asid_bits` bits
//! are the raw id that is programmed into hardware. The bits above them
//! hold the generation the raw id was handed out in. An ASID is only usable
//! while its generation field equals the allocator's current generation.

use core::fmt;

use crate::error::{AsidError, Result};

/// The smallest supported ASID width.
pub const MIN_ASID_BITS: u32 = 2;

/// The largest supported ASID width.
///
/// Half of the `u64` is left for the generation field.
pub const MAX_ASID_BITS: u32 = 32;

/// A full ASID value: the generation in the high bits, the raw id in the
/// low bits.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct Asid(u64);

impl Asid {
    /// The value of an address space that has never been given an ASID.
    pub const UNASSIGNED: Asid = Asid(0);

    /// Wraps a raw `u64`.
    pub const fn from_u64(value: u64) -> Self {
        Self(value)
    }

    /// Returns the underlying `u64`.
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns true if no ASID has been assigned yet.
    pub const fn is_unassigned(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for Asid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Asid({:#x})", self.0)
    }
}

impl From<Asid> for u64 {
    fn from(asid: Asid) -> u64 {
        asid.0
    }
}

/// Splits and builds ASID values for a given raw id width.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct AsidLayout {
    bits: u32,
}

impl AsidLayout {
    /// Creates the layout for `asid_bits` wide raw ids.
    pub fn new(asid_bits: u32) -> Result<Self> {
        if !(MIN_ASID_BITS..=MAX_ASID_BITS).contains(&asid_bits) {
            return Err(AsidError::InvalidAsidBits(asid_bits));
        }
        Ok(Self { bits: asid_bits })
    }

    /// Returns the width of the raw id field.
    pub const fn bits(&self) -> u32 {
        self.bits
    }

    /// Returns the number of raw ids, including the never-allocated id 0.
    pub const fn num_user_asids(&self) -> usize {
        1 << self.bits
    }

    /// Returns the mask selecting the raw id field.
    pub const fn mask(&self) -> u64 {
        (1 << self.bits) - 1
    }

    /// Returns the value of the first generation.
    ///
    /// It is also the amount the generation counter grows by on every
    /// rollover.
    pub const fn first_generation(&self) -> u64 {
        1 << self.bits
    }

    /// Extracts the raw id of `asid`.
    pub const fn raw_id(&self, asid: Asid) -> usize {
        (asid.0 & self.mask()) as usize
    }

    /// Extracts the generation field of `asid`, in place (raw bits zeroed).
    pub const fn generation_of(&self, asid: Asid) -> u64 {
        asid.0 & !self.mask()
    }

    /// Returns the ordinal of a generation counter value: 1 for the first
    /// generation, 2 after the first rollover, and so on.
    pub const fn generation_number(&self, generation: u64) -> u64 {
        generation >> self.bits
    }

    /// Builds an ASID from a generation counter value and a raw id.
    pub fn compose(&self, generation: u64, raw_id: usize) -> Asid {
        debug_assert_eq!(generation & self.mask(), 0);
        assert!(
            raw_id < self.num_user_asids(),
            "raw id {} does not fit in {} bits",
            raw_id,
            self.bits
        );
        Asid(generation | raw_id as u64)
    }

    /// Returns true if `asid` belongs to `generation`.
    pub const fn is_current(&self, asid: Asid, generation: u64) -> bool {
        (asid.0 ^ generation) >> self.bits == 0
    }
}
