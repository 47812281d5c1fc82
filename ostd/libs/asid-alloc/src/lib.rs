// SPDX-License-Identifier: MPL-2.0

//! Address Space ID (ASID) allocation.
//!
//! TLB entries are tagged with a short ASID so that switching address
//! spaces does not require a full TLB flush. This crate hands out ASIDs to
//! address spaces from a fixed-size space shared by all CPUs, and rolls
//! over to a new generation when the space runs out.
//!
//! The embedder creates one [`AsidAllocator`] per system, embeds an
//! [`MmContext`] in every address space, and calls
//! [`AsidAllocator::check_and_switch_context`] on every switch to a user
//! address space:
//!
//! ```
//! use asid_alloc::{AsidAllocator, AsidConfig, CpuId, NoopHardware};
//!
//! let allocator = AsidAllocator::new(AsidConfig::new(8, 2), NoopHardware).unwrap();
//! let ctx = allocator.new_mm_context();
//!
//! let outcome = allocator.check_and_switch_context(&ctx, CpuId::bsp());
//! assert_eq!(allocator.layout().raw_id(outcome.asid), 1);
//! assert!(!outcome.flush_required);
//! ```

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]
#![warn(missing_docs)]

extern crate alloc;

mod allocator;
mod asid;
mod config;
mod context;
pub mod cpu;
mod error;
mod hw;

pub use self::{
    allocator::{AsidAllocator, SwitchOutcome},
    asid::{Asid, AsidLayout, MAX_ASID_BITS, MIN_ASID_BITS},
    config::AsidConfig,
    context::MmContext,
    cpu::{CpuId, CpuSet},
    error::{AsidError, Result},
    hw::{HardwareOps, NoopHardware},
};
