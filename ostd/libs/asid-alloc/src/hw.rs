// SPDX-License-Identifier: MPL-2.0

//! Hardware maintenance requested by the allocator.

use crate::cpu::CpuId;

/// The hardware operations the allocator needs from its embedder.
///
/// The allocator calls these with its lock held, on the CPU that is
/// switching. Implementations must not block and must not call back into
/// the allocator.
pub trait HardwareOps: Send + Sync {
    /// Invalidates all non-global TLB entries of the local CPU.
    fn flush_local_tlb(&self, cpu: CpuId);

    /// Invalidates the branch predictor state of the local CPU.
    fn flush_branch_predictor(&self, cpu: CpuId);

    /// Invalidates the instruction cache if it is tagged by ASID.
    ///
    /// Called once per rollover. Platforms whose instruction cache is not
    /// ASID-tagged implement this as a no-op.
    fn invalidate_icache_if_needed(&self);
}

/// Hardware operations that do nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopHardware;

impl HardwareOps for NoopHardware {
    fn flush_local_tlb(&self, _cpu: CpuId) {}

    fn flush_branch_predictor(&self, _cpu: CpuId) {}

    fn invalidate_icache_if_needed(&self) {}
}
