// SPDX-License-Identifier: MPL-2.0

//! The generation-based ASID allocator.
//!
//! Raw ids are handed out from a bitmap with a rotating cursor. Nothing is
//! ever freed one by one: when the bitmap runs out, the generation counter
//! is bumped and the bitmap is rebuilt from the ids that must survive,
//! which are the ids every CPU currently has installed and the pinned ids.
//! Every other address space notices that its ASID is from an old
//! generation on its next switch and gets a new one.
//!
//! A rollover cannot flush the TLBs of other CPUs directly. Instead every
//! CPU is marked as having a flush pending, and performs a local flush the
//! next time it switches through the slow path.

use alloc::{boxed::Box, vec};
use core::sync::atomic::{AtomicU64, Ordering};

use id_alloc::IdAlloc;
use spin::Mutex;

use crate::{
    asid::{Asid, AsidLayout},
    config::AsidConfig,
    context::MmContext,
    cpu::{CpuId, CpuSet},
    error::{AsidError, Result},
    hw::HardwareOps,
};


/// The result of switching a CPU to an address space.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SwitchOutcome {
    /// The ASID to program into the hardware.
    pub asid: Asid,
    /// Whether the CPU's TLB and branch predictor were flushed during the
    /// switch because of a rollover since this CPU last switched.
    ///
    /// The allocator has already invoked [`HardwareOps`] for the flush; the
    /// flag is for embedders that keep additional per-CPU state.
    pub flush_required: bool,
}

/// An ASID allocator shared by a fixed set of CPUs.
pub struct AsidAllocator<H: HardwareOps> {
    layout: AsidLayout,
    num_cpus: usize,
    fast_path: bool,
    /// The current generation, in place (raw id bits zero). Only bumped
    /// with `inner` locked.
    generation: AtomicU64,
    /// The ASID each CPU has installed, or 0 after a rollover until the
    /// CPU switches again.
    active_asids: Box<[AtomicU64]>,
    inner: Mutex<Inner>,
    hw: H,
}

struct Inner {
    /// Raw ids in use in the current generation.
    asid_map: IdAlloc,
    /// Raw ids of pinned address spaces. They survive every rollover.
    pinned_map: IdAlloc,
    nr_pinned: usize,
    max_pinned: usize,
    /// The ASID each CPU had installed at the last rollover it missed.
    reserved_asids: Box<[Asid]>,
    tlb_flush_pending: CpuSet,
    cur_idx: usize,
}

impl<H: HardwareOps> AsidAllocator<H> {
    /// Creates an allocator.
    pub fn new(config: AsidConfig, hw: H) -> Result<Self> {
        let (layout, max_pinned) = config.validate()?;
        let num_user_asids = layout.num_user_asids();

        let active_asids = (0..config.num_cpus)
            .map(|_| AtomicU64::new(0))
            .collect::<Box<[_]>>();
        let inner = Inner {
            asid_map: IdAlloc::with_capacity(num_user_asids),
            pinned_map: IdAlloc::with_capacity(num_user_asids),
            nr_pinned: 0,
            max_pinned,
            reserved_asids: vec![Asid::UNASSIGNED; config.num_cpus].into_boxed_slice(),
            tlb_flush_pending: CpuSet::new_empty(config.num_cpus),
            cur_idx: 1,
        };

        log::info!(
            "ASID allocator initialised with {} entries for {} CPUs",
            num_user_asids - 1,
            config.num_cpus
        );

        Ok(Self {
            layout,
            num_cpus: config.num_cpus,
            fast_path: config.fast_path,
            generation: AtomicU64::new(layout.first_generation()),
            active_asids,
            inner: Mutex::new(inner),
            hw,
        })
    }

    /// Creates an unassigned context sized for this allocator's CPUs.
    pub fn new_mm_context(&self) -> MmContext {
        MmContext::new(self.num_cpus)
    }

    /// Returns the layout of the ASIDs this allocator hands out.
    pub fn layout(&self) -> AsidLayout {
        self.layout
    }

    /// Returns the number of CPUs served.
    pub fn num_cpus(&self) -> usize {
        self.num_cpus
    }

    /// Returns the hardware operations.
    pub fn hw(&self) -> &H {
        &self.hw
    }

    /// Returns the current generation counter value, in place.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Returns the ASID `cpu` has installed, or `Asid::UNASSIGNED` if a
    /// rollover happened since it last switched.
    pub fn active_asid(&self, cpu: CpuId) -> Asid {
        Asid::from_u64(self.active_slot(cpu).load(Ordering::Acquire))
    }

    /// Returns the ASID kept reserved for `cpu` by the last rollover.
    pub fn reserved_asid(&self, cpu: CpuId) -> Asid {
        self.check_cpu(cpu);
        self.inner.lock().reserved_asids[cpu.as_usize()]
    }

    /// Returns true if the raw id is in use in the current generation.
    pub fn is_allocated(&self, raw_id: usize) -> bool {
        self.inner.lock().asid_map.is_allocated(raw_id)
    }

    /// Returns true if `cpu` has to flush its TLB on its next switch.
    pub fn is_flush_pending(&self, cpu: CpuId) -> bool {
        self.check_cpu(cpu);
        self.inner.lock().tlb_flush_pending.contains(cpu)
    }

    /// Returns the number of pinned address spaces.
    pub fn nr_pinned(&self) -> usize {
        self.inner.lock().nr_pinned
    }

    /// Makes sure `ctx` has an ASID of the current generation and records
    /// it as the ASID installed on `cpu`.
    ///
    /// The caller must stay on `cpu` for the duration of the call and
    /// program the returned ASID into the hardware afterwards.
    ///
    /// # Panics
    ///
    /// Panics if `cpu` is not served by this allocator.
    pub fn check_and_switch_context(&self, ctx: &MmContext, cpu: CpuId) -> SwitchOutcome {
        let active = self.active_slot(cpu);
        let asid = ctx.id.load(Ordering::Relaxed);

        // A rollover zeroes the active slot of every CPU before anybody
        // can allocate in the new generation. Exchanging a nonzero slot
        // therefore either happens before the rollover, which then
        // reserves the ASID we install, or fails.
        if self.fast_path {
            let old_active = active.load(Ordering::Relaxed);
            if old_active != 0
                && self
                    .layout
                    .is_current(Asid::from_u64(asid), self.generation())
                && active
                    .compare_exchange(old_active, asid, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
            {
                return SwitchOutcome {
                    asid: Asid::from_u64(asid),
                    flush_required: false,
                };
            }
        }

        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        // Another CPU may have updated the context while we waited.
        let mut asid = ctx.asid();
        if !self
            .layout
            .is_current(asid, self.generation.load(Ordering::Relaxed))
        {
            asid = self.new_context(inner, ctx);
            ctx.id.store(asid.as_u64(), Ordering::Relaxed);
        }

        let raw_id = self.layout.raw_id(asid);
        assert!(
            raw_id != 0 && inner.asid_map.is_allocated(raw_id),
            "{:?} is installed without being allocated",
            asid
        );

        let flush_required = inner.tlb_flush_pending.test_and_remove(cpu);
        if flush_required {
            self.hw.flush_branch_predictor(cpu);
            self.hw.flush_local_tlb(cpu);
        }

        active.store(asid.as_u64(), Ordering::Release);
        ctx.cpus.add(cpu, Ordering::Release);

        log::trace!(
            "CPU {} switched to {:?} (flush: {})",
            cpu.as_usize(),
            asid,
            flush_required
        );

        SwitchOutcome {
            asid,
            flush_required,
        }
    }

    /// Pins the raw id of `ctx`, so that no rollover takes it away.
    ///
    /// Pins are counted: the id stays pinned until [`Self::unpin_context`]
    /// has been called as often as this method succeeded. The returned ASID
    /// is always of the current generation. A context whose ASID is stale
    /// gets a current one first; once pinned, only the generation part of
    /// its ASID ever changes.
    pub fn pin_context(&self, ctx: &MmContext) -> Result<Asid> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let mut asid = ctx.asid();
        let pinned = ctx.pinned.load(Ordering::Relaxed);
        if pinned == 0 && inner.nr_pinned >= inner.max_pinned {
            log::warn!("Cannot pin {:?}: pin limit reached", asid);
            return Err(AsidError::PinLimitReached);
        }

        // An already pinned id is in the bitmap of every generation, so
        // this keeps the raw id and never rolls over.
        if !self
            .layout
            .is_current(asid, self.generation.load(Ordering::Relaxed))
        {
            asid = self.new_context(inner, ctx);
            ctx.id.store(asid.as_u64(), Ordering::Relaxed);
        }

        if pinned == 0 {
            inner.nr_pinned += 1;
            inner.pinned_map.mark(self.layout.raw_id(asid));
        }
        ctx.pinned.store(pinned + 1, Ordering::Relaxed);

        Ok(asid)
    }

    /// Drops one pin of `ctx`.
    pub fn unpin_context(&self, ctx: &MmContext) -> Result<()> {
        let mut inner = self.inner.lock();

        let pinned = ctx.pinned.load(Ordering::Relaxed);
        if pinned == 0 {
            return Err(AsidError::NotPinned);
        }

        ctx.pinned.store(pinned - 1, Ordering::Relaxed);
        if pinned == 1 {
            inner.pinned_map.free(self.layout.raw_id(ctx.asid()));
            inner.nr_pinned -= 1;
        }

        Ok(())
    }

    /// Computes a current-generation ASID for `ctx`.
    fn new_context(&self, inner: &mut Inner, ctx: &MmContext) -> Asid {
        let asid = ctx.asid();
        let mut generation = self.generation.load(Ordering::Relaxed);

        if !asid.is_unassigned() {
            let raw_id = self.layout.raw_id(asid);
            let new_asid = self.layout.compose(generation, raw_id);

            // If our ASID was installed on some CPU during a rollover, it
            // was reserved and we keep using it.
            if inner.check_update_reserved_asid(asid, new_asid) {
                return new_asid;
            }

            // Pinned ids were carried over into the new bitmap.
            if ctx.pinned.load(Ordering::Relaxed) > 0 {
                return new_asid;
            }

            // Take back the old raw id if nobody got it yet.
            if inner.asid_map.alloc_specific(raw_id).is_some() {
                return new_asid;
            }
        }

        let raw_id = match inner.asid_map.alloc_from(inner.cur_idx) {
            Some(raw_id) => raw_id,
            None => {
                let step = self.layout.first_generation();
                generation = self.generation.fetch_add(step, Ordering::AcqRel) + step;
                self.flush_context(inner);
                log::debug!(
                    "ASID rollover, new generation: {}",
                    self.layout.generation_number(generation)
                );

                match inner.asid_map.alloc_from(1) {
                    Some(raw_id) => raw_id,
                    None => panic!("no free ASID right after a rollover"),
                }
            }
        };

        inner.cur_idx = raw_id;
        ctx.cpus.clear(Ordering::Relaxed);
        self.layout.compose(generation, raw_id)
    }

    /// Rebuilds the bitmap for a new generation.
    ///
    /// Must be called right after the generation is bumped, with the lock
    /// held.
    fn flush_context(&self, inner: &mut Inner) {
        inner.asid_map.clear();
        inner.asid_map.union_with(&inner.pinned_map);

        for (cpu, active) in self.active_asids.iter().enumerate() {
            let mut asid = Asid::from_u64(active.swap(0, Ordering::AcqRel));
            // A CPU that has not switched since the previous rollover still
            // runs with the ASID reserved back then.
            if asid.is_unassigned() {
                asid = inner.reserved_asids[cpu];
            }
            if !asid.is_unassigned() {
                inner.asid_map.mark(self.layout.raw_id(asid));
            }
            inner.reserved_asids[cpu] = asid;
        }

        inner.tlb_flush_pending.add_all();
        self.hw.invalidate_icache_if_needed();
    }

    fn active_slot(&self, cpu: CpuId) -> &AtomicU64 {
        self.check_cpu(cpu);
        &self.active_asids[cpu.as_usize()]
    }

    fn check_cpu(&self, cpu: CpuId) {
        assert!(
            cpu.as_usize() < self.num_cpus,
            "{:?} is out of range ({} CPUs)",
            cpu,
            self.num_cpus
        );
    }
}

impl Inner {
    /// Replaces `asid` with `new_asid` in every reserved slot holding it.
    ///
    /// Returns whether any slot did. All slots have to be updated, since
    /// threads of one address space may be reserved on several CPUs.
    fn check_update_reserved_asid(&mut self, asid: Asid, new_asid: Asid) -> bool {
        let mut hit = false;
        for reserved in self.reserved_asids.iter_mut() {
            if *reserved == asid {
                hit = true;
                *reserved = new_asid;
            }
        }
        hit
    }
}
