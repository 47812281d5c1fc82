// SPDX-License-Identifier: MPL-2.0

//! Concurrent switching from many CPUs, checked against an audit log.

use std::{
    collections::HashMap,
    sync::{
        Arc, Barrier, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
};

use asid_alloc::{AsidAllocator, AsidConfig, CpuId, HardwareOps, MmContext};
use rand::{Rng, SeedableRng, rngs::SmallRng};

const SWITCHES_PER_CPU: usize = 20_000;

#[derive(Default)]
struct CountingHardware {
    tlb_flushes: AtomicUsize,
    rollovers: AtomicUsize,
}

impl HardwareOps for CountingHardware {
    fn flush_local_tlb(&self, _cpu: CpuId) {
        self.tlb_flushes.fetch_add(1, Ordering::Relaxed);
    }

    fn flush_branch_predictor(&self, _cpu: CpuId) {}

    fn invalidate_icache_if_needed(&self) {
        self.rollovers.fetch_add(1, Ordering::Relaxed);
    }
}

/// Records which address space every handed-out ASID belongs to.
///
/// ASIDs include their generation, so a value must never be seen with two
/// different address spaces.
#[derive(Default)]
struct AuditLog {
    owners: HashMap<u64, usize>,
    switches: usize,
}

impl AuditLog {
    fn record(&mut self, asid: u64, space: usize) {
        self.switches += 1;
        if let Some(&owner) = self.owners.get(&asid) {
            assert_eq!(
                owner, space,
                "ASID {:#x} handed to space {} while owned by space {}",
                asid, space, owner
            );
        } else {
            self.owners.insert(asid, space);
        }
    }
}

fn stress(config: AsidConfig, spaces_per_cpu: usize) {
    let _ = env_logger::builder().is_test(true).try_init();

    let num_cpus = config.num_cpus;
    let allocator = Arc::new(AsidAllocator::new(config, CountingHardware::default()).unwrap());
    let spaces: Arc<Vec<MmContext>> = Arc::new(
        (0..num_cpus * spaces_per_cpu)
            .map(|_| allocator.new_mm_context())
            .collect(),
    );
    let audit = Arc::new(Mutex::new(AuditLog::default()));
    let barrier = Arc::new(Barrier::new(num_cpus));

    let handles = (0..num_cpus)
        .map(|cpu| {
            let allocator = allocator.clone();
            let spaces = spaces.clone();
            let audit = audit.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let cpu_id = CpuId::new(cpu as u32);
                let layout = allocator.layout();
                let mut rng = SmallRng::seed_from_u64(cpu as u64);
                let mut last_generation = allocator.generation();
                barrier.wait();

                for _ in 0..SWITCHES_PER_CPU {
                    let space = rng.random_range(0..spaces.len());
                    let outcome = allocator.check_and_switch_context(&spaces[space], cpu_id);

                    let generation = allocator.generation();
                    assert!(generation >= last_generation);
                    assert!(layout.generation_of(outcome.asid) <= generation);
                    assert_ne!(layout.raw_id(outcome.asid), 0);
                    last_generation = generation;

                    audit
                        .lock()
                        .unwrap()
                        .record(outcome.asid.as_u64(), space);
                }
            })
        })
        .collect::<Vec<_>>();

    for handle in handles {
        handle.join().unwrap();
    }

    let audit = audit.lock().unwrap();
    assert_eq!(audit.switches, num_cpus * SWITCHES_PER_CPU);

    let layout = allocator.layout();
    let rollovers = layout.generation_number(allocator.generation()) - 1;
    let hw = allocator.hw();
    assert_eq!(hw.rollovers.load(Ordering::Relaxed) as u64, rollovers);
    // Every CPU flushes at most once per rollover.
    assert!(hw.tlb_flushes.load(Ordering::Relaxed) as u64 <= rollovers * num_cpus as u64);
}

#[test]
fn concurrent_switches_keep_asids_unique() {
    stress(AsidConfig::new(4, 4), 8);
}

#[test]
fn concurrent_switches_without_fast_path() {
    stress(AsidConfig::new(4, 4).with_fast_path(false), 8);
}

#[test]
fn concurrent_switches_with_wide_asids() {
    stress(AsidConfig::new(8, 8), 64);
}

#[test]
fn concurrent_switches_in_tiny_space() {
    stress(AsidConfig::new(3, 6), 2);
}
