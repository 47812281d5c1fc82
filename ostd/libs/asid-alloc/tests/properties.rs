// SPDX-License-Identifier: MPL-2.0

//! Randomized single-threaded checks of the allocator invariants.
//!
//! Several CPUs are simulated by interleaving their switches on one thread,
//! which makes the allocator state observable between operations.

use std::collections::HashMap;

use asid_alloc::{Asid, AsidAllocator, AsidConfig, AsidError, CpuId, MmContext, NoopHardware};
use rand::{Rng, SeedableRng, rngs::SmallRng};

const OPS_PER_RUN: usize = 3000;

struct Model {
    allocator: AsidAllocator<NoopHardware>,
    spaces: Vec<MmContext>,
    /// Raw ids of pinned spaces, keyed by space index.
    pinned: HashMap<usize, usize>,
    last_generation: u64,
    rollovers: u64,
}

impl Model {
    fn new(config: AsidConfig, nr_spaces: usize) -> Self {
        let allocator = AsidAllocator::new(config, NoopHardware).unwrap();
        let spaces = (0..nr_spaces).map(|_| allocator.new_mm_context()).collect();
        let last_generation = allocator.generation();
        Self {
            allocator,
            spaces,
            pinned: HashMap::new(),
            last_generation,
            rollovers: 0,
        }
    }

    fn snapshot_cpus(&self) -> Vec<(Asid, Asid)> {
        (0..self.allocator.num_cpus() as u32)
            .map(CpuId::new)
            .map(|cpu| {
                (
                    self.allocator.active_asid(cpu),
                    self.allocator.reserved_asid(cpu),
                )
            })
            .collect()
    }

    fn step(&mut self, rng: &mut SmallRng) {
        let before = self.snapshot_cpus();
        let layout = self.allocator.layout();
        let space = rng.random_range(0..self.spaces.len());

        match rng.random_range(0..100) {
            0..5 => self.pin(space),
            5..10 => self.unpin(space),
            _ => {
                let cpu = CpuId::new(rng.random_range(0..self.allocator.num_cpus() as u32));
                let ctx = &self.spaces[space];
                let outcome = self.allocator.check_and_switch_context(ctx, cpu);

                assert_ne!(layout.raw_id(outcome.asid), 0);
                assert!(layout.is_current(outcome.asid, self.allocator.generation()));
                assert_eq!(self.allocator.active_asid(cpu), outcome.asid);
                assert!(self.allocator.is_allocated(layout.raw_id(outcome.asid)));

                // Without a rollover in between, switching again is a no-op.
                let again = self.allocator.check_and_switch_context(ctx, cpu);
                assert_eq!(again.asid, outcome.asid);
                assert!(!again.flush_required);
            }
        }

        self.check_generation(&before);
        self.check_current_asids_unique();
        self.check_pinned_stable();
    }

    fn pin(&mut self, space: usize) {
        let ctx = &self.spaces[space];
        let was_pinned = ctx.pin_count() > 0;
        match self.allocator.pin_context(ctx) {
            Ok(asid) => {
                let raw_id = self.allocator.layout().raw_id(asid);
                assert_ne!(raw_id, 0);
                if was_pinned {
                    assert_eq!(self.pinned[&space], raw_id);
                } else {
                    self.pinned.insert(space, raw_id);
                }
            }
            Err(err) => {
                assert_eq!(err, AsidError::PinLimitReached);
                assert!(!was_pinned);
            }
        }
    }

    fn unpin(&mut self, space: usize) {
        let ctx = &self.spaces[space];
        match self.allocator.unpin_context(ctx) {
            Ok(()) => {
                if ctx.pin_count() == 0 {
                    self.pinned.remove(&space);
                }
            }
            Err(err) => {
                assert_eq!(err, AsidError::NotPinned);
                assert!(!self.pinned.contains_key(&space));
            }
        }
        assert_eq!(self.allocator.nr_pinned(), self.pinned.len());
    }

    fn check_generation(&mut self, before: &[(Asid, Asid)]) {
        let layout = self.allocator.layout();
        let generation = self.allocator.generation();
        assert!(generation >= self.last_generation);
        if generation == self.last_generation {
            return;
        }

        // A single operation rolls over at most once.
        assert_eq!(generation - self.last_generation, layout.first_generation());
        self.last_generation = generation;
        self.rollovers += 1;

        for (cpu, &(active, reserved)) in before.iter().enumerate() {
            let cpu = CpuId::new(cpu as u32);
            let expected = if active.is_unassigned() {
                reserved
            } else {
                active
            };
            let now = self.allocator.reserved_asid(cpu);
            assert_eq!(layout.raw_id(now), layout.raw_id(expected));
            if !expected.is_unassigned() {
                assert!(self.allocator.is_allocated(layout.raw_id(expected)));
            }
        }
    }

    fn check_current_asids_unique(&self) {
        let layout = self.allocator.layout();
        let generation = self.allocator.generation();
        let mut owners = HashMap::new();
        for (idx, ctx) in self.spaces.iter().enumerate() {
            let asid = ctx.asid();
            if !layout.is_current(asid, generation) {
                continue;
            }
            assert!(self.allocator.is_allocated(layout.raw_id(asid)));
            if let Some(other) = owners.insert(asid, idx) {
                panic!("{:?} is held by spaces {} and {}", asid, other, idx);
            }
        }
    }

    fn check_pinned_stable(&self) {
        let layout = self.allocator.layout();
        for (&space, &raw_id) in &self.pinned {
            assert_eq!(layout.raw_id(self.spaces[space].asid()), raw_id);
            assert!(self.allocator.is_allocated(raw_id));
        }
    }
}

fn run(seed: u64, config: AsidConfig, nr_spaces: usize) -> u64 {
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut model = Model::new(config, nr_spaces);
    for _ in 0..OPS_PER_RUN {
        model.step(&mut rng);
    }
    model.rollovers
}

#[test]
fn invariants_hold_in_tiny_space() {
    for seed in 0..16 {
        let rollovers = run(seed, AsidConfig::new(2, 2), 6);
        assert!(rollovers > 0, "seed {} never rolled over", seed);
    }
}

#[test]
fn invariants_hold_with_many_cpus() {
    for seed in 0..16 {
        let rollovers = run(seed, AsidConfig::new(4, 8), 40);
        assert!(rollovers > 0, "seed {} never rolled over", seed);
    }
}

#[test]
fn invariants_hold_without_fast_path() {
    for seed in 0..8 {
        run(seed, AsidConfig::new(3, 3).with_fast_path(false), 20);
    }
}

#[test]
fn no_rollover_when_spaces_fit() {
    for seed in 0..8 {
        assert_eq!(run(seed, AsidConfig::new(8, 4), 100), 0);
    }
}
