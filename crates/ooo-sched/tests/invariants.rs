//! Randomised-traffic invariant checks.
//!
//! Drives a three-queue topology with seeded random insert, completion,
//! load-miss and squash traffic, asserting the scheduler's structural
//! invariants after every cycle:
//!
//! 1. An un-written-back register has exactly one resident producer.
//! 2. Delay pipelines never hold canceled or squashed instructions.
//! 3. After a squash nothing younger than the threshold survives.
//! 4. The machine drains completely once traffic stops.
//!
//! Failures replay byte-for-byte from the seed.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use ooo_sched::config::{
    FuDesc, IssuePortConfig, IssueQueConfig, OpDesc, SchedulerConfig,
};
use ooo_sched::{DynInst, InstPtr, OpClass, PhysRegId, Scheduler};

const NUM_PHYS_REGS: usize = 4096;
const TRAFFIC_CYCLES: u64 = 600;
const DRAIN_CYCLES: u64 = 120;
const MISS_REFILL: u64 = 12;

fn iq(name: &str, delay: usize, ops: Vec<OpDesc>) -> IssueQueConfig {
    IssueQueConfig {
        name: name.to_string(),
        size: 16,
        inports: 4,
        schedule_to_exec_delay: delay,
        out_ports: vec![IssuePortConfig {
            fus: vec![FuDesc { ops }],
            read_ports: Vec::new(),
        }],
    }
}

fn topology() -> SchedulerConfig {
    let alu = |lat| {
        vec![OpDesc {
            op_class: OpClass::IntAlu,
            op_lat: lat,
            pipelined: true,
        }]
    };
    let mem = vec![OpDesc {
        op_class: OpClass::MemRead,
        op_lat: 3,
        pipelined: true,
    }];
    let mut cfg = SchedulerConfig::single_iq("placeholder", 1, alu(1));
    cfg.iqs = vec![
        iq("i0", 1, alu(1)),
        iq("i1", 2, alu(1)),
        iq("ld", 1, mem),
    ];
    cfg.xbar_wakeup = true;
    cfg.num_phys_regs = NUM_PHYS_REGS;
    cfg
}

struct Harness {
    sched: Scheduler,
    rng: StdRng,
    now: u64,
    next_seq: u64,
    next_reg: u32,
    /// Live (dispatched, uncommitted, unsquashed) instructions in
    /// sequence order.
    live: Vec<u64>,
    insts: HashMap<u64, InstPtr>,
    /// Registers whose producer is live or completed; safe source pool.
    valid_regs: Vec<u32>,
    /// `(bypass_at, writeback_at, inst)` completions in flight.
    pending: Vec<(u64, u64, InstPtr)>,
    /// Deferred explicit miss reports.
    cancels: Vec<(u64, InstPtr)>,
    issued_total: u64,
}

impl Harness {
    fn new(seed: u64) -> Self {
        Self {
            sched: Scheduler::new(&topology()).unwrap(),
            rng: StdRng::seed_from_u64(seed),
            now: 0,
            next_seq: 0,
            next_reg: 1,
            live: Vec::new(),
            insts: HashMap::new(),
            valid_regs: Vec::new(),
            pending: Vec::new(),
            cancels: Vec::new(),
            issued_total: 0,
        }
    }

    fn random_srcs(&mut self) -> Vec<PhysRegId> {
        let mut srcs = Vec::new();
        for _ in 0..self.rng.gen_range(0..=2usize) {
            if self.valid_regs.is_empty() {
                break;
            }
            let window = self.valid_regs.len().saturating_sub(8);
            let pick = self.rng.gen_range(window..self.valid_regs.len());
            srcs.push(PhysRegId::int(self.valid_regs[pick]));
        }
        srcs
    }

    fn try_insert(&mut self) {
        let op_class = if self.rng.gen_bool(0.25) {
            OpClass::MemRead
        } else {
            OpClass::IntAlu
        };
        let srcs = self.random_srcs();
        let dst = self.next_reg;
        assert!((dst as usize) < NUM_PHYS_REGS, "register pool exhausted");
        self.next_seq += 1;
        let inst = DynInst::new(self.next_seq, op_class, srcs, vec![PhysRegId::int(dst)]).into_ptr();
        if !self.sched.ready(&inst) {
            return; // back-pressure; seq gap is harmless
        }
        self.next_reg += 1;
        self.sched.add_producer(&inst);
        self.sched.insert(&inst);
        self.live.push(inst.seq_num);
        self.valid_regs.push(dst);
        self.insts.insert(inst.seq_num, inst);
    }

    fn squash_to_random_point(&mut self) {
        if self.live.is_empty() {
            return;
        }
        let idx = self.rng.gen_range(0..self.live.len());
        let threshold = self.live[idx];
        self.sched.do_squash(threshold);

        let squashed: Vec<u64> = self
            .live
            .iter()
            .copied()
            .filter(|&s| s > threshold)
            .collect();
        self.live.retain(|&s| s <= threshold);
        for seq in &squashed {
            let inst = self.insts.remove(seq).unwrap();
            assert!(inst.is_squashed());
            self.valid_regs.retain(|&r| r != inst.dsts[0].flat_index);
        }
        self.pending.retain(|(_, _, inst)| inst.seq_num <= threshold);
        self.cancels.retain(|(_, inst)| inst.seq_num <= threshold);

        // Invariant 3: nothing younger than the threshold survives in
        // any queue structure.
        for qi in 0..self.sched.num_iqs() {
            let q = self.sched.iq(qi);
            assert!(q.resident_seq_nums().iter().all(|&s| s <= threshold));
            assert!(q.pipeline_insts().iter().all(|i| i.seq_num <= threshold));
        }
    }

    fn step(&mut self) {
        self.now += 1;

        for (at, inst) in std::mem::take(&mut self.cancels) {
            if at == self.now {
                self.sched.load_cancel(&inst);
            } else {
                self.cancels.push((at, inst));
            }
        }

        for (bypass_at, _, inst) in &self.pending {
            if *bypass_at == self.now {
                self.sched.bypass_writeback(inst);
            }
        }
        let mut written_back = Vec::new();
        self.pending.retain(|(_, wb_at, inst)| {
            if *wb_at == self.now {
                written_back.push(inst.clone());
                false
            } else {
                true
            }
        });
        for inst in written_back {
            self.sched.writeback_wakeup(&inst);
        }

        self.sched.tick();
        self.sched.issue_and_select();

        while let Some(inst) = self.sched.pop_inst_to_fu() {
            self.issued_total += 1;
            let lat = u64::from(self.sched.op_latency(&inst));
            let missed = inst.is_load() && self.rng.gen_bool(0.15);
            if missed {
                self.pending
                    .push((self.now + MISS_REFILL, self.now + MISS_REFILL + 1, inst.clone()));
                if self.rng.gen_bool(0.5) {
                    // Half the misses are reported early; the rest are
                    // discovered by consumers at the FU input.
                    self.cancels.push((self.now + 3, inst));
                }
            } else {
                self.pending
                    .push((self.now + lat, self.now + lat + 1, inst.clone()));
            }
        }

        self.commit_written_back();
        self.check_invariants();
    }

    fn commit_written_back(&mut self) {
        let mut commit_to = None;
        while let Some(&front) = self.live.first() {
            if self.insts[&front].written_back() {
                commit_to = Some(front);
                self.live.remove(0);
            } else {
                break;
            }
        }
        if let Some(seq) = commit_to {
            self.sched.do_commit(seq);
        }
    }

    fn check_invariants(&self) {
        // Invariant 1: every live instruction is resident in exactly one
        // queue, and an un-written-back destination register always has
        // its producer resident.
        for seq in &self.live {
            let inst = &self.insts[seq];
            let homes = (0..self.sched.num_iqs())
                .filter(|&qi| self.sched.iq(qi).resident_seq_nums().contains(seq))
                .count();
            assert_eq!(homes, 1, "[sn:{seq}] resident in {homes} queues");
            let dst = inst.dsts[0].flat_index;
            if !self.sched.writeback_ready(dst) {
                let producer = self.sched.inst_by_dst_reg(dst).expect("producer missing");
                assert_eq!(producer.seq_num, *seq);
            }
        }

        // Invariant 2/5: the delay pipelines never carry canceled or
        // squashed instructions (slots are scrubbed in place).
        for qi in 0..self.sched.num_iqs() {
            for inst in self.sched.iq(qi).pipeline_insts() {
                assert!(!inst.canceled(), "{inst} canceled but still in flight");
                assert!(!inst.is_squashed(), "{inst} squashed but still in flight");
            }
        }
    }

    fn drain(&mut self) {
        for _ in 0..DRAIN_CYCLES {
            self.step();
        }
        assert!(
            self.live.is_empty(),
            "stuck instructions after drain: {:?}",
            self.live
        );
        assert!(self.sched.is_drained());
        assert_eq!(self.sched.iq_insts(), 0);
        assert!(!self.sched.has_ready_insts());
    }
}

#[test]
fn randomized_traffic_upholds_invariants() {
    for seed in [1u64, 7, 42] {
        let mut h = Harness::new(seed);
        for cycle in 0..TRAFFIC_CYCLES {
            for _ in 0..h.rng.gen_range(0..=2u32) {
                h.try_insert();
            }
            if cycle % 97 == 96 {
                h.squash_to_random_point();
            }
            h.step();
        }
        h.drain();
        assert!(h.issued_total > 0, "seed {seed}: no traffic issued");
    }
}

#[test]
fn squash_everything_leaves_an_empty_machine() {
    let mut h = Harness::new(99);
    for _ in 0..40 {
        h.try_insert();
        h.step();
    }
    h.sched.do_squash(0);
    h.live.clear();
    h.pending.clear();
    h.cancels.clear();
    assert!(h.sched.is_drained());
    assert_eq!(h.sched.iq_insts(), 0);
}