//! Top-level scheduler.
//!
//! The scheduler owns the issue queues and everything shared between
//! them: the dispatch table routing op classes to queues, the
//! speculative wake-up matrix, the three readiness scoreboards, the
//! register-file read-port arbitration fabric, and the future-event
//! queue carrying delayed speculative wake-ups. Cross-queue effects
//! (wake-ups, load cancel, arbitration) are routed through scheduler
//! methods over queue indices; queues never reference each other.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{debug, trace, warn};

use sched_core::{Cycles, EventQueue};

use crate::config::{ConfigError, SchedulerConfig, MAX_TYPE_PORT_ID};
use crate::issue_queue::IssueQue;
use crate::mem_dep::MemDepUnit;
use crate::reg_cache::LruRegCache;
use crate::scoreboard::Scoreboards;
use crate::{InstPtr, OpClass, PhysRegId, RegClass};

/// Read-port arbitration fabric, rebuilt every cycle.
///
/// Claims resolve by priority, then first-come: a later claimant only
/// evicts a holder of strictly lower priority. Integer reads consult the
/// register cache first; a hit is free and claims no port.
pub(crate) struct RfArbiter {
    /// `type_port_id` to current holder and its priority.
    occupancy: Vec<Option<(InstPtr, u8)>>,
    losers: Vec<InstPtr>,
    reg_cache: LruRegCache,
}

impl RfArbiter {
    fn new(reg_cache_capacity: usize) -> Self {
        let mut occupancy = Vec::with_capacity(MAX_TYPE_PORT_ID);
        occupancy.resize_with(MAX_TYPE_PORT_ID, || None);
        Self {
            occupancy,
            losers: Vec::new(),
            reg_cache: LruRegCache::new(reg_cache_capacity),
        }
    }

    /// Claim the read port for one source operand of `inst`.
    pub(crate) fn use_port(&mut self, inst: &InstPtr, src: PhysRegId, type_port_id: usize, priority: u8) {
        if src.class == RegClass::Int && self.reg_cache.access(src.flat_index) {
            // Captured operand: the read is free.
            return;
        }
        if let Some((holder, held_pri)) = self.occupancy[type_port_id].clone() {
            if held_pri >= priority {
                trace!(
                    target: "schedule",
                    "[sn:{}] lost port {type_port_id:#04x} to [sn:{}]",
                    inst.seq_num, holder.seq_num
                );
                self.losers.push(inst.clone());
                return;
            }
            trace!(
                target: "schedule",
                "[sn:{}] evicted from port {type_port_id:#04x} by [sn:{}]",
                holder.seq_num, inst.seq_num
            );
            self.losers.push(holder);
        }
        self.occupancy[type_port_id] = Some((inst.clone(), priority));
    }

    /// Flag this cycle's losers and reset the fabric.
    fn finish_cycle(&mut self) {
        for loser in self.losers.drain(..) {
            loser.set_arb_failed();
        }
        for slot in &mut self.occupancy {
            *slot = None;
        }
    }
}

/// A speculative wake-up in flight to a destination queue.
struct SpecWakeup {
    inst: InstPtr,
    to: usize,
}

/// The dynamic instruction scheduler of an out-of-order backend.
impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("queues", &self.queues)
            .field("cycle", &self.cycle)
            .finish_non_exhaustive()
    }
}

pub struct Scheduler {
    queues: Vec<IssueQue>,
    /// Op class to candidate queue ids.
    disp_table: Vec<Vec<usize>>,
    /// Source queue id to speculative wake-up fan-out.
    wake_matrix: Vec<Vec<usize>>,
    op_lat: [u32; OpClass::COUNT],
    op_pipelined: [bool; OpClass::COUNT],

    scoreboards: Scoreboards,
    arb: RfArbiter,
    /// Issued instructions awaiting FU intake.
    insts_to_fu: Vec<InstPtr>,
    events: EventQueue<SpecWakeup>,
    cycle: Cycles,

    load_wake_adjust: u32,
    vec_ones_reg: Option<u32>,
    mem_dep: Option<Box<dyn MemDepUnit>>,
    rng: StdRng,
}

impl Scheduler {
    /// Build a scheduler from `config`.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` for any topology the hardware could not
    /// realise.
    pub fn new(config: &SchedulerConfig) -> Result<Self, ConfigError> {
        let mut queues = Vec::with_capacity(config.iqs.len());
        for (id, iq_cfg) in config.iqs.iter().enumerate() {
            if config.iqs[..id].iter().any(|c| c.name == iq_cfg.name) {
                return Err(ConfigError::DuplicateIqName {
                    name: iq_cfg.name.clone(),
                });
            }
            queues.push(IssueQue::new(
                id,
                iq_cfg,
                config.num_phys_regs,
                config.replay_queue_size,
            )?);
        }

        let mut disp_table = vec![Vec::new(); OpClass::COUNT];
        let mut op_lat = [1u32; OpClass::COUNT];
        let mut op_pipelined = [false; OpClass::COUNT];
        for iq in &queues {
            for op in &iq.op_descs {
                let idx = op.op_class.index();
                op_lat[idx] = op.op_lat;
                op_pipelined[idx] = op.pipelined;
                disp_table[idx].push(iq.id());
            }
        }
        for op in OpClass::ALL {
            if disp_table[op.index()].is_empty() {
                warn!(target: "schedule", "no issue queue accepts op class {op}");
            }
        }

        let mut wake_matrix = vec![Vec::new(); queues.len()];
        if config.xbar_wakeup {
            for src in 0..queues.len() {
                for dst in 0..queues.len() {
                    wake_matrix[src].push(dst);
                }
            }
        } else {
            let find = |name: &str| queues.iter().find(|q| q.name() == name).map(IssueQue::id);
            for channel in &config.spec_wakeup_network {
                let Some(src) = find(&channel.src) else {
                    warn!(target: "schedule", "unknown wake-up source queue: {}", channel.src);
                    continue;
                };
                for dst_name in &channel.dsts {
                    let Some(dst) = find(dst_name) else {
                        warn!(target: "schedule", "unknown wake-up destination queue: {dst_name}");
                        continue;
                    };
                    debug!(
                        target: "schedule",
                        "wake-up channel: {} -> {dst_name}", channel.src
                    );
                    wake_matrix[src].push(dst);
                }
            }
        }

        Ok(Self {
            queues,
            disp_table,
            wake_matrix,
            op_lat,
            op_pipelined,
            scoreboards: Scoreboards::new(config.num_phys_regs),
            arb: RfArbiter::new(config.reg_cache_capacity),
            insts_to_fu: Vec::new(),
            events: EventQueue::new(),
            cycle: Cycles::ZERO,
            load_wake_adjust: config.load_wake_adjust,
            vec_ones_reg: config.vec_ones_reg,
            mem_dep: None,
            rng: StdRng::seed_from_u64(config.dispatch_seed),
        })
    }

    /// Install the external memory-dependence unit.
    pub fn set_mem_dep_unit(&mut self, unit: Box<dyn MemDepUnit>) {
        self.mem_dep = Some(unit);
    }

    // --- accessors ---

    #[must_use]
    pub fn cycle(&self) -> Cycles {
        self.cycle
    }

    #[must_use]
    pub fn num_iqs(&self) -> usize {
        self.queues.len()
    }

    #[must_use]
    pub fn iq(&self, id: usize) -> &IssueQue {
        &self.queues[id]
    }

    #[must_use]
    pub fn iq_by_name(&self, name: &str) -> Option<&IssueQue> {
        self.queues.iter().find(|q| q.name() == name)
    }

    #[must_use]
    pub fn op_latency(&self, inst: &InstPtr) -> u32 {
        self.op_lat[inst.op_class.index()]
    }

    /// Advertised latency corrected for the load wake-up adjustment.
    #[must_use]
    pub fn corrected_op_latency(&self, inst: &InstPtr) -> u32 {
        let mut lat = self.op_lat[inst.op_class.index()];
        if inst.is_load() {
            lat += self.load_wake_adjust;
        }
        lat
    }

    #[must_use]
    pub fn writeback_ready(&self, reg: u32) -> bool {
        self.scoreboards.writeback.get(reg)
    }

    #[must_use]
    pub fn bypass_ready(&self, reg: u32) -> bool {
        self.scoreboards.bypass.get(reg)
    }

    #[must_use]
    pub fn early_spec_ready(&self, reg: u32) -> bool {
        self.scoreboards.early_spec.get(reg)
    }

    /// Any queue with ready or replay work pending.
    #[must_use]
    pub fn has_ready_insts(&self) -> bool {
        self.queues.iter().any(IssueQue::has_ready_work)
    }

    /// No instruction resident anywhere.
    #[must_use]
    pub fn is_drained(&self) -> bool {
        self.queues.iter().all(IssueQue::is_drained)
    }

    /// Total resident instructions across all queues.
    #[must_use]
    pub fn iq_insts(&self) -> usize {
        self.queues.iter().map(IssueQue::inst_count).sum()
    }

    // --- dispatch ---

    /// True if some queue accepting `inst`'s op class can take it this
    /// cycle. Op classes no queue accepts report not-ready.
    #[must_use]
    pub fn ready(&self, inst: &InstPtr) -> bool {
        let iqs = &self.disp_table[inst.op_class.index()];
        let ready = iqs.iter().any(|&qi| self.queues[qi].ready());
        if !ready {
            trace!(target: "schedule", "no ready issue queue for {}", inst.op_class);
        }
        ready
    }

    /// True if every candidate queue is full.
    #[must_use]
    pub fn full(&self, inst: &InstPtr) -> bool {
        let iqs = &self.disp_table[inst.op_class.index()];
        iqs.iter().all(|&qi| self.queues[qi].full())
    }

    /// Flip all three scoreboards not-ready for `inst`'s destinations.
    /// Called once per producer at dispatch.
    pub fn add_producer(&mut self, inst: &InstPtr) {
        trace!(target: "schedule", "{inst} add producer");
        for dst in &inst.dsts {
            if dst.fixed_mapping || Some(dst.flat_index) == self.vec_ones_reg {
                continue;
            }
            self.scoreboards.writeback.clear(dst.flat_index);
            self.scoreboards.bypass.clear(dst.flat_index);
            self.scoreboards.early_spec.clear(dst.flat_index);
            trace!(target: "schedule", "p{} marked not ready", dst.flat_index);
        }
    }

    /// Place a dispatched instruction into one candidate queue.
    ///
    /// Integer op classes load-balance by per-class residency; others
    /// take a random permutation. The caller must have checked
    /// `ready()` — failing to place is a caller-contract violation.
    pub fn insert(&mut self, inst: &InstPtr) {
        inst.set_in_iq();
        let mut candidates = self.disp_table[inst.op_class.index()].clone();
        assert!(!candidates.is_empty(), "{inst}: no issue queue accepts {}", inst.op_class);

        if inst.op_class.is_integer() {
            // Stable sort: ties keep dispatch-table order.
            candidates.sort_by_key(|&qi| self.queues[qi].op_count(inst.op_class));
        } else {
            candidates.shuffle(&mut self.rng);
        }

        for qi in candidates {
            if !self.queues[qi].ready() {
                continue;
            }
            self.queues[qi].insert(inst, &self.scoreboards);
            if inst.is_mem_ref() {
                match self.mem_dep.as_mut() {
                    Some(unit) => unit.insert(inst),
                    None => self.queues[qi].mark_mem_dep_done(inst),
                }
            }
            debug!(target: "schedule", "{inst} dispatched to {}", self.queues[qi].name());
            return;
        }
        panic!("{inst} dispatched with no ready issue queue");
    }

    /// Registration-only path for non-speculative instructions: records
    /// queue residence and memory-dependence tracking without entering
    /// the ready path.
    pub fn insert_non_spec(&mut self, inst: &InstPtr) {
        inst.set_in_iq();
        let candidates = &self.disp_table[inst.op_class.index()];
        for &qi in candidates {
            if !self.queues[qi].ready() {
                continue;
            }
            inst.set_iq_id(qi);
            debug!(target: "schedule", "{inst} registered non-speculative in {}", self.queues[qi].name());
            if inst.is_mem_ref() {
                if let Some(unit) = self.mem_dep.as_mut() {
                    unit.insert_non_spec(inst);
                }
            }
            return;
        }
    }

    // --- per-cycle stages ---

    /// Advance one cycle: deliver due speculative wake-ups, then per
    /// queue run bookkeeping, promote last cycle's select winners into
    /// the delay pipelines (firing speculative wake-ups), and advance
    /// the pipelines.
    pub fn tick(&mut self) {
        self.cycle += Cycles::ONE;

        // Wake-ups land before anything else so this cycle's select
        // stage observes them.
        while let Some(ev) = self.events.pop_due(self.cycle) {
            self.queues[ev.to].wake_up_dependents(&ev.inst, true);
        }

        for q in &mut self.queues {
            q.begin_tick();
        }
        for qi in 0..self.queues.len() {
            self.schedule_insts(qi);
        }
        for q in &mut self.queues {
            q.advance();
        }
    }

    /// Drain delay-pipeline heads into the FU pool, then run selection
    /// and resolve read-port arbitration.
    pub fn issue_and_select(&mut self) {
        // Every queue issues before any queue selects.
        for qi in 0..self.queues.len() {
            self.issue_to_fu(qi);
        }
        for q in &mut self.queues {
            q.select_inst(&mut self.arb);
        }
        self.arb.finish_cycle();
    }

    /// Resolve one queue's select stage: drop canceled winners, retry
    /// arbitration losers, and push the rest into the delay pipeline
    /// with their issue port, firing speculative wake-ups.
    fn schedule_insts(&mut self, qi: usize) {
        let select_q = std::mem::take(&mut self.queues[qi].select_q);
        for (pi, inst) in select_q {
            if inst.canceled() {
                debug!(target: "schedule", "[sn:{}] canceled at schedule", inst.seq_num);
            } else if inst.arb_failed() {
                debug!(target: "schedule", "[sn:{}] arbitration failed, retry", inst.seq_num);
                self.queues[qi].stats.arb_failed.inc();
                assert!(inst.ready_to_issue());
                inst.set_in_ready_q();
                self.queues[qi].push_ready(&inst);
            } else {
                debug!(target: "schedule", "[sn:{}] scheduled on {}.{pi}", inst.seq_num, self.queues[qi].name());
                self.queues[qi].stats.port_issued[pi].inc();
                inst.clear_in_iq();
                inst.set_issue_port(pi);
                self.queues[qi].pipeline.to_issue_mut().push(inst.clone());
                self.spec_wake_up_dependents(&inst, qi);
            }
            inst.clear_arb_failed();
        }
    }

    /// Fire the speculative wake-up fan-out for a scheduled producer.
    ///
    /// The wake delay is the corrected latency minus one, adjusted for
    /// the delay-depth mismatch between producer and consumer queues so
    /// the consumer's select stage sees the wake in the cycle its own
    /// pipeline would have the data. Zero-delay wakes land immediately
    /// and publish early-spec readiness.
    fn spec_wake_up_dependents(&mut self, inst: &InstPtr, from_qi: usize) {
        if !self.op_pipelined[inst.op_class.index()]
            || inst.dsts.is_empty()
            || (inst.is_vector && inst.is_load())
        {
            return;
        }

        let from_stages = self.queues[from_qi].issue_stages();
        for i in 0..self.wake_matrix[from_qi].len() {
            let to = self.wake_matrix[from_qi][i];
            let oplat = self.corrected_op_latency(inst);
            assert!(oplat < 64, "implausible op latency {oplat}");
            let mut wake_delay = oplat - 1;
            let to_stages = self.queues[to].issue_stages();
            let diff = from_stages.abs_diff(to_stages) as u32;
            if from_stages > to_stages {
                wake_delay += diff;
            } else if wake_delay >= diff {
                wake_delay -= diff;
            }

            if wake_delay == 0 {
                debug!(
                    target: "schedule",
                    "[sn:{}] wake-up {} -> {} now",
                    inst.seq_num,
                    self.queues[from_qi].name(),
                    self.queues[to].name()
                );
                self.queues[to].wake_up_dependents(inst, true);
                for dst in &inst.dsts {
                    if dst.fixed_mapping {
                        continue;
                    }
                    self.scoreboards.early_spec.set(dst.flat_index);
                }
            } else {
                let fire_at = self.cycle.delayed_by(wake_delay);
                debug!(
                    target: "schedule",
                    "[sn:{}] wake-up {} -> {} at {fire_at}",
                    inst.seq_num,
                    self.queues[from_qi].name(),
                    self.queues[to].name()
                );
                self.events.schedule(
                    fire_at,
                    SpecWakeup {
                        inst: inst.clone(),
                        to,
                    },
                );
            }
        }
    }

    /// Drain one queue's delay-pipeline head into the FU pool.
    fn issue_to_fu(&mut self, qi: usize) {
        let mut issued = 0usize;
        while !self.queues[qi].pipeline.to_fu_mut().is_empty() {
            let Some(inst) = self.queues[qi].pipeline.to_fu_mut().pop() else {
                continue; // scrubbed slot
            };
            let Some(port) = inst.issue_port() else {
                panic!("{inst} reached the FU stage without an issue port");
            };
            if self.queues[qi].port_busy(port) > 0 {
                debug!(target: "schedule", "port {port} busy, retry [sn:{}]", inst.seq_num);
                self.queues[qi].stats.port_busy[port].inc();
                inst.set_in_ready_q();
                self.queues[qi].push_ready(&inst);
                continue;
            }
            if !self.check_scoreboard(&inst) {
                continue;
            }
            self.issue_inst(qi, &inst);
            issued += 1;
            if !self.op_pipelined[inst.op_class.index()] {
                // Hold the port for the FU's full occupancy.
                let busy = u64::from(self.op_lat[inst.op_class.index()].saturating_sub(1));
                self.queues[qi].set_port_busy(port, busy);
            }
        }

        while issued < self.queues[qi].outports() {
            let Some(replay) = self.queues[qi].replay_q.pop_front() else {
                break;
            };
            debug!(target: "schedule", "{replay} replayed to FU pool");
            self.insts_to_fu.push(replay);
            issued += 1;
        }

        if issued > 0 {
            self.queues[qi].stats.issue_dist.inc(issued);
        }
    }

    /// Verify bypass readiness at the FU input. A missing bypass value
    /// must come from a load that missed; cancel its consumers and
    /// reject the instruction.
    fn check_scoreboard(&mut self, inst: &InstPtr) -> bool {
        for (i, src) in inst.srcs.iter().enumerate() {
            if src.fixed_mapping || self.scoreboards.bypass.get(src.flat_index) {
                continue;
            }
            let producer = self.inst_by_dst_reg(src.flat_index);
            let Some(producer) = producer else {
                panic!("{inst}: no producer found for unbypassed p{}", src.flat_index);
            };
            assert!(
                producer.is_load(),
                "{inst}: unbypassed source p{} produced by non-load {producer}",
                src.flat_index
            );
            debug!(
                target: "schedule",
                "[sn:{}] src{i} p{} missing from bypass, canceling {producer}",
                inst.seq_num, src.flat_index
            );
            self.load_cancel(&producer);
            return false;
        }
        true
    }

    /// Hand an instruction to the FU pool and release its queue entry.
    fn issue_inst(&mut self, qi: usize, inst: &InstPtr) {
        assert!(!inst.is_issued(), "{inst} has already been issued");
        inst.set_issued();
        debug!(target: "schedule", "{inst} issued to FU pool");
        self.insts_to_fu.push(inst.clone());
        self.queues[qi].pop_counters(inst);
    }

    /// Pop the next issued instruction for FU intake.
    pub fn pop_inst_to_fu(&mut self) -> Option<InstPtr> {
        self.insts_to_fu.pop()
    }

    // --- writeback and bypass ---

    /// The producer's value is on the forwarding network: release its
    /// issue port and publish bypass readiness.
    pub fn bypass_writeback(&mut self, inst: &InstPtr) {
        if let (Some(qi), Some(port)) = (inst.iq_id(), inst.issue_port()) {
            self.queues[qi].clear_busy(port);
        }
        debug!(target: "schedule", "{inst} bypass write");
        for dst in &inst.dsts {
            if dst.fixed_mapping {
                continue;
            }
            self.scoreboards.bypass.set(dst.flat_index);
            trace!(target: "schedule", "p{} ready on bypass network", dst.flat_index);
        }
    }

    /// The producer's value reached the register file: the
    /// authoritative wake-up.
    pub fn writeback_wakeup(&mut self, inst: &InstPtr) {
        debug!(target: "schedule", "{inst} written back");
        inst.set_written_back();
        for dst in &inst.dsts {
            if dst.fixed_mapping {
                continue;
            }
            self.scoreboards.writeback.set(dst.flat_index);
        }
        for q in &mut self.queues {
            q.wake_up_dependents(inst, false);
        }
    }

    // --- load cancel ---

    /// A producing load missed after its speculative wake-up: walk the
    /// speculative dependency chain, revoking readiness and canceling
    /// transitively, then scrub every delay pipeline.
    pub fn load_cancel(&mut self, inst: &InstPtr) {
        if inst.canceled() {
            return;
        }
        debug!(target: "schedule", "{inst} load miss at {}, canceling consumers", self.cycle);
        inst.set_cancel();
        if let Some(qi) = inst.iq_id() {
            self.queues[qi].stats.load_miss.inc();
        }

        let mut dfs = vec![inst.clone()];
        while let Some(top) = dfs.pop() {
            for dst in &top.dsts {
                if dst.fixed_mapping {
                    continue;
                }
                self.scoreboards.early_spec.clear(dst.flat_index);
                for qi in 0..self.queues.len() {
                    let mut canceled = Vec::new();
                    for (src_idx, consumer) in self.queues[qi].dep_graph.consumers(dst.flat_index) {
                        if !consumer.ready_src(*src_idx) {
                            continue;
                        }
                        // The broadcast all-ones register never reflects
                        // a real producer; do not traverse through it.
                        if Some(consumer.srcs[*src_idx].flat_index) == self.vec_ones_reg {
                            continue;
                        }
                        assert!(!consumer.is_issued());
                        trace!(
                            target: "schedule",
                            "cancel [sn:{}], revoke src p{}",
                            consumer.seq_num,
                            consumer.srcs[*src_idx].flat_index
                        );
                        consumer.set_cancel();
                        consumer.clear_src_ready(*src_idx);
                        canceled.push(consumer.clone());
                    }
                    self.queues[qi].stats.canceled_inst.add(canceled.len() as u64);
                    dfs.extend(canceled);
                }
            }
        }

        for q in &mut self.queues {
            q.pipeline.scrub(|i| i.canceled());
        }
    }

    // --- memory interface ---

    /// The memory-dependence layer cleared `inst` for issue.
    pub fn mark_mem_dep_done(&mut self, inst: &InstPtr) {
        let Some(qi) = inst.iq_id() else {
            panic!("{inst} is not resident in any issue queue");
        };
        self.queues[qi].mark_mem_dep_done(inst);
    }

    /// Queue a rejected memory instruction for replay.
    pub fn retry_mem(&mut self, inst: &InstPtr) {
        let Some(qi) = inst.iq_id() else {
            panic!("{inst} is not resident in any issue queue");
        };
        self.queues[qi].retry_mem(inst);
    }

    /// Find the resident producer of a physical register. Linear scan;
    /// used only during cancel diagnostics.
    #[must_use]
    pub fn inst_by_dst_reg(&self, flat_index: u32) -> Option<InstPtr> {
        self.queues.iter().find_map(|q| q.find_by_dst_reg(flat_index))
    }

    // --- commit and squash ---

    /// Retire the prefix with `seq_num <= seq` in every queue.
    pub fn do_commit(&mut self, seq: u64) {
        for q in &mut self.queues {
            q.do_commit(seq);
        }
    }

    /// Remove every instruction younger than `seq` from every queue.
    /// Pending wake-up events for squashed producers become no-ops.
    pub fn do_squash(&mut self, seq: u64) {
        debug!(target: "schedule", "squash everything younger than [sn:{seq}] at {}", self.cycle);
        for q in &mut self.queues {
            q.do_squash(seq);
        }
    }
}
