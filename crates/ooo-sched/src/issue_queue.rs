//! Issue queue.
//!
//! A scheduling window holding renamed instructions until their operands
//! are ready and an FU out-port is free. Each cycle the queue selects at
//! most one ready instruction per out-port (oldest first), holds winners
//! in a select stage pending read-port arbitration, then feeds them down
//! a fixed delay pipeline to the FU input.
//!
//! ```text
//!          insert into queue
//!                 |
//!                 v
//!         speculative wake-up <--------+
//!                 |                    |
//!                 v                    |
//!        select / arbitrate      ------+
//!                 |                    |
//!                 v                    |
//!        delay (N stages)        wake or cancel
//!                 |                    |
//!                 v                    |
//!        issue: bypass check           |
//!                 |                    |
//!                 v                    |
//!              execute ----------------+
//! ```

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};

use tracing::{debug, trace};

use sched_core::{Average, Counter, Distribution};

use crate::config::{ConfigError, IssueQueConfig, OpDesc, RegFileType, MAX_OUT_PORTS, MAX_PRIORITY};
use crate::dep_graph::DepGraph;
use crate::scheduler::RfArbiter;
use crate::scoreboard::Scoreboards;
use crate::time_buffer::TimeBuffer;
use crate::{InstPtr, OpClass, RegClass};

/// Heap entry ordering the ready queue oldest-first.
struct ReadyEntry(InstPtr);

impl PartialEq for ReadyEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.seq_num == other.0.seq_num
    }
}

impl Eq for ReadyEntry {}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: invert so the smallest (oldest) seq_num is on top.
        other.0.seq_num.cmp(&self.0.seq_num)
    }
}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Age-ordered queue of instructions whose operands are all ready.
#[derive(Default)]
struct ReadyQue {
    heap: BinaryHeap<ReadyEntry>,
}

impl ReadyQue {
    fn push(&mut self, inst: InstPtr) {
        self.heap.push(ReadyEntry(inst));
    }

    fn peek(&self) -> Option<&InstPtr> {
        self.heap.peek().map(|e| &e.0)
    }

    fn pop(&mut self) -> Option<InstPtr> {
        self.heap.pop().map(|e| e.0)
    }

    fn len(&self) -> usize {
        self.heap.len()
    }

    fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

/// Per-queue telemetry. Counter names are part of the test surface.
pub struct IssueQueStats {
    /// Load/store retries through the replay queue.
    pub retry_mem: Counter,
    /// Instructions canceled by load-miss propagation.
    pub canceled_inst: Counter,
    /// Load misses discovered at this queue's instructions.
    pub load_miss: Counter,
    /// Read-port arbitration losses.
    pub arb_failed: Counter,
    /// Distribution of inserts per cycle.
    pub insert_dist: Distribution,
    /// Distribution of issues per cycle.
    pub issue_dist: Distribution,
    /// Issues per out-port.
    pub port_issued: Vec<Counter>,
    /// Busy-port retries per out-port.
    pub port_busy: Vec<Counter>,
    /// Average resident instructions, sampled per tick.
    pub avg_insts: Average,
}

impl IssueQueStats {
    fn new(inports: usize, outports: usize) -> Self {
        Self {
            retry_mem: Counter::default(),
            canceled_inst: Counter::default(),
            load_miss: Counter::default(),
            arb_failed: Counter::default(),
            insert_dist: Distribution::new(inports + 1),
            issue_dist: Distribution::new(outports + 1),
            port_issued: vec![Counter::default(); outports],
            port_busy: vec![Counter::default(); outports],
            avg_insts: Average::default(),
        }
    }
}

/// A distributed scheduling window with its own select fabric, delay
/// pipeline and wake-up graph.
impl std::fmt::Debug for IssueQue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssueQue")
            .field("name", &self.name)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

pub struct IssueQue {
    name: String,
    id: usize,
    size: usize,
    inports: usize,
    outports: usize,
    replay_q_size: usize,

    /// Op descriptors behind this queue's ports; the scheduler builds
    /// its dispatch and latency tables from these.
    pub(crate) op_descs: Vec<OpDesc>,
    /// Per-port integer read-port claims, point-to-point with the
    /// source-operand index.
    int_read_ports: Vec<Vec<(usize, u8)>>,
    /// Per-port floating-point read-port claims.
    fp_read_ports: Vec<Vec<(usize, u8)>>,

    ready_qs: Vec<ReadyQue>,
    /// Out-port to ready-queue mapping; all ports share one queue when
    /// every port carries an identical op-class mask.
    ready_q_of_port: Vec<usize>,
    /// Op class to ready-queue mapping.
    ready_q_classify: [Option<usize>; OpClass::COUNT],

    /// Winners of the last select, pending arbitration resolution.
    pub(crate) select_q: Vec<(usize, InstPtr)>,
    pub(crate) pipeline: TimeBuffer,
    /// Age-ordered resident instructions (kept through issue for
    /// commit/squash accounting).
    inst_list: VecDeque<InstPtr>,
    /// Memory instructions awaiting retry.
    pub(crate) replay_q: VecDeque<InstPtr>,
    pub(crate) dep_graph: DepGraph,

    /// Countdown per out-port while a non-pipelined FU occupies it.
    port_busy: Vec<u64>,
    op_count: [u64; OpClass::COUNT],
    inst_count: usize,
    inserted_this_cycle: usize,

    pub stats: IssueQueStats,
}

impl IssueQue {
    pub(crate) fn new(
        id: usize,
        cfg: &IssueQueConfig,
        num_phys_regs: usize,
        replay_q_size: usize,
    ) -> Result<Self, ConfigError> {
        let name = cfg.name.clone();
        let outports = cfg.out_ports.len();
        if outports > MAX_OUT_PORTS {
            return Err(ConfigError::TooManyOutPorts { iq: name, outports });
        }
        if cfg.schedule_to_exec_delay == 0 {
            return Err(ConfigError::ZeroScheduleDelay { iq: name });
        }

        let mut int_read_ports = vec![Vec::new(); outports];
        let mut fp_read_ports = vec![Vec::new(); outports];
        let mut masks = vec![0u64; outports];
        for (pi, port) in cfg.out_ports.iter().enumerate() {
            for rp in &port.read_ports {
                if rp.port_id > 15 || rp.priority > MAX_PRIORITY {
                    return Err(ConfigError::ReadPortOutOfRange {
                        iq: name,
                        port_id: rp.port_id,
                        priority: rp.priority,
                    });
                }
                match rp.reg_type {
                    RegFileType::Int => int_read_ports[pi].push((rp.type_port_id(), rp.priority)),
                    RegFileType::Fp => fp_read_ports[pi].push((rp.type_port_id(), rp.priority)),
                }
            }
            for fu in &port.fus {
                for op in &fu.ops {
                    masks[pi] |= 1 << op.op_class.index();
                }
            }
        }

        if masks.iter().all(|&m| m == 0) {
            return Err(ConfigError::EmptyIssueQue { iq: name });
        }

        let same_fu = masks.windows(2).all(|w| w[0] == w[1]);
        if !same_fu {
            // An op class reachable through two differently-shaped ports
            // has no unique ready queue to live in.
            for i in 0..outports {
                for j in (i + 1)..outports {
                    let overlap = masks[i] & masks[j];
                    if overlap != 0 {
                        let op = OpClass::ALL[overlap.trailing_zeros() as usize];
                        return Err(ConfigError::DuplicateOpClass { iq: name, op });
                    }
                }
            }
        } else if outports > 1 {
            debug!(
                target: "schedule",
                "{name}: one selector feeds {outports} identical FU ports"
            );
        }

        let ready_q_of_port: Vec<usize> = (0..outports).map(|pi| if same_fu { 0 } else { pi }).collect();
        let num_ready_qs = if same_fu { 1 } else { outports };
        let mut ready_qs = Vec::with_capacity(num_ready_qs);
        ready_qs.resize_with(num_ready_qs, ReadyQue::default);

        let mut ready_q_classify = [None; OpClass::COUNT];
        let mut op_descs = Vec::new();
        for pi in 0..(if same_fu { 1 } else { outports }) {
            for fu in &cfg.out_ports[pi].fus {
                for op in &fu.ops {
                    let slot = &mut ready_q_classify[op.op_class.index()];
                    if slot.is_some() {
                        return Err(ConfigError::DuplicateOpClass {
                            iq: name,
                            op: op.op_class,
                        });
                    }
                    *slot = Some(ready_q_of_port[pi]);
                    op_descs.push(*op);
                }
            }
        }

        let stats = IssueQueStats::new(cfg.inports, outports);
        Ok(Self {
            name,
            id,
            size: cfg.size,
            inports: cfg.inports,
            outports,
            replay_q_size,
            op_descs,
            int_read_ports,
            fp_read_ports,
            ready_qs,
            ready_q_of_port,
            ready_q_classify,
            select_q: Vec::new(),
            pipeline: TimeBuffer::new(cfg.schedule_to_exec_delay),
            inst_list: VecDeque::new(),
            replay_q: VecDeque::new(),
            dep_graph: DepGraph::new(num_phys_regs),
            port_busy: vec![0; outports],
            op_count: [0; OpClass::COUNT],
            inst_count: 0,
            inserted_this_cycle: 0,
            stats,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn id(&self) -> usize {
        self.id
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.size
    }

    #[must_use]
    pub fn outports(&self) -> usize {
        self.outports
    }

    /// Delay-pipeline depth between select and the FU input.
    #[must_use]
    pub fn issue_stages(&self) -> usize {
        self.pipeline.delay()
    }

    #[must_use]
    pub fn inst_count(&self) -> usize {
        self.inst_count
    }

    #[must_use]
    pub fn empty_entries(&self) -> usize {
        self.size - self.inst_count
    }

    #[must_use]
    pub fn op_count(&self, op: OpClass) -> u64 {
        self.op_count[op.index()]
    }

    /// Busy countdown for an out-port.
    #[must_use]
    pub fn port_busy(&self, port: usize) -> u64 {
        self.port_busy[port]
    }

    /// Release an out-port's busy countdown (producer reached bypass).
    pub fn clear_busy(&mut self, port: usize) {
        self.port_busy[port] = 0;
    }

    /// Can accept an insert this cycle: a free entry and spare input
    /// bandwidth.
    #[must_use]
    pub fn ready(&self) -> bool {
        if self.inserted_this_cycle >= self.inports {
            trace!(target: "schedule", "{}: inports exhausted this cycle", self.name);
            return false;
        }
        !self.full()
    }

    #[must_use]
    pub fn full(&self) -> bool {
        self.inserted_this_cycle + self.inst_count >= self.size
            || self.replay_q.len() > self.replay_q_size
    }

    /// Ready or replay work pending.
    #[must_use]
    pub fn has_ready_work(&self) -> bool {
        self.ready_qs.iter().any(|q| !q.is_empty()) || !self.replay_q.is_empty()
    }

    #[must_use]
    pub fn is_drained(&self) -> bool {
        self.inst_list.is_empty()
    }

    /// Sequence numbers of resident instructions, oldest first
    /// (inspection only).
    #[must_use]
    pub fn resident_seq_nums(&self) -> Vec<u64> {
        self.inst_list.iter().map(|i| i.seq_num).collect()
    }

    /// Live instructions in the delay pipeline (inspection only).
    #[must_use]
    pub fn pipeline_insts(&self) -> Vec<InstPtr> {
        self.pipeline.iter().cloned().collect()
    }

    /// Wake-up edges currently recorded for `reg` (inspection only).
    #[must_use]
    pub fn dep_edges(&self, reg: u32) -> usize {
        self.dep_graph.consumers(reg).len()
    }

    /// Total wake-up edge count (inspection only).
    #[must_use]
    pub fn dep_edge_count(&self) -> usize {
        self.dep_graph.edge_count()
    }

    /// Instructions currently queued ready (inspection only).
    #[must_use]
    pub fn ready_count(&self) -> usize {
        self.ready_qs.iter().map(ReadyQue::len).sum()
    }

    /// Resident instruction producing `reg`, if any.
    #[must_use]
    pub fn find_by_dst_reg(&self, reg: u32) -> Option<InstPtr> {
        self.inst_list
            .iter()
            .find(|inst| inst.dsts.iter().any(|d| d.flat_index == reg))
            .cloned()
    }

    pub(crate) fn set_port_busy(&mut self, port: usize, countdown: u64) {
        self.port_busy[port] = countdown;
    }

    // --- insert and wake-up ---

    /// Place a dispatched instruction in this queue. The caller must
    /// have checked `ready()`; memory refs are registered with the
    /// memory-dependence layer by the scheduler afterwards.
    pub(crate) fn insert(&mut self, inst: &InstPtr, boards: &Scoreboards) {
        if inst.op_class != OpClass::FmaMul {
            assert!(
                self.inst_count < self.size,
                "{}: {inst} inserted into a full queue",
                self.name
            );
            self.op_count[inst.op_class.index()] += 1;
            self.inst_count += 1;
            self.inserted_this_cycle += 1;
        }

        debug!(target: "schedule", "{inst} insert into {}", self.name);
        inst.set_iq_id(self.id);
        self.inst_list.push_back(inst.clone());

        let mut in_dep_graph = false;
        for (i, src) in inst.srcs.iter().enumerate() {
            if inst.ready_src(i) || src.fixed_mapping {
                continue;
            }
            if boards.writeback.get(src.flat_index) {
                inst.mark_src_ready(i);
            } else {
                if boards.early_spec.get(src.flat_index) {
                    // Value promised by a pending speculative wake-up.
                    inst.mark_src_ready(i);
                }
                trace!(
                    target: "schedule",
                    "[sn:{}] src p{} added to dep graph", inst.seq_num, src.flat_index
                );
                self.dep_graph.add(src.flat_index, i, inst.clone());
                in_dep_graph = true;
            }
        }

        if !in_dep_graph {
            assert!(inst.ready_to_issue());
        }

        if !inst.is_mem_ref() {
            self.add_if_ready(inst);
        }
    }

    /// Wake consumers of `inst`'s destinations. Speculative wake-ups are
    /// advisory (and skipped for canceled producers); the writeback
    /// wake-up is authoritative and clears the edges it serviced.
    pub(crate) fn wake_up_dependents(&mut self, inst: &InstPtr, speculative: bool) {
        if speculative && inst.canceled() {
            return;
        }
        for dst in &inst.dsts {
            if dst.fixed_mapping || dst.pinned_writes != 1 {
                continue;
            }
            debug!(
                target: "schedule",
                "{}: p{} woken ({}) by [sn:{}]",
                self.name,
                dst.flat_index,
                if speculative { "spec" } else { "wb" },
                inst.seq_num
            );

            let mut woken = Vec::new();
            for (src_idx, consumer) in self.dep_graph.consumers(dst.flat_index) {
                if consumer.ready_src(*src_idx) {
                    continue;
                }
                consumer.mark_src_ready(*src_idx);
                trace!(target: "schedule", "[sn:{}] src{} woken", consumer.seq_num, src_idx);
                woken.push(consumer.clone());
            }
            for consumer in &woken {
                self.add_if_ready(consumer);
            }

            if !speculative {
                self.dep_graph.clear(dst.flat_index);
            }
        }
    }

    /// Queue `inst` for selection if every operand and ordering
    /// constraint is satisfied.
    pub(crate) fn add_if_ready(&mut self, inst: &InstPtr) {
        if !inst.ready_to_issue() {
            return;
        }
        if inst.is_mem_ref() && !inst.mem_dep_done() {
            trace!(target: "schedule", "[sn:{}] memory dependence unresolved", inst.seq_num);
            return;
        }
        trace!(target: "schedule", "[sn:{}] added to ready queue", inst.seq_num);
        inst.clear_cancel();
        if !inst.in_ready_q() {
            inst.set_in_ready_q();
            self.push_ready(inst);
        }
    }

    /// Raw ready-queue push, used by retry paths that bypass readiness
    /// re-checks.
    pub(crate) fn push_ready(&mut self, inst: &InstPtr) {
        let Some(q) = self.ready_q_classify[inst.op_class.index()] else {
            panic!("{}: no ready queue routes {}", self.name, inst.op_class);
        };
        self.ready_qs[q].push(inst.clone());
    }

    // --- per-cycle stages ---

    /// Start-of-tick bookkeeping: stats sampling and port-busy countdown.
    pub(crate) fn begin_tick(&mut self) {
        self.stats.avg_insts.sample(self.inst_count as u64);
        if self.inserted_this_cycle > 0 {
            self.stats.insert_dist.inc(self.inserted_this_cycle);
        }
        self.inserted_this_cycle = 0;

        for busy in &mut self.port_busy {
            *busy = busy.saturating_sub(1);
        }
    }

    pub(crate) fn advance(&mut self) {
        self.pipeline.advance();
    }

    /// Pick one ready instruction per out-port (oldest first) and claim
    /// its register-file read ports. Winners park in the select stage
    /// until next cycle's schedule step resolves arbitration.
    pub(crate) fn select_inst(&mut self, arb: &mut RfArbiter) {
        self.select_q.clear();
        for pi in 0..self.outports {
            let q = &mut self.ready_qs[self.ready_q_of_port[pi]];

            // Canceled entries are dropped lazily, here.
            while let Some(top) = q.peek() {
                if !top.canceled() {
                    break;
                }
                top.clear_in_ready_q();
                q.pop();
            }

            let Some(inst) = q.pop() else { continue };
            debug!(target: "schedule", "[sn:{}] selected on {}.{pi}", inst.seq_num, self.name);

            // Read ports are point-to-point with the source index.
            for (i, src) in inst.srcs.iter().enumerate() {
                let claim = match src.class {
                    RegClass::Int => self.int_read_ports[pi].get(i),
                    RegClass::Float => self.fp_read_ports[pi].get(i),
                    RegClass::Vec => None,
                };
                if let Some(&(type_port_id, priority)) = claim {
                    arb.use_port(&inst, *src, type_port_id, priority);
                }
            }

            inst.clear_in_ready_q();
            self.select_q.push((pi, inst));
        }
    }

    // --- replay and memory dependence ---

    /// Queue a memory instruction for retry after a structural or
    /// ordering reject downstream.
    pub(crate) fn retry_mem(&mut self, inst: &InstPtr) {
        assert!(!inst.is_non_spec);
        self.stats.retry_mem.inc();
        debug!(target: "schedule", "{inst} queued for memory retry");
        self.replay_q.push_back(inst.clone());
    }

    /// The memory-dependence layer cleared `inst` for issue.
    pub(crate) fn mark_mem_dep_done(&mut self, inst: &InstPtr) {
        assert!(inst.is_mem_ref());
        debug!(target: "schedule", "[sn:{}] memory dependence resolved", inst.seq_num);
        inst.set_mem_dep_done();
        self.add_if_ready(inst);
    }

    // --- commit and squash ---

    /// Retire the age-ordered prefix with `seq_num <= seq`.
    pub(crate) fn do_commit(&mut self, seq: u64) {
        while let Some(front) = self.inst_list.front() {
            if front.seq_num > seq {
                break;
            }
            assert!(front.is_issued(), "{front} committed before issue");
            self.inst_list.pop_front();
        }
    }

    /// Remove every instruction younger than `seq` from all structures.
    pub(crate) fn do_squash(&mut self, seq: u64) {
        let insts = std::mem::take(&mut self.inst_list);
        for inst in insts {
            if inst.seq_num <= seq {
                self.inst_list.push_back(inst);
                continue;
            }
            inst.set_squashed();
            inst.set_can_commit();
            inst.clear_in_iq();
            inst.set_cancel();
            if inst.is_issued() {
                if let Some(port) = inst.issue_port() {
                    self.port_busy[port] = 0;
                }
            } else {
                self.pop_counters(&inst);
                inst.set_issued();
            }
        }

        self.pipeline.scrub(|inst| inst.is_squashed());
        self.dep_graph.scrub(|inst| inst.is_squashed());
        self.replay_q.retain(|inst| !inst.is_squashed());
    }

    /// Release the entry accounting for an instruction leaving the
    /// window. The FMA multiply half never occupied an entry.
    pub(crate) fn pop_counters(&mut self, inst: &InstPtr) {
        if inst.op_class != OpClass::FmaMul {
            assert!(self.inst_count > 0);
            assert!(self.op_count[inst.op_class.index()] > 0);
            self.op_count[inst.op_class.index()] -= 1;
            self.inst_count -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FuDesc, IssuePortConfig, ReadPortDesc};
    use crate::{DynInst, PhysRegId};

    fn op(op_class: OpClass) -> OpDesc {
        OpDesc {
            op_class,
            op_lat: 1,
            pipelined: true,
        }
    }

    fn port(ops: Vec<OpDesc>) -> IssuePortConfig {
        IssuePortConfig {
            fus: vec![FuDesc { ops }],
            read_ports: Vec::new(),
        }
    }

    fn iq_config(name: &str, out_ports: Vec<IssuePortConfig>) -> IssueQueConfig {
        IssueQueConfig {
            name: name.to_string(),
            size: 8,
            inports: 4,
            schedule_to_exec_delay: 1,
            out_ports,
        }
    }

    fn make_iq(out_ports: Vec<IssuePortConfig>) -> IssueQue {
        IssueQue::new(0, &iq_config("test", out_ports), 64, 32).unwrap()
    }

    fn alu_inst(seq: u64, srcs: Vec<PhysRegId>, dst: u32) -> InstPtr {
        DynInst::new(seq, OpClass::IntAlu, srcs, vec![PhysRegId::int(dst)]).into_ptr()
    }

    #[test]
    fn rejects_too_many_outports() {
        let ports: Vec<_> = (0..9).map(|_| port(vec![op(OpClass::IntAlu)])).collect();
        // Identical masks would share a ready queue, but the port count
        // check fires first.
        let err = IssueQue::new(0, &iq_config("big", ports), 64, 32).unwrap_err();
        assert!(matches!(err, ConfigError::TooManyOutPorts { outports: 9, .. }));
    }

    #[test]
    fn rejects_empty_queue() {
        let err = IssueQue::new(0, &iq_config("empty", vec![]), 64, 32).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyIssueQue { .. }));
    }

    #[test]
    fn rejects_zero_delay() {
        let mut cfg = iq_config("alu", vec![port(vec![op(OpClass::IntAlu)])]);
        cfg.schedule_to_exec_delay = 0;
        let err = IssueQue::new(0, &cfg, 64, 32).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroScheduleDelay { .. }));
    }

    #[test]
    fn rejects_op_class_shared_across_different_ports() {
        let ports = vec![
            port(vec![op(OpClass::IntAlu), op(OpClass::IntMult)]),
            port(vec![op(OpClass::IntAlu)]),
        ];
        let err = IssueQue::new(0, &iq_config("mixed", ports), 64, 32).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::DuplicateOpClass {
                op: OpClass::IntAlu,
                ..
            }
        ));
    }

    #[test]
    fn rejects_duplicate_op_class_within_port() {
        let p = IssuePortConfig {
            fus: vec![
                FuDesc {
                    ops: vec![op(OpClass::IntAlu)],
                },
                FuDesc {
                    ops: vec![op(OpClass::IntAlu)],
                },
            ],
            read_ports: Vec::new(),
        };
        let err = IssueQue::new(0, &iq_config("dup", vec![p]), 64, 32).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateOpClass { .. }));
    }

    #[test]
    fn rejects_out_of_range_read_port() {
        let mut p = port(vec![op(OpClass::IntAlu)]);
        p.read_ports.push(ReadPortDesc {
            reg_type: RegFileType::Int,
            port_id: 16,
            priority: 0,
        });
        let err = IssueQue::new(0, &iq_config("rp", vec![p]), 64, 32).unwrap_err();
        assert!(matches!(err, ConfigError::ReadPortOutOfRange { port_id: 16, .. }));
    }

    #[test]
    fn identical_ports_share_one_ready_queue() {
        let iq = make_iq(vec![
            port(vec![op(OpClass::IntAlu)]),
            port(vec![op(OpClass::IntAlu)]),
        ]);
        assert_eq!(iq.ready_qs.len(), 1);
        assert_eq!(iq.ready_q_of_port, vec![0, 0]);
    }

    #[test]
    fn distinct_ports_get_distinct_ready_queues() {
        let iq = make_iq(vec![
            port(vec![op(OpClass::IntAlu)]),
            port(vec![op(OpClass::IntDiv)]),
        ]);
        assert_eq!(iq.ready_qs.len(), 2);
        assert_eq!(
            iq.ready_q_classify[OpClass::IntDiv.index()],
            Some(1)
        );
    }

    #[test]
    fn ready_queue_is_oldest_first() {
        let mut q = ReadyQue::default();
        q.push(alu_inst(5, vec![], 1));
        q.push(alu_inst(2, vec![], 2));
        q.push(alu_inst(9, vec![], 3));
        assert_eq!(q.pop().unwrap().seq_num, 2);
        assert_eq!(q.pop().unwrap().seq_num, 5);
        assert_eq!(q.pop().unwrap().seq_num, 9);
    }

    #[test]
    fn ready_tracks_remaining_capacity() {
        let mut cfg = iq_config("small", vec![port(vec![op(OpClass::IntAlu)])]);
        cfg.size = 2;
        let mut iq = IssueQue::new(0, &cfg, 64, 32).unwrap();
        let boards = Scoreboards::new(64);
        assert_eq!(iq.empty_entries(), 2);

        iq.insert(&alu_inst(1, vec![], 10), &boards);
        assert!(iq.ready());
        iq.insert(&alu_inst(2, vec![], 11), &boards);
        assert!(iq.full());
        assert!(!iq.ready());
        assert_eq!(iq.empty_entries(), 0);
    }

    #[test]
    fn insert_ready_operands_go_straight_to_ready_queue() {
        let mut iq = make_iq(vec![port(vec![op(OpClass::IntAlu)])]);
        let boards = Scoreboards::new(64);
        let inst = alu_inst(1, vec![PhysRegId::int(3)], 10);
        iq.insert(&inst, &boards);
        assert!(inst.ready_to_issue());
        assert!(inst.in_ready_q());
        assert_eq!(iq.ready_count(), 1);
        assert_eq!(iq.dep_edges(3), 0);
    }

    #[test]
    fn insert_pending_operand_lands_in_dep_graph() {
        let mut iq = make_iq(vec![port(vec![op(OpClass::IntAlu)])]);
        let mut boards = Scoreboards::new(64);
        boards.writeback.clear(3);
        boards.early_spec.clear(3);
        boards.bypass.clear(3);
        let inst = alu_inst(1, vec![PhysRegId::int(3)], 10);
        iq.insert(&inst, &boards);
        assert!(!inst.ready_to_issue());
        assert_eq!(iq.dep_edges(3), 1);
        assert_eq!(iq.ready_count(), 0);
    }

    #[test]
    fn early_spec_marks_ready_but_keeps_edge() {
        let mut iq = make_iq(vec![port(vec![op(OpClass::IntAlu)])]);
        let mut boards = Scoreboards::new(64);
        boards.writeback.clear(3);
        boards.bypass.clear(3);
        // early_spec left true: a speculative wake-up is in flight.
        let inst = alu_inst(1, vec![PhysRegId::int(3)], 10);
        iq.insert(&inst, &boards);
        assert!(inst.ready_to_issue());
        assert_eq!(iq.dep_edges(3), 1);
    }

    #[test]
    fn writeback_wakeup_clears_edges_spec_does_not() {
        let mut iq = make_iq(vec![port(vec![op(OpClass::IntAlu)])]);
        let mut boards = Scoreboards::new(64);
        boards.writeback.clear(3);
        boards.early_spec.clear(3);
        let producer = alu_inst(1, vec![], 3);
        let consumer = alu_inst(2, vec![PhysRegId::int(3)], 10);
        iq.insert(&consumer, &boards);

        iq.wake_up_dependents(&producer, true);
        assert!(consumer.ready_to_issue());
        assert_eq!(iq.dep_edges(3), 1);

        iq.wake_up_dependents(&producer, false);
        assert_eq!(iq.dep_edges(3), 0);
    }

    #[test]
    fn canceled_producer_spec_wake_is_a_no_op() {
        let mut iq = make_iq(vec![port(vec![op(OpClass::IntAlu)])]);
        let mut boards = Scoreboards::new(64);
        boards.writeback.clear(3);
        boards.early_spec.clear(3);
        let producer = alu_inst(1, vec![], 3);
        producer.set_cancel();
        let consumer = alu_inst(2, vec![PhysRegId::int(3)], 10);
        iq.insert(&consumer, &boards);

        iq.wake_up_dependents(&producer, true);
        assert!(!consumer.ready_to_issue());
    }

    #[test]
    fn mem_ref_waits_for_mem_dep() {
        let mut iq = make_iq(vec![port(vec![op(OpClass::MemRead)])]);
        let boards = Scoreboards::new(64);
        let load = DynInst::new(1, OpClass::MemRead, vec![PhysRegId::int(2)], vec![PhysRegId::int(9)])
            .into_ptr();
        iq.insert(&load, &boards);
        // Operands ready, but ordering not yet resolved.
        iq.add_if_ready(&load);
        assert_eq!(iq.ready_count(), 0);

        iq.mark_mem_dep_done(&load);
        assert_eq!(iq.ready_count(), 1);
    }

    #[test]
    fn fma_mul_is_exempt_from_entry_accounting() {
        let mut iq = make_iq(vec![port(vec![op(OpClass::FmaMul)])]);
        let boards = Scoreboards::new(64);
        let inst = DynInst::new(1, OpClass::FmaMul, vec![], vec![PhysRegId::float(4)]).into_ptr();
        iq.insert(&inst, &boards);
        assert_eq!(iq.inst_count(), 0);
        assert_eq!(iq.op_count(OpClass::FmaMul), 0);
        iq.pop_counters(&inst);
        assert_eq!(iq.inst_count(), 0);
    }

    #[test]
    fn commit_pops_issued_prefix() {
        let mut iq = make_iq(vec![port(vec![op(OpClass::IntAlu)])]);
        let boards = Scoreboards::new(64);
        for seq in 1..=3 {
            let inst = alu_inst(seq, vec![], 10 + u32::try_from(seq).unwrap());
            iq.insert(&inst, &boards);
            inst.set_issued();
        }
        iq.do_commit(2);
        assert_eq!(iq.resident_seq_nums(), vec![3]);
        // Idempotent.
        iq.do_commit(2);
        assert_eq!(iq.resident_seq_nums(), vec![3]);
    }

    #[test]
    fn squash_scrubs_every_structure() {
        let mut iq = make_iq(vec![port(vec![op(OpClass::IntAlu)])]);
        let mut boards = Scoreboards::new(64);
        boards.writeback.clear(3);
        boards.early_spec.clear(3);

        let old = alu_inst(10, vec![], 3);
        iq.insert(&old, &boards);
        old.set_issued();
        let young = alu_inst(11, vec![PhysRegId::int(3)], 20);
        iq.insert(&young, &boards);

        iq.do_squash(10);
        assert_eq!(iq.resident_seq_nums(), vec![10]);
        assert!(young.is_squashed());
        assert!(young.can_commit());
        assert_eq!(iq.dep_edges(3), 0);
        assert_eq!(iq.inst_count(), 1);
    }
}
