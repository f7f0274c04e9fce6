//! Dynamic instruction model.
//!
//! The scheduler sees an instruction only as a sequence number, an op
//! class, renamed source/destination registers, and a set of status bits.
//! One instruction is referenced from several queue structures at once
//! (resident list, ready queue, select stage, delay pipeline, dependency
//! graph), so instructions are shared by handle. The simulation is
//! single-threaded and every mutable field is a small `Copy` value, so all
//! mutable state is interior `Cell`s; a wake-up routed from an issue queue
//! back to itself never aliases a borrow.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use bitflags::bitflags;

use crate::OpClass;

/// Register-file class of a physical register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegClass {
    Int,
    Float,
    Vec,
}

/// A renamed physical register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysRegId {
    pub class: RegClass,
    /// Flat index into the unified physical register space.
    pub flat_index: u32,
    /// Hard-wired register (zero register); never tracked by scoreboards
    /// or the dependency graph.
    pub fixed_mapping: bool,
    /// Writes still pending before the register holds its final value.
    /// Wake-up only fires for destinations with exactly one remaining.
    pub pinned_writes: u8,
}

impl PhysRegId {
    #[must_use]
    pub const fn int(flat_index: u32) -> Self {
        Self {
            class: RegClass::Int,
            flat_index,
            fixed_mapping: false,
            pinned_writes: 1,
        }
    }

    #[must_use]
    pub const fn float(flat_index: u32) -> Self {
        Self {
            class: RegClass::Float,
            flat_index,
            fixed_mapping: false,
            pinned_writes: 1,
        }
    }

    #[must_use]
    pub const fn vec(flat_index: u32) -> Self {
        Self {
            class: RegClass::Vec,
            flat_index,
            fixed_mapping: false,
            pinned_writes: 1,
        }
    }

    /// The same register with the hard-wired flag set.
    #[must_use]
    pub const fn fixed(mut self) -> Self {
        self.fixed_mapping = true;
        self
    }
}

bitflags! {
    /// Instruction status bits, mirroring the scheduler state machine.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct InstStatus: u16 {
        /// Resident in an issue queue.
        const IN_IQ = 1;
        /// Present in a ready queue.
        const IN_READY_Q = 1 << 1;
        /// Handed to the FU pool (or scheduled for delivery).
        const ISSUED = 1 << 2;
        /// Speculative readiness revoked; dropped lazily from queues.
        const CANCELED = 1 << 3;
        /// Removed by a pipeline squash. Terminal.
        const SQUASHED = 1 << 4;
        /// Lost read-port arbitration this cycle; retried next cycle.
        const ARB_FAILED = 1 << 5;
        /// Memory ordering dependence resolved.
        const MEM_DEP_DONE = 1 << 6;
        /// Result retired to the register file.
        const WRITTEN_BACK = 1 << 7;
        /// Eligible for commit (set on squash so the ROB can retire it).
        const CAN_COMMIT = 1 << 8;
    }
}

/// Shared instruction handle.
pub type InstPtr = Rc<DynInst>;

/// A renamed, in-flight instruction as the scheduler sees it.
pub struct DynInst {
    /// Monotonically increasing age id; lower is older.
    pub seq_num: u64,
    pub op_class: OpClass,
    pub srcs: Vec<PhysRegId>,
    pub dsts: Vec<PhysRegId>,
    /// Must not issue until the surrounding pipeline releases it.
    pub is_non_spec: bool,
    /// Vector operation. Independent of the op class: a vector load is a
    /// `MemRead` carrying this flag, and is exempt from speculative
    /// wake-up. Defaults on for `VecAlu`; set via [`DynInst::vector`]
    /// for memory refs.
    pub is_vector: bool,

    /// Per-source ready bits.
    ready_srcs: Cell<u32>,
    /// Bits for the sources that must become ready (non-fixed ones).
    required_srcs: u32,
    status: Cell<InstStatus>,
    /// Issue queue currently holding the instruction.
    iq_id: Cell<Option<usize>>,
    /// Out-port the instruction was selected on; `None` until selected.
    issue_port: Cell<Option<usize>>,
}

impl DynInst {
    #[must_use]
    pub fn new(seq_num: u64, op_class: OpClass, srcs: Vec<PhysRegId>, dsts: Vec<PhysRegId>) -> Self {
        assert!(srcs.len() <= 32, "[sn:{seq_num}] too many sources");
        let mut required = 0u32;
        for (i, src) in srcs.iter().enumerate() {
            if !src.fixed_mapping {
                required |= 1 << i;
            }
        }
        Self {
            seq_num,
            op_class,
            srcs,
            dsts,
            is_non_spec: false,
            is_vector: matches!(op_class, OpClass::VecAlu),
            ready_srcs: Cell::new(0),
            required_srcs: required,
            status: Cell::new(InstStatus::empty()),
            iq_id: Cell::new(None),
            issue_port: Cell::new(None),
        }
    }

    /// The same instruction marked as a vector operation. This is how a
    /// vector load is built: `MemRead` plus this flag.
    #[must_use]
    pub fn vector(mut self) -> Self {
        self.is_vector = true;
        self
    }

    #[must_use]
    pub fn into_ptr(self) -> InstPtr {
        Rc::new(self)
    }

    #[must_use]
    pub fn is_load(&self) -> bool {
        self.op_class == OpClass::MemRead
    }

    #[must_use]
    pub fn is_store(&self) -> bool {
        self.op_class == OpClass::MemWrite
    }

    #[must_use]
    pub fn is_mem_ref(&self) -> bool {
        self.op_class.is_mem()
    }

    // --- source readiness ---

    #[must_use]
    pub fn ready_src(&self, idx: usize) -> bool {
        self.ready_srcs.get() & (1 << idx) != 0
    }

    pub fn mark_src_ready(&self, idx: usize) {
        self.ready_srcs.set(self.ready_srcs.get() | (1 << idx));
    }

    pub fn clear_src_ready(&self, idx: usize) {
        self.ready_srcs.set(self.ready_srcs.get() & !(1 << idx));
    }

    /// All non-fixed sources ready.
    #[must_use]
    pub fn ready_to_issue(&self) -> bool {
        self.ready_srcs.get() & self.required_srcs == self.required_srcs
    }

    // --- status bits ---

    fn has(&self, s: InstStatus) -> bool {
        self.status.get().contains(s)
    }

    fn set(&self, s: InstStatus) {
        self.status.set(self.status.get() | s);
    }

    fn clear(&self, s: InstStatus) {
        self.status.set(self.status.get() - s);
    }

    #[must_use]
    pub fn in_iq(&self) -> bool {
        self.has(InstStatus::IN_IQ)
    }
    pub fn set_in_iq(&self) {
        self.set(InstStatus::IN_IQ);
    }
    pub fn clear_in_iq(&self) {
        self.clear(InstStatus::IN_IQ);
    }

    #[must_use]
    pub fn in_ready_q(&self) -> bool {
        self.has(InstStatus::IN_READY_Q)
    }
    pub fn set_in_ready_q(&self) {
        self.set(InstStatus::IN_READY_Q);
    }
    pub fn clear_in_ready_q(&self) {
        self.clear(InstStatus::IN_READY_Q);
    }

    #[must_use]
    pub fn is_issued(&self) -> bool {
        self.has(InstStatus::ISSUED)
    }
    pub fn set_issued(&self) {
        self.set(InstStatus::ISSUED);
    }

    #[must_use]
    pub fn canceled(&self) -> bool {
        self.has(InstStatus::CANCELED)
    }
    pub fn set_cancel(&self) {
        self.set(InstStatus::CANCELED);
    }
    pub fn clear_cancel(&self) {
        self.clear(InstStatus::CANCELED);
    }

    #[must_use]
    pub fn is_squashed(&self) -> bool {
        self.has(InstStatus::SQUASHED)
    }
    pub fn set_squashed(&self) {
        self.set(InstStatus::SQUASHED);
    }

    #[must_use]
    pub fn arb_failed(&self) -> bool {
        self.has(InstStatus::ARB_FAILED)
    }
    pub fn set_arb_failed(&self) {
        self.set(InstStatus::ARB_FAILED);
    }
    pub fn clear_arb_failed(&self) {
        self.clear(InstStatus::ARB_FAILED);
    }

    #[must_use]
    pub fn mem_dep_done(&self) -> bool {
        self.has(InstStatus::MEM_DEP_DONE)
    }
    pub fn set_mem_dep_done(&self) {
        self.set(InstStatus::MEM_DEP_DONE);
    }

    #[must_use]
    pub fn written_back(&self) -> bool {
        self.has(InstStatus::WRITTEN_BACK)
    }
    pub fn set_written_back(&self) {
        self.set(InstStatus::WRITTEN_BACK);
    }

    #[must_use]
    pub fn can_commit(&self) -> bool {
        self.has(InstStatus::CAN_COMMIT)
    }
    pub fn set_can_commit(&self) {
        self.set(InstStatus::CAN_COMMIT);
    }

    // --- placement ---

    #[must_use]
    pub fn iq_id(&self) -> Option<usize> {
        self.iq_id.get()
    }
    pub fn set_iq_id(&self, id: usize) {
        self.iq_id.set(Some(id));
    }

    #[must_use]
    pub fn issue_port(&self) -> Option<usize> {
        self.issue_port.get()
    }
    pub fn set_issue_port(&self, port: usize) {
        self.issue_port.set(Some(port));
    }
}

impl fmt::Display for DynInst {
    /// Disassembly-style rendering: `[sn:7] IntAlu p12 <- p3, p4`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[sn:{}] {}", self.seq_num, self.op_class)?;
        for (i, d) in self.dsts.iter().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            write!(f, "{sep}p{}", d.flat_index)?;
        }
        if !self.srcs.is_empty() {
            write!(f, " <-")?;
            for (i, s) in self.srcs.iter().enumerate() {
                let sep = if i == 0 { " " } else { ", " };
                write!(f, "{sep}p{}", s.flat_index)?;
            }
        }
        Ok(())
    }
}
