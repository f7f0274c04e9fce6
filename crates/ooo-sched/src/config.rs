//! Scheduler configuration.
//!
//! A scheduler topology is plain data: a list of issue queues, each with
//! out-ports binding functional units and register-file read ports, plus
//! the speculative wake-up network between queues. Everything here
//! round-trips through serde; validation happens in `Scheduler::new`, not
//! in deserialization.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::OpClass;

/// Out-ports per issue queue are capped by the select fabric.
pub const MAX_OUT_PORTS: usize = 8;
/// `type_port_id` is a 6-bit encoding: `[5:4]` register-file type,
/// `[3:0]` port id.
pub const MAX_TYPE_PORT_ID: usize = 64;
/// Read-port priorities occupy two bits.
pub const MAX_PRIORITY: u8 = 3;

/// Register-file kind a read port belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegFileType {
    Int,
    Fp,
}

/// One register-file read port binding on an issue port.
///
/// The n-th descriptor of a type serves the n-th source operand of that
/// type's register class (point-to-point with the source index).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadPortDesc {
    pub reg_type: RegFileType,
    /// Port id within the register file, `0..=15`.
    pub port_id: u8,
    /// Arbitration priority, `0..=3`; higher wins.
    pub priority: u8,
}

impl ReadPortDesc {
    /// Flat `(type << 4) | port` key into the occupancy table.
    #[must_use]
    pub fn type_port_id(&self) -> usize {
        let type_id = match self.reg_type {
            RegFileType::Int => 0usize,
            RegFileType::Fp => 1,
        };
        (type_id << 4) | usize::from(self.port_id)
    }
}

/// One op class a functional unit executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpDesc {
    pub op_class: OpClass,
    /// Execution latency in cycles.
    #[serde(default = "default_op_lat")]
    pub op_lat: u32,
    /// Pipelined FUs accept a new instruction every cycle; non-pipelined
    /// ones hold their issue port busy for the full latency.
    #[serde(default = "default_true")]
    pub pipelined: bool,
}

/// A functional unit: the set of op classes it executes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuDesc {
    pub ops: Vec<OpDesc>,
}

/// One issue-queue out-port: the FUs behind it and the read ports its
/// selected instruction may claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuePortConfig {
    pub fus: Vec<FuDesc>,
    #[serde(default)]
    pub read_ports: Vec<ReadPortDesc>,
}

/// One issue queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueQueConfig {
    pub name: String,
    /// Entry capacity.
    pub size: usize,
    /// Insert bandwidth per cycle.
    pub inports: usize,
    /// Delay-pipeline depth between select and the FU input.
    pub schedule_to_exec_delay: usize,
    pub out_ports: Vec<IssuePortConfig>,
}

/// One speculative wake-up channel: selections in `src` wake consumers
/// in each queue of `dsts`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WakeupChannel {
    pub src: String,
    pub dsts: Vec<String>,
}

/// Complete scheduler topology and tuning knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub iqs: Vec<IssueQueConfig>,
    #[serde(default)]
    pub spec_wakeup_network: Vec<WakeupChannel>,
    /// Full crossbar wake-up; `spec_wakeup_network` is ignored when set.
    #[serde(default)]
    pub xbar_wakeup: bool,
    #[serde(default = "default_num_phys_regs")]
    pub num_phys_regs: usize,
    /// Added to a load's advertised latency when computing wake delay.
    /// Empirical; the default reproduces the modelled machine.
    #[serde(default = "default_load_wake_adjust")]
    pub load_wake_adjust: u32,
    /// Integer register-cache capacity; repeat reads hit for free.
    #[serde(default = "default_reg_cache_capacity")]
    pub reg_cache_capacity: usize,
    /// Memory-replay queue bound per issue queue.
    #[serde(default = "default_replay_queue_size")]
    pub replay_queue_size: usize,
    /// Seed for the non-integer dispatch shuffle, so runs replay.
    #[serde(default)]
    pub dispatch_seed: u64,
    /// Flat index of the broadcast all-ones vector register. It never
    /// reflects a real producer; cancellation must not traverse it.
    #[serde(default)]
    pub vec_ones_reg: Option<u32>,
}

fn default_op_lat() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

fn default_num_phys_regs() -> usize {
    256
}

fn default_load_wake_adjust() -> u32 {
    2
}

fn default_reg_cache_capacity() -> usize {
    24
}

fn default_replay_queue_size() -> usize {
    32
}

/// Fatal configuration errors, reported at construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{iq}: op class {op} appears under non-identical FUs")]
    DuplicateOpClass { iq: String, op: OpClass },

    #[error("{iq}: no FU op descriptors configured")]
    EmptyIssueQue { iq: String },

    #[error("{iq}: {outports} out-ports configured, max is {MAX_OUT_PORTS}")]
    TooManyOutPorts { iq: String, outports: usize },

    #[error("{iq}: read port id {port_id} / priority {priority} out of range")]
    ReadPortOutOfRange { iq: String, port_id: u8, priority: u8 },

    #[error("duplicate issue queue name: {name}")]
    DuplicateIqName { name: String },

    #[error("{iq}: schedule-to-exec delay must be at least one stage")]
    ZeroScheduleDelay { iq: String },
}

impl SchedulerConfig {
    /// A one-queue starter topology, mostly for tests and examples.
    #[must_use]
    pub fn single_iq(name: &str, size: usize, ops: Vec<OpDesc>) -> Self {
        Self {
            iqs: vec![IssueQueConfig {
                name: name.to_string(),
                size,
                inports: 4,
                schedule_to_exec_delay: 1,
                out_ports: vec![IssuePortConfig {
                    fus: vec![FuDesc { ops }],
                    read_ports: Vec::new(),
                }],
            }],
            spec_wakeup_network: Vec::new(),
            xbar_wakeup: true,
            num_phys_regs: default_num_phys_regs(),
            load_wake_adjust: default_load_wake_adjust(),
            reg_cache_capacity: default_reg_cache_capacity(),
            replay_queue_size: default_replay_queue_size(),
            dispatch_seed: 0,
            vec_ones_reg: None,
        }
    }
}
