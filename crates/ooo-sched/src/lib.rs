//! Dynamic instruction scheduler for an out-of-order superscalar
//! pipeline model.
//!
//! Renamed instructions arrive from the front end, wait in distributed
//! issue queues until their operands are ready, arbitrate for FU
//! out-ports and register-file read ports, and travel a fixed delay
//! pipeline to execution. Speculative wake-up lets back-to-back
//! dependent instructions issue in adjacent cycles; a load discovered to
//! have missed cancels its speculative consumers transitively.
//!
//! The crate models scheduling only: fetch, rename, the ROB, FU
//! execution and the memory hierarchy are external collaborators driving
//! the [`Scheduler`] interface.

pub mod config;
pub mod dep_graph;
pub mod inst;
pub mod issue_queue;
pub mod mem_dep;
pub mod op_class;
pub mod reg_cache;
pub mod scheduler;
pub mod scoreboard;
pub mod time_buffer;

pub use config::{ConfigError, SchedulerConfig};
pub use inst::{DynInst, InstPtr, InstStatus, PhysRegId, RegClass};
pub use issue_queue::{IssueQue, IssueQueStats};
pub use mem_dep::MemDepUnit;
pub use op_class::OpClass;
pub use scheduler::Scheduler;
