//! Core types for cycle-accurate scheduler simulation.
//!
//! Everything advances one logical cycle per tick. Future work is expressed
//! as events on a monotonic event queue, drained at cycle boundaries.

mod cycles;
mod events;
mod stats;

pub use cycles::Cycles;
pub use events::EventQueue;
pub use stats::{Average, Counter, Distribution};
