//! Memory-dependence interface.
//!
//! Memory ordering lives outside the scheduler. Memory refs are handed to
//! this unit at dispatch; the unit calls back into the scheduler
//! (`mark_mem_dep_done`) once ordering is resolved. With no unit
//! installed, memory refs resolve immediately at insert.

use crate::InstPtr;

/// External memory-dependence tracker.
pub trait MemDepUnit {
    /// A speculatively dispatched memory ref entered an issue queue.
    fn insert(&mut self, inst: &InstPtr);

    /// A non-speculative memory ref was registered (it will not issue
    /// until the surrounding pipeline releases it).
    fn insert_non_spec(&mut self, inst: &InstPtr);
}
