//! Reverse wake-up edges.
//!
//! For every physical register with an in-flight producer, the graph
//! lists the consumers waiting on it as `(source index, instruction)`
//! pairs — a vector-indexed adjacency list, not pointer cycles. Edges
//! are cleared on the authoritative (writeback) wake-up and scrubbed
//! lazily when consumers are squashed.

use crate::InstPtr;

/// Per-register consumer lists, indexed by flat register index.
pub struct DepGraph {
    edges: Vec<Vec<(usize, InstPtr)>>,
}

impl DepGraph {
    #[must_use]
    pub fn new(num_phys_regs: usize) -> Self {
        let mut edges = Vec::with_capacity(num_phys_regs);
        edges.resize_with(num_phys_regs, Vec::new);
        Self { edges }
    }

    /// Record that `consumer`'s source `src_idx` waits on `reg`.
    pub fn add(&mut self, reg: u32, src_idx: usize, consumer: InstPtr) {
        self.edges[reg as usize].push((src_idx, consumer));
    }

    /// Consumers currently waiting on `reg`.
    #[must_use]
    pub fn consumers(&self, reg: u32) -> &[(usize, InstPtr)] {
        &self.edges[reg as usize]
    }

    /// Drop every edge for `reg` (authoritative wake-up delivered).
    pub fn clear(&mut self, reg: u32) {
        self.edges[reg as usize].clear();
    }

    /// Drop edges whose consumer matches `pred` (squash scrub).
    pub fn scrub(&mut self, pred: impl Fn(&InstPtr) -> bool) {
        for list in &mut self.edges {
            list.retain(|(_, consumer)| !pred(consumer));
        }
    }

    /// Total edge count (inspection only).
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.iter().map(Vec::len).sum()
    }
}
