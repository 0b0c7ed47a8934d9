//! Media node pool.
//!
//! Liveness uses two-strike eviction: every heartbeat marks a node alive,
//! every sweep demotes alive nodes to not-alive and removes nodes that were
//! already not-alive. A node that misses one sweep is kept but never picked;
//! a node that misses two consecutive sweeps is forgotten.
//!
//! The pool is owned by the group registry loop and is not synchronized.

use super::MediaNode;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct NodeEntry {
    node: MediaNode,
    alive: bool,
}

/// Outcome of one sweep, ids sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub marked_stale: Vec<String>,
    pub evicted: Vec<String>,
}

#[derive(Debug, Default)]
pub struct NodePool {
    nodes: HashMap<String, NodeEntry>,
    /// Ids of alive nodes; uniform draws index into this.
    alive: Vec<String>,
}

impl NodePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert the descriptor and mark the node alive.
    ///
    /// Returns `true` if the node was not known before.
    pub fn record_heartbeat(&mut self, node: MediaNode) -> bool {
        let id = node.id.clone();
        match self.nodes.get_mut(&id) {
            Some(entry) => {
                entry.node = node;
                if !entry.alive {
                    entry.alive = true;
                    self.alive.push(id);
                }
                false
            }
            None => {
                self.nodes.insert(id.clone(), NodeEntry { node, alive: true });
                self.alive.push(id);
                true
            }
        }
    }

    pub fn sweep(&mut self) -> SweepReport {
        let mut report = SweepReport::default();

        self.nodes.retain(|id, entry| {
            if entry.alive {
                entry.alive = false;
                report.marked_stale.push(id.clone());
                true
            } else {
                report.evicted.push(id.clone());
                false
            }
        });
        self.alive.clear();

        report.marked_stale.sort();
        report.evicted.sort();
        report
    }

    /// Preferred node if known and alive, else a uniformly random alive node.
    pub fn pick_node(&self, preferred: Option<&str>) -> Option<MediaNode> {
        self.pick_node_with(preferred, &mut rand::thread_rng())
    }

    pub fn pick_node_with<R: Rng + ?Sized>(
        &self,
        preferred: Option<&str>,
        rng: &mut R,
    ) -> Option<MediaNode> {
        if let Some(id) = preferred.filter(|id| self.is_alive(id)) {
            return self.nodes.get(id).map(|entry| entry.node.clone());
        }

        self.alive
            .choose(rng)
            .and_then(|id| self.nodes.get(id))
            .map(|entry| entry.node.clone())
    }

    /// Whether `node_id` is known and heartbeated since the last sweep.
    pub fn is_alive(&self, node_id: &str) -> bool {
        self.nodes.get(node_id).is_some_and(|entry| entry.alive)
    }

    /// Number of known nodes, alive or not.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn alive_count(&self) -> usize {
        self.alive.len()
    }
}
