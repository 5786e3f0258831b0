//! Gossip neighbors and per-neighbor knowledge

use epidemic_core::{NodeId, Value};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// Neighbor set changes caused by an install
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologyChange {
    /// Neighbors not present before
    pub added: Vec<NodeId>,
    /// Neighbors no longer present
    pub removed: Vec<NodeId>,
}

impl TopologyChange {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

struct TopologyState<V> {
    /// Current gossip neighbors, in installed order
    neighbors: Vec<NodeId>,
    /// Values each tracked neighbor is believed to hold
    knowledge: HashMap<NodeId, HashSet<V>>,
}

/// This node's gossip neighbors and what we believe each of them knows
///
/// Knowledge only grows: it is extended when a push is acknowledged and is
/// kept for neighbors dropped by a later install.
pub struct TopologyTable<V = Value> {
    state: RwLock<TopologyState<V>>,
}

impl<V> TopologyTable<V>
where
    V: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            state: RwLock::new(TopologyState {
                neighbors: Vec::new(),
                knowledge: HashMap::new(),
            }),
        }
    }

    /// Replace the neighbor set
    ///
    /// Neighbors seen for the first time start with empty knowledge; known
    /// neighbors keep theirs. Duplicate entries are ignored.
    pub fn install(&self, neighbors: impl IntoIterator<Item = NodeId>) -> TopologyChange {
        let mut seen = HashSet::new();
        let neighbors: Vec<NodeId> = neighbors
            .into_iter()
            .filter(|n| seen.insert(n.clone()))
            .collect();

        let mut state = self.state.write();
        let change = TopologyChange {
            added: neighbors
                .iter()
                .filter(|n| !state.neighbors.contains(n))
                .cloned()
                .collect(),
            removed: state
                .neighbors
                .iter()
                .filter(|n| !seen.contains(*n))
                .cloned()
                .collect(),
        };

        for neighbor in &neighbors {
            state.knowledge.entry(neighbor.clone()).or_default();
        }
        state.neighbors = neighbors;

        change
    }

    /// Current neighbors
    pub fn neighbors(&self) -> Vec<NodeId> {
        self.state.read().neighbors.clone()
    }

    /// Candidates the neighbor is not known to hold
    ///
    /// For a neighbor that was never installed, that is every candidate.
    pub fn delta(&self, neighbor: &NodeId, candidates: impl IntoIterator<Item = V>) -> Vec<V> {
        let state = self.state.read();
        match state.knowledge.get(neighbor) {
            Some(known) => candidates
                .into_iter()
                .filter(|value| !known.contains(value))
                .collect(),
            None => candidates.into_iter().collect(),
        }
    }

    /// Record values as held by the neighbor; returns how many were new
    ///
    /// Only call this for values the neighbor acknowledged. Neighbors that
    /// were never installed are ignored.
    pub fn mark_known(&self, neighbor: &NodeId, values: &[V]) -> usize {
        let mut state = self.state.write();
        match state.knowledge.get_mut(neighbor) {
            Some(known) => values
                .iter()
                .filter(|value| known.insert((*value).clone()))
                .count(),
            None => 0,
        }
    }

    pub fn is_known(&self, neighbor: &NodeId, value: &V) -> bool {
        self.state
            .read()
            .knowledge
            .get(neighbor)
            .map(|known| known.contains(value))
            .unwrap_or(false)
    }

    /// Values the neighbor is believed to hold
    pub fn knowledge(&self, neighbor: &NodeId) -> Vec<V> {
        self.state
            .read()
            .knowledge
            .get(neighbor)
            .map(|known| known.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn knowledge_len(&self, neighbor: &NodeId) -> usize {
        self.state
            .read()
            .knowledge
            .get(neighbor)
            .map(HashSet::len)
            .unwrap_or(0)
    }

    /// Get topology stats
    pub fn stats(&self) -> TopologyStats {
        let state = self.state.read();
        TopologyStats {
            neighbors: state.neighbors.len(),
            tracked: state.knowledge.len(),
        }
    }
}

impl<V> Default for TopologyTable<V>
where
    V: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Topology statistics
#[derive(Debug, Clone)]
pub struct TopologyStats {
    pub neighbors: usize,
    /// Neighbors with knowledge on record, current or past
    pub tracked: usize,
}
