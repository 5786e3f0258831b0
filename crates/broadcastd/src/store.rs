//! In-memory message store

use epidemic_core::Value;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::hash::Hash;

/// Grow-only set of every value this node has accepted
///
/// Values arrive from clients (`broadcast`) and from peers (`sync`); nothing
/// is ever removed.
pub struct MessageStore<V = Value> {
    values: RwLock<HashSet<V>>,
}

impl<V> MessageStore<V>
where
    V: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            values: RwLock::new(HashSet::new()),
        }
    }

    /// Insert a value; returns whether it was new
    pub fn add(&self, value: V) -> bool {
        self.values.write().insert(value)
    }

    /// Insert a batch under one lock; returns how many were new
    pub fn add_all(&self, values: impl IntoIterator<Item = V>) -> usize {
        let mut stored = self.values.write();
        values
            .into_iter()
            .filter(|value| stored.insert(value.clone()))
            .count()
    }

    /// Point-in-time copy of every stored value, in no particular order
    pub fn snapshot(&self) -> Vec<V> {
        self.values.read().iter().cloned().collect()
    }

    pub fn contains(&self, value: &V) -> bool {
        self.values.read().contains(value)
    }

    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

impl<V> Default for MessageStore<V>
where
    V: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
