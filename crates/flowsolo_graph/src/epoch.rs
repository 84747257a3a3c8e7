// SPDX-License-Identifier: MIT OR Apache-2.0
//! Trigger epochs: bookkeeping for one propagation pass and its suspended nodes.

use crate::node::NodeId;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Identifier of a trigger epoch, unique per graph instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EpochId(pub u64);

impl std::fmt::Display for EpochId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "epoch#{}", self.0)
    }
}

/// Lifecycle of an epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EpochStatus {
    /// Propagation in progress
    Running,
    /// Queue drained, some nodes still awaiting external completion
    Suspended,
    /// Queue drained, no node left active
    Completed,
    /// Cancelled by the host
    Cancelled,
}

impl EpochStatus {
    /// Whether the epoch can still make progress
    pub fn is_open(self) -> bool {
        matches!(self, Self::Running | Self::Suspended)
    }
}

/// State of one epoch
#[derive(Debug, Clone)]
pub struct EpochState {
    /// Epoch ID
    pub id: EpochId,
    /// Current status
    pub status: EpochStatus,
    /// Activations per node within this epoch
    visits: HashMap<NodeId, u32>,
    /// Signals delivered so far
    signals: usize,
}

impl EpochState {
    fn new(id: EpochId) -> Self {
        Self {
            id,
            status: EpochStatus::Running,
            visits: HashMap::new(),
            signals: 0,
        }
    }

    /// Record an activation of `node` and return how many it has had
    pub(crate) fn visit(&mut self, node: NodeId) -> u32 {
        let count = self.visits.entry(node).or_insert(0);
        *count += 1;
        *count
    }

    /// Activations of `node` so far
    pub fn visits(&self, node: NodeId) -> u32 {
        self.visits.get(&node).copied().unwrap_or(0)
    }

    /// Count one delivered signal and return the running total
    pub(crate) fn count_signal(&mut self) -> usize {
        self.signals += 1;
        self.signals
    }

    /// Signals delivered so far
    pub fn signal_count(&self) -> usize {
        self.signals
    }
}

/// Epochs of one graph instance
#[derive(Debug, Clone, Default)]
pub struct EpochTable {
    next: u64,
    epochs: IndexMap<EpochId, EpochState>,
}

impl EpochTable {
    /// Open a new running epoch
    pub(crate) fn open(&mut self) -> EpochId {
        self.next += 1;
        let id = EpochId(self.next);
        self.epochs.insert(id, EpochState::new(id));
        id
    }

    /// Re-create an epoch known from a snapshot
    pub(crate) fn adopt(&mut self, id: EpochId, status: EpochStatus) {
        self.next = self.next.max(id.0);
        self.epochs
            .entry(id)
            .or_insert_with(|| EpochState::new(id))
            .status = status;
    }

    /// Look up an epoch
    pub fn get(&self, id: EpochId) -> Option<&EpochState> {
        self.epochs.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: EpochId) -> Option<&mut EpochState> {
        self.epochs.get_mut(&id)
    }

    /// All epochs in creation order
    pub fn iter(&self) -> impl Iterator<Item = &EpochState> {
        self.epochs.values()
    }

    /// Epochs still running or suspended
    pub fn open_epochs(&self) -> impl Iterator<Item = EpochId> + '_ {
        self.epochs
            .values()
            .filter(|e| e.status.is_open())
            .map(|e| e.id)
    }

    /// Drop finished and cancelled epochs
    pub fn prune(&mut self) {
        self.epochs.retain(|_, e| e.status.is_open());
    }

    /// Forget every epoch
    pub(crate) fn clear(&mut self) {
        self.next = 0;
        self.epochs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_increase() {
        let mut table = EpochTable::default();
        let a = table.open();
        let b = table.open();
        assert!(b > a);
        assert_eq!(table.open_epochs().count(), 2);
    }

    #[test]
    fn test_adopt_keeps_ids_unique() {
        let mut table = EpochTable::default();
        table.adopt(EpochId(7), EpochStatus::Suspended);
        let next = table.open();
        assert_eq!(next, EpochId(8));
    }

    #[test]
    fn test_prune_keeps_open_epochs() {
        let mut table = EpochTable::default();
        let a = table.open();
        let b = table.open();
        table.get_mut(a).unwrap().status = EpochStatus::Completed;
        table.prune();
        assert!(table.get(a).is_none());
        assert!(table.get(b).is_some());
    }

    #[test]
    fn test_visit_counts() {
        let mut table = EpochTable::default();
        let id = table.open();
        let node = NodeId::new();
        let epoch = table.get_mut(id).unwrap();
        assert_eq!(epoch.visit(node), 1);
        assert_eq!(epoch.visit(node), 2);
        assert_eq!(epoch.visits(node), 2);
    }
}
