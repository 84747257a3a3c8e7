// SPDX-License-Identifier: MIT OR Apache-2.0
//! Save and restore of graph runtime state.
//!
//! A [`RuntimeSnapshot`] records every node's lifecycle state, epoch and memory,
//! keyed by node ID. Restoring into an instance of the same template brings
//! suspended nodes back to `Active` without running any behavior or emitting
//! any signal. Entries that no longer match the graph are skipped with a warning.

use crate::epoch::{EpochId, EpochStatus};
use crate::graph::Graph;
use crate::node::{ExecutionError, NodeId, NodeRuntime, NodeState, PropertyMap};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Current snapshot format version
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// Saved runtime state of one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    /// Node type at save time
    pub node_type: String,
    /// Lifecycle state
    pub state: NodeState,
    /// Driving epoch
    pub epoch: Option<EpochId>,
    /// Node memory
    pub memory: PropertyMap,
    /// Recorded failure
    pub error: Option<ExecutionError>,
}

/// Saved runtime state of a graph instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeSnapshot {
    /// Format version
    pub version: u32,
    /// Name of the graph the state came from
    pub graph_name: String,
    /// Per-node state
    pub nodes: IndexMap<NodeId, NodeSnapshot>,
}

/// A snapshot entry that did not line up with the graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotMismatch {
    /// Saved node no longer exists in the graph
    UnknownNode(NodeId),
    /// Graph node has no saved entry; left inactive
    MissingEntry(NodeId),
    /// Saved node has a different type now
    TypeChanged {
        /// Node
        node: NodeId,
        /// Type in the snapshot
        saved: String,
        /// Type in the graph
        current: String,
    },
}

impl std::fmt::Display for SnapshotMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownNode(id) => write!(f, "snapshot entry for unknown node {id}"),
            Self::MissingEntry(id) => write!(f, "no snapshot entry for node {id}"),
            Self::TypeChanged {
                node,
                saved,
                current,
            } => write!(f, "node {node} changed type from `{saved}` to `{current}`"),
        }
    }
}

/// Result of a restore
#[derive(Debug, Clone, Default)]
pub struct RestoreReport {
    /// Nodes whose state was restored
    pub restored: Vec<NodeId>,
    /// Entries skipped or left at defaults
    pub warnings: Vec<SnapshotMismatch>,
}

/// Snapshot encoding error
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// Binary encoding failed
    #[error("Binary snapshot error: {0}")]
    Bincode(#[from] bincode::Error),

    /// RON encoding failed
    #[error("RON snapshot error: {0}")]
    Ron(String),

    /// Unsupported format version
    #[error("Unsupported snapshot version {found} (expected {expected})")]
    Version {
        /// Version in the data
        found: u32,
        /// Supported version
        expected: u32,
    },
}

impl RuntimeSnapshot {
    /// Capture the runtime state of every node
    pub fn capture(graph: &Graph) -> Self {
        let nodes = graph
            .nodes()
            .map(|node| {
                (
                    node.id,
                    NodeSnapshot {
                        node_type: node.node_type.clone(),
                        state: node.runtime.state,
                        epoch: node.runtime.epoch,
                        memory: node.runtime.memory.clone(),
                        error: node.runtime.error.clone(),
                    },
                )
            })
            .collect();
        Self {
            version: SNAPSHOT_FORMAT_VERSION,
            graph_name: graph.name.clone(),
            nodes,
        }
    }

    /// Nodes that were suspended at save time
    pub fn active_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .filter(|(_, n)| n.state == NodeState::Active)
            .map(|(id, _)| *id)
    }

    /// Epochs referenced by saved nodes
    pub fn epochs(&self) -> BTreeSet<EpochId> {
        self.nodes.values().filter_map(|n| n.epoch).collect()
    }

    /// Apply this snapshot to a graph instance.
    ///
    /// The graph's runtime is reset first. No behavior runs and no signal is
    /// emitted. Transient states are normalized: `Activating` and
    /// `Deactivating` cannot be resumed and come back as `Inactive`.
    pub fn restore(&self, graph: &mut Graph) -> RestoreReport {
        graph.reset_runtime();
        let mut report = RestoreReport::default();

        for (id, saved) in &self.nodes {
            let Some(node) = graph.node_mut(*id) else {
                report.warnings.push(SnapshotMismatch::UnknownNode(*id));
                continue;
            };
            if node.node_type != saved.node_type {
                report.warnings.push(SnapshotMismatch::TypeChanged {
                    node: *id,
                    saved: saved.node_type.clone(),
                    current: node.node_type.clone(),
                });
                continue;
            }

            let state = match saved.state {
                NodeState::Activating | NodeState::Deactivating => NodeState::Inactive,
                state => state,
            };
            node.runtime = NodeRuntime {
                state,
                epoch: if state == NodeState::Active { saved.epoch } else { None },
                memory: saved.memory.clone(),
                error: saved.error.clone(),
            };
            report.restored.push(*id);
        }

        let missing: Vec<NodeId> = graph
            .node_ids()
            .filter(|id| !self.nodes.contains_key(id))
            .collect();
        report
            .warnings
            .extend(missing.into_iter().map(SnapshotMismatch::MissingEntry));

        let epochs: BTreeSet<EpochId> = graph
            .nodes()
            .filter(|n| n.state() == NodeState::Active)
            .filter_map(|n| n.runtime.epoch)
            .collect();
        for epoch in epochs {
            graph.epochs_mut().adopt(epoch, EpochStatus::Suspended);
        }

        for warning in &report.warnings {
            tracing::warn!(graph = %graph.name, %warning, "snapshot mismatch");
        }
        tracing::info!(
            graph = %graph.name,
            restored = report.restored.len(),
            warnings = report.warnings.len(),
            "runtime state restored"
        );
        report
    }

    /// Encode as compact binary
    pub fn to_bytes(&self) -> Result<Vec<u8>, SnapshotError> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode from compact binary
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SnapshotError> {
        let snapshot: Self = bincode::deserialize(bytes)?;
        snapshot.check_version()
    }

    /// Encode as readable RON
    pub fn to_ron(&self) -> Result<String, SnapshotError> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| SnapshotError::Ron(e.to_string()))
    }

    /// Decode from RON
    pub fn from_ron(source: &str) -> Result<Self, SnapshotError> {
        let snapshot: Self =
            ron::from_str(source).map_err(|e| SnapshotError::Ron(e.to_string()))?;
        snapshot.check_version()
    }

    fn check_version(self) -> Result<Self, SnapshotError> {
        if self.version != SNAPSHOT_FORMAT_VERSION {
            return Err(SnapshotError::Version {
                found: self.version,
                expected: SNAPSHOT_FORMAT_VERSION,
            });
        }
        Ok(self)
    }
}
