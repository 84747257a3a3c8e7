// SPDX-License-Identifier: MIT OR Apache-2.0
//! Host error type.

use flowsolo_graph::{EngineError, GraphError, SnapshotError};
use std::path::PathBuf;

/// Errors surfaced by the host
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// Filesystem error
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// Config file could not be parsed or written
    #[error("Config error: {0}")]
    Config(String),

    /// Config written by a newer host
    #[error("Config version {found} is newer than supported version {supported}")]
    ConfigVersion {
        /// Version in the file
        found: u32,
        /// Highest supported version
        supported: u32,
    },

    /// Graph template error
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// Snapshot encoding error
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    /// Engine rejected a host call
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Start trigger names a node that is not in the graph
    #[error("Start node `{0}` not found in graph")]
    UnknownStartNode(String),

    /// Graph failed validation against the node library
    #[error("Graph is invalid:\n{0}")]
    Invalid(String),

    /// JSON output error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HostError {
    /// Wrap an I/O error with the path it happened on
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for host operations
pub type Result<T> = std::result::Result<T, HostError>;
