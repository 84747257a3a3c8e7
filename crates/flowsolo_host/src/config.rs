// SPDX-License-Identifier: MIT OR Apache-2.0
//! Host configuration.
//!
//! A single RON file tells the host:
//! - Which graph template to run, and as which kind
//! - Where and how runtime state is persisted
//! - Engine limits and the tick interval
//! - Which nodes to trigger at start
//! - How long simulated cinematics and workspots take

use crate::error::{HostError, Result};
use flowsolo_graph::{EngineConfig, GraphKind};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Current host config format version
pub const CONFIG_FORMAT_VERSION: u32 = 1;

/// Snapshot encoding on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SnapshotFormat {
    /// Compact bincode
    #[default]
    Binary,
    /// Readable RON
    Ron,
}

impl SnapshotFormat {
    /// Guess the format from a file extension
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(std::ffi::OsStr::to_str) {
            Some("ron") => Self::Ron,
            _ => Self::Binary,
        }
    }
}

/// Runtime state persistence
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotSettings {
    /// Snapshot file; persistence is off when unset
    pub path: Option<PathBuf>,
    /// Encoding
    pub format: SnapshotFormat,
    /// Restore from `path` at start when the file exists
    pub restore_on_start: bool,
    /// Save to `path` when the host stops
    pub save_on_exit: bool,
}

/// Node triggered when the host starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartTrigger {
    /// Node display name
    pub node: String,
    /// Input pin to fire; the node is triggered directly when unset
    #[serde(default)]
    pub pin: Option<String>,
}

impl StartTrigger {
    /// Trigger a node directly
    pub fn node(name: impl Into<String>) -> Self {
        Self {
            node: name.into(),
            pin: None,
        }
    }
}

/// Simulated world the standard nodes act on
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldSettings {
    /// Known cinematic sequences and their length in seconds
    pub cinematics: IndexMap<String, f64>,
    /// Known workspots
    pub workspots: Vec<String>,
    /// Seconds an actor spends in a workspot
    pub workspot_seconds: f64,
    /// Facts set before the flow starts
    pub facts: IndexMap<String, i64>,
    /// Actor classes cinematics may spawn
    pub actor_classes: Vec<String>,
}

/// Host configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Format version
    pub version: u32,
    /// Graph template (RON)
    pub graph: PathBuf,
    /// Override the template's graph kind
    pub kind: Option<GraphKind>,
    /// Engine limits
    pub engine: EngineConfig,
    /// Milliseconds between ticks
    pub tick_interval_ms: u64,
    /// Stop once no epoch is open
    pub exit_when_idle: bool,
    /// Stop after this many ticks
    pub max_ticks: Option<u64>,
    /// Nodes triggered at start
    pub start: Vec<StartTrigger>,
    /// Runtime state persistence
    pub snapshot: SnapshotSettings,
    /// Simulated world
    pub world: WorldSettings,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_FORMAT_VERSION,
            graph: PathBuf::from("flow.ron"),
            kind: None,
            engine: EngineConfig::default(),
            tick_interval_ms: 100,
            exit_when_idle: true,
            max_ticks: None,
            start: Vec::new(),
            snapshot: SnapshotSettings::default(),
            world: WorldSettings::default(),
        }
    }
}

impl HostConfig {
    /// Load a config file; relative paths inside it resolve against its directory
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| HostError::io(path, e))?;
        let mut config: HostConfig =
            ron::from_str(&content).map_err(|e| HostError::Config(e.to_string()))?;

        if config.version > CONFIG_FORMAT_VERSION {
            return Err(HostError::ConfigVersion {
                found: config.version,
                supported: CONFIG_FORMAT_VERSION,
            });
        }

        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    /// Save the config file
    pub fn save(&self, path: &Path) -> Result<()> {
        let pretty = ron::ser::PrettyConfig::default()
            .struct_names(true)
            .enumerate_arrays(false);
        let content =
            ron::ser::to_string_pretty(self, pretty).map_err(|e| HostError::Config(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| HostError::io(path, e))
    }

    /// Tick interval as a duration (at least one millisecond)
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    fn resolve_paths(&mut self, base: &Path) {
        if self.graph.is_relative() {
            self.graph = base.join(&self.graph);
        }
        if let Some(path) = self.snapshot.path.as_mut() {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }
}
