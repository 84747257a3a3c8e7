// SPDX-License-Identifier: MIT OR Apache-2.0
//! Host services the standard nodes talk to.
//!
//! Nodes never own world state; they call into these traits. The in-memory
//! implementations here back tests and the headless host.

use crate::fact::{FactStore, FactTable};
use crate::property::{PropertyStore, PropertyTable};
use flowsolo_graph::ExecutionError;
use indexmap::{IndexMap, IndexSet};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Error reported by a host service
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    /// Requested asset does not exist
    #[error("Unknown asset: {0}")]
    UnknownAsset(String),

    /// Service refused the request
    #[error("Request rejected: {0}")]
    Rejected(String),
}

impl From<ServiceError> for ExecutionError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::UnknownAsset(name) => Self::MissingAsset(name),
            ServiceError::Rejected(reason) => Self::Failed(reason),
        }
    }
}

/// Plays cinematic sequences
pub trait CinematicPlayer: Send + Sync {
    /// Start a sequence
    fn play(&self, sequence: &str) -> Result<(), ServiceError>;

    /// Stop a sequence early
    fn stop(&self, sequence: &str);

    /// Whether the sequence is currently playing
    fn is_playing(&self, sequence: &str) -> bool;
}

/// Assigns actors to workspots
pub trait WorkspotManager: Send + Sync {
    /// Send an actor to a workspot
    fn start(&self, actor: u64, workspot: &str) -> Result<(), ServiceError>;

    /// Pull an actor out of its workspot
    fn stop(&self, actor: u64, force: bool);

    /// Workspot the actor is currently using
    fn current(&self, actor: u64) -> Option<String>;
}

/// Spawns actors into the world
pub trait ActorSpawner: Send + Sync {
    /// Spawn an actor of a class at a named spawn point; returns its entity
    fn spawn(&self, class: &str, spawn_point: &str) -> Result<u64, ServiceError>;
}

/// In-memory cinematic player over a fixed catalog
#[derive(Debug, Default)]
pub struct CinematicLibrary {
    catalog: IndexSet<String>,
    playing: RwLock<IndexSet<String>>,
}

impl CinematicLibrary {
    /// Create a player that knows the given sequences
    pub fn new<I, S>(sequences: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            catalog: sequences.into_iter().map(Into::into).collect(),
            playing: RwLock::new(IndexSet::new()),
        }
    }

    /// Mark a sequence as done playing; returns whether it was playing
    pub fn complete(&self, sequence: &str) -> bool {
        self.playing.write().shift_remove(sequence)
    }

    /// Sequences currently playing, in start order
    pub fn playing(&self) -> Vec<String> {
        self.playing.read().iter().cloned().collect()
    }
}

impl CinematicPlayer for CinematicLibrary {
    fn play(&self, sequence: &str) -> Result<(), ServiceError> {
        if !self.catalog.contains(sequence) {
            return Err(ServiceError::UnknownAsset(sequence.to_string()));
        }
        if !self.playing.write().insert(sequence.to_string()) {
            return Err(ServiceError::Rejected(format!("`{sequence}` is already playing")));
        }
        tracing::debug!(sequence, "cinematic started");
        Ok(())
    }

    fn stop(&self, sequence: &str) {
        if self.playing.write().shift_remove(sequence) {
            tracing::debug!(sequence, "cinematic stopped");
        }
    }

    fn is_playing(&self, sequence: &str) -> bool {
        self.playing.read().contains(sequence)
    }
}

/// In-memory workspot assignments
#[derive(Debug, Default)]
pub struct WorkspotBoard {
    spots: IndexSet<String>,
    assigned: RwLock<IndexMap<u64, String>>,
}

impl WorkspotBoard {
    /// Create a board with the given workspots
    pub fn new<I, S>(spots: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            spots: spots.into_iter().map(Into::into).collect(),
            assigned: RwLock::new(IndexMap::new()),
        }
    }

    /// Actors currently working, with their workspot
    pub fn assignments(&self) -> Vec<(u64, String)> {
        self.assigned
            .read()
            .iter()
            .map(|(actor, spot)| (*actor, spot.clone()))
            .collect()
    }
}

impl WorkspotManager for WorkspotBoard {
    fn start(&self, actor: u64, workspot: &str) -> Result<(), ServiceError> {
        if !self.spots.contains(workspot) {
            return Err(ServiceError::UnknownAsset(workspot.to_string()));
        }
        let mut assigned = self.assigned.write();
        if assigned.values().any(|s| s == workspot) {
            return Err(ServiceError::Rejected(format!("workspot `{workspot}` is occupied")));
        }
        assigned.insert(actor, workspot.to_string());
        Ok(())
    }

    fn stop(&self, actor: u64, force: bool) {
        if let Some(spot) = self.assigned.write().shift_remove(&actor) {
            tracing::debug!(actor, %spot, force, "workspot released");
        }
    }

    fn current(&self, actor: u64) -> Option<String> {
        self.assigned.read().get(&actor).cloned()
    }
}

/// A spawned actor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnedActor {
    /// Entity id handed out
    pub entity: u64,
    /// Actor class
    pub class: String,
    /// Spawn point name, empty for the origin
    pub spawn_point: String,
}

/// In-memory spawner over a fixed set of actor classes
#[derive(Debug)]
pub struct ActorRoster {
    classes: IndexSet<String>,
    next: AtomicU64,
    spawned: RwLock<Vec<SpawnedActor>>,
}

impl ActorRoster {
    /// Create a spawner for the given classes; entities are numbered from
    /// `first_entity`
    pub fn new<I, S>(classes: I, first_entity: u64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            classes: classes.into_iter().map(Into::into).collect(),
            next: AtomicU64::new(first_entity),
            spawned: RwLock::new(Vec::new()),
        }
    }

    /// Actors spawned so far, oldest first
    pub fn spawned(&self) -> Vec<SpawnedActor> {
        self.spawned.read().clone()
    }
}

impl Default for ActorRoster {
    fn default() -> Self {
        Self::new(std::iter::empty::<String>(), 1)
    }
}

impl ActorSpawner for ActorRoster {
    fn spawn(&self, class: &str, spawn_point: &str) -> Result<u64, ServiceError> {
        if !self.classes.contains(class) {
            return Err(ServiceError::UnknownAsset(class.to_string()));
        }
        let entity = self.next.fetch_add(1, Ordering::Relaxed);
        self.spawned.write().push(SpawnedActor {
            entity,
            class: class.to_string(),
            spawn_point: spawn_point.to_string(),
        });
        tracing::debug!(entity, class, spawn_point, "actor spawned");
        Ok(entity)
    }
}

/// Services handed to the standard node behaviors
#[derive(Clone)]
pub struct HostServices {
    /// Fact storage
    pub facts: Arc<dyn FactStore>,
    /// Cinematic playback
    pub cinematics: Arc<dyn CinematicPlayer>,
    /// Entity property storage
    pub properties: Arc<dyn PropertyStore>,
    /// Workspot assignment
    pub workspots: Arc<dyn WorkspotManager>,
    /// Actor spawning
    pub spawner: Arc<dyn ActorSpawner>,
}

impl Default for HostServices {
    fn default() -> Self {
        Self {
            facts: Arc::new(FactTable::default()),
            cinematics: Arc::new(CinematicLibrary::default()),
            properties: Arc::new(PropertyTable::default()),
            workspots: Arc::new(WorkspotBoard::default()),
            spawner: Arc::new(ActorRoster::default()),
        }
    }
}

impl std::fmt::Debug for HostServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostServices").finish_non_exhaustive()
    }
}
