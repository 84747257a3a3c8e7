// SPDX-License-Identifier: MIT OR Apache-2.0
//! Simulated world backing the standard nodes in a headless run.
//!
//! Cinematics and workspots finish on their own after a configured time; each
//! [`World::advance`] returns the completion and fact-change events the session
//! then broadcasts to the graph. [`WorldState`] carries facts and running
//! timers across a save, so a resumed graph still hears its completions.

use crate::config::WorldSettings;
use flowsolo_graph::{FlowEvent, PinValue, SnapshotError};
use flowsolo_nodes::{
    ActorRoster, CinematicLibrary, CinematicPlayer, FactStore, FactTable, HostServices, PropertyTable,
    ServiceError, WorkspotBoard, WorkspotManager, CINEMATIC_FINISHED, WORKSPOT_FINISHED,
};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// First entity id handed to spawned actors
pub const FIRST_SPAWNED_ENTITY: u64 = 1000;

/// Current world state format version
pub const WORLD_STATE_VERSION: u32 = 1;

/// Saved world: facts and the timers still running
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldState {
    /// Format version
    pub version: u32,
    /// Fact values
    pub facts: IndexMap<String, i64>,
    /// Playing sequences and their seconds left
    pub cinematics: IndexMap<String, f64>,
    /// Working actors, their workspot and seconds left
    pub workspots: IndexMap<u64, (String, f64)>,
}

impl WorldState {
    /// Encode as compact binary
    pub fn to_bytes(&self) -> Result<Vec<u8>, SnapshotError> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode from compact binary
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SnapshotError> {
        let state: Self = bincode::deserialize(bytes)?;
        state.check_version()
    }

    /// Encode as readable RON
    pub fn to_ron(&self) -> Result<String, SnapshotError> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| SnapshotError::Ron(e.to_string()))
    }

    /// Decode from RON
    pub fn from_ron(source: &str) -> Result<Self, SnapshotError> {
        let state: Self = ron::from_str(source).map_err(|e| SnapshotError::Ron(e.to_string()))?;
        state.check_version()
    }

    fn check_version(self) -> Result<Self, SnapshotError> {
        if self.version != WORLD_STATE_VERSION {
            return Err(SnapshotError::Version {
                found: self.version,
                expected: WORLD_STATE_VERSION,
            });
        }
        Ok(self)
    }
}

/// File the world state is kept in, next to the graph snapshot:
/// `state.bin` becomes `state.world.bin`
pub fn world_state_path(snapshot: &Path) -> PathBuf {
    let stem = snapshot
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match snapshot.extension() {
        Some(ext) => format!("{stem}.world.{}", ext.to_string_lossy()),
        None => format!("{stem}.world"),
    };
    snapshot.with_file_name(name)
}

/// Cinematic player whose sequences end after their configured length
pub struct TimedCinematics {
    library: CinematicLibrary,
    lengths: IndexMap<String, f64>,
    remaining: Mutex<IndexMap<String, f64>>,
}

impl TimedCinematics {
    /// Create a player from sequence lengths in seconds
    pub fn new(lengths: IndexMap<String, f64>) -> Self {
        Self {
            library: CinematicLibrary::new(lengths.keys().cloned()),
            lengths,
            remaining: Mutex::new(IndexMap::new()),
        }
    }

    /// Advance playback; returns the sequences that ended
    pub fn advance(&self, delta: Duration) -> Vec<String> {
        let mut remaining = self.remaining.lock();
        for left in remaining.values_mut() {
            *left -= delta.as_secs_f64();
        }
        let done: Vec<String> = remaining
            .iter()
            .filter(|(_, left)| **left <= 0.0)
            .map(|(name, _)| name.clone())
            .collect();
        for name in &done {
            remaining.shift_remove(name);
            self.library.complete(name);
        }
        done
    }

    fn running(&self) -> IndexMap<String, f64> {
        self.remaining.lock().clone()
    }

    /// Start a sequence with part of its length already played
    fn resume(&self, sequence: &str, left: f64) -> Result<(), ServiceError> {
        self.library.play(sequence)?;
        self.remaining.lock().insert(sequence.to_string(), left);
        Ok(())
    }
}

impl CinematicPlayer for TimedCinematics {
    fn play(&self, sequence: &str) -> Result<(), ServiceError> {
        self.library.play(sequence)?;
        let length = self.lengths.get(sequence).copied().unwrap_or(0.0);
        self.remaining.lock().insert(sequence.to_string(), length);
        Ok(())
    }

    fn stop(&self, sequence: &str) {
        self.remaining.lock().shift_remove(sequence);
        self.library.stop(sequence);
    }

    fn is_playing(&self, sequence: &str) -> bool {
        self.library.is_playing(sequence)
    }
}

/// Workspot manager whose actors leave after a fixed time
pub struct TimedWorkspots {
    board: WorkspotBoard,
    seconds: f64,
    remaining: Mutex<IndexMap<u64, f64>>,
}

impl TimedWorkspots {
    /// Create a manager over the given workspots
    pub fn new(spots: Vec<String>, seconds: f64) -> Self {
        Self {
            board: WorkspotBoard::new(spots),
            seconds,
            remaining: Mutex::new(IndexMap::new()),
        }
    }

    /// Advance time; returns actors that finished working
    pub fn advance(&self, delta: Duration) -> Vec<u64> {
        let mut remaining = self.remaining.lock();
        for left in remaining.values_mut() {
            *left -= delta.as_secs_f64();
        }
        let done: Vec<u64> = remaining
            .iter()
            .filter(|(_, left)| **left <= 0.0)
            .map(|(actor, _)| *actor)
            .collect();
        for actor in &done {
            remaining.shift_remove(actor);
            self.board.stop(*actor, false);
        }
        done
    }

    fn running(&self) -> IndexMap<u64, (String, f64)> {
        self.remaining
            .lock()
            .iter()
            .filter_map(|(actor, left)| Some((*actor, (self.board.current(*actor)?, *left))))
            .collect()
    }

    fn resume(&self, actor: u64, workspot: &str, left: f64) -> Result<(), ServiceError> {
        self.board.start(actor, workspot)?;
        self.remaining.lock().insert(actor, left);
        Ok(())
    }
}

impl WorkspotManager for TimedWorkspots {
    fn start(&self, actor: u64, workspot: &str) -> Result<(), ServiceError> {
        self.board.start(actor, workspot)?;
        self.remaining.lock().insert(actor, self.seconds);
        Ok(())
    }

    fn stop(&self, actor: u64, force: bool) {
        self.remaining.lock().shift_remove(&actor);
        self.board.stop(actor, force);
    }

    fn current(&self, actor: u64) -> Option<String> {
        self.board.current(actor)
    }
}

/// All simulated services of one host session
pub struct World {
    /// World facts
    pub facts: Arc<FactTable>,
    /// Cinematic playback
    pub cinematics: Arc<TimedCinematics>,
    /// Entity properties
    pub properties: Arc<PropertyTable>,
    /// Workspots
    pub workspots: Arc<TimedWorkspots>,
    /// Spawned actors
    pub actors: Arc<ActorRoster>,
}

impl World {
    /// Build the world from config
    pub fn new(settings: &WorldSettings) -> Self {
        let facts = Arc::new(FactTable::new());
        for (fact, value) in &settings.facts {
            facts.set(fact, *value);
        }
        // Initial facts are not news to anyone.
        facts.take_changes();

        Self {
            facts,
            cinematics: Arc::new(TimedCinematics::new(settings.cinematics.clone())),
            properties: Arc::new(PropertyTable::default()),
            workspots: Arc::new(TimedWorkspots::new(
                settings.workspots.clone(),
                settings.workspot_seconds,
            )),
            actors: Arc::new(ActorRoster::new(
                settings.actor_classes.iter().cloned(),
                FIRST_SPAWNED_ENTITY,
            )),
        }
    }

    /// Service handles for the node library
    pub fn services(&self) -> HostServices {
        HostServices {
            facts: self.facts.clone(),
            cinematics: self.cinematics.clone(),
            properties: self.properties.clone(),
            workspots: self.workspots.clone(),
            spawner: self.actors.clone(),
        }
    }

    /// Advance simulated time and collect the resulting events
    pub fn advance(&self, delta: Duration) -> Vec<FlowEvent> {
        let mut events = Vec::new();
        for sequence in self.cinematics.advance(delta) {
            tracing::info!(%sequence, "cinematic finished");
            events.push(FlowEvent::new(CINEMATIC_FINISHED).with("sequence", sequence));
        }
        for actor in self.workspots.advance(delta) {
            tracing::info!(actor, "workspot finished");
            events.push(FlowEvent::new(WORKSPOT_FINISHED).with("actor", PinValue::Entity(actor)));
        }
        events.extend(self.pending_fact_events());
        events
    }

    /// Change events for facts written since the last call
    pub fn pending_fact_events(&self) -> Vec<FlowEvent> {
        self.facts.take_events()
    }

    /// Capture facts and running timers
    pub fn capture_state(&self) -> WorldState {
        WorldState {
            version: WORLD_STATE_VERSION,
            facts: self.facts.entries(),
            cinematics: self.cinematics.running(),
            workspots: self.workspots.running(),
        }
    }

    /// Put saved facts and timers back without raising change events.
    /// Timers for sequences or workspots this world does not know are
    /// dropped with a warning.
    pub fn restore_state(&self, state: &WorldState) {
        for (fact, value) in &state.facts {
            self.facts.set(fact, *value);
        }
        self.facts.take_changes();

        for (sequence, left) in &state.cinematics {
            if let Err(err) = self.cinematics.resume(sequence, *left) {
                tracing::warn!(%sequence, %err, "saved cinematic not resumed");
            }
        }
        for (actor, (workspot, left)) in &state.workspots {
            if let Err(err) = self.workspots.resume(*actor, workspot, *left) {
                tracing::warn!(actor, %workspot, %err, "saved workspot not resumed");
            }
        }
    }
}
