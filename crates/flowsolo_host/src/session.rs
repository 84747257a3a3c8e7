// SPDX-License-Identifier: MIT OR Apache-2.0
//! A running graph instance with its world and persistence.
//!
//! This module handles:
//! - Loading the template and checking it against the node library
//! - Restoring and saving runtime state
//! - Start triggers, ticks and world events
//! - The interval-driven run loop with Ctrl-C shutdown

use crate::config::{HostConfig, SnapshotFormat, StartTrigger};
use crate::error::{HostError, Result};
use crate::world::{world_state_path, World, WorldState};
use flowsolo_graph::{
    BehaviorRegistry, Engine, Graph, PropagationReport, RestoreReport, RuntimeIssue,
    RuntimeSnapshot, TriggerTarget,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Why a run loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// No epoch left open
    Idle,
    /// Tick limit reached
    TickLimit,
    /// Interrupted by the user
    Interrupted,
}

/// Check every node of a graph against the registry
pub fn validate_graph(graph: &Graph, registry: &BehaviorRegistry) -> Result<()> {
    graph.validate()?;
    let mut problems = Vec::new();
    for node in graph.nodes() {
        match registry.descriptor(&node.node_type) {
            None => problems.push(format!(
                "node `{}` ({}) has unknown type `{}`",
                node.name, node.id, node.node_type
            )),
            Some(descriptor) if !descriptor.allows(graph.kind) => problems.push(format!(
                "node `{}` ({}) of type `{}` is not allowed in {:?} graphs",
                node.name, node.id, node.node_type, graph.kind
            )),
            Some(_) => {}
        }
    }
    if problems.is_empty() {
        Ok(())
    } else {
        Err(HostError::Invalid(problems.join("\n")))
    }
}

/// Load a graph template from a RON file
pub fn load_graph(path: &Path) -> Result<Graph> {
    let source = std::fs::read_to_string(path).map_err(|e| HostError::io(path, e))?;
    Ok(Graph::from_ron(&source)?)
}

/// Load a snapshot file, picking the decoder from the extension
pub fn load_snapshot(path: &Path) -> Result<RuntimeSnapshot> {
    load_snapshot_as(path, SnapshotFormat::from_path(path))
}

/// Load a snapshot file written in the given format
pub fn load_snapshot_as(path: &Path, format: SnapshotFormat) -> Result<RuntimeSnapshot> {
    match format {
        SnapshotFormat::Ron => {
            let source = std::fs::read_to_string(path).map_err(|e| HostError::io(path, e))?;
            Ok(RuntimeSnapshot::from_ron(&source)?)
        }
        SnapshotFormat::Binary => {
            let bytes = std::fs::read(path).map_err(|e| HostError::io(path, e))?;
            Ok(RuntimeSnapshot::from_bytes(&bytes)?)
        }
    }
}

/// Write a snapshot file in the given format
pub fn save_snapshot(snapshot: &RuntimeSnapshot, path: &Path, format: SnapshotFormat) -> Result<()> {
    match format {
        SnapshotFormat::Ron => {
            let text = snapshot.to_ron()?;
            std::fs::write(path, text).map_err(|e| HostError::io(path, e))
        }
        SnapshotFormat::Binary => {
            let bytes = snapshot.to_bytes()?;
            std::fs::write(path, bytes).map_err(|e| HostError::io(path, e))
        }
    }
}

fn load_world_state(path: &Path, format: SnapshotFormat) -> Result<WorldState> {
    match format {
        SnapshotFormat::Ron => {
            let source = std::fs::read_to_string(path).map_err(|e| HostError::io(path, e))?;
            Ok(WorldState::from_ron(&source)?)
        }
        SnapshotFormat::Binary => {
            let bytes = std::fs::read(path).map_err(|e| HostError::io(path, e))?;
            Ok(WorldState::from_bytes(&bytes)?)
        }
    }
}

fn save_world_state(state: &WorldState, path: &Path, format: SnapshotFormat) -> Result<()> {
    match format {
        SnapshotFormat::Ron => {
            let text = state.to_ron()?;
            std::fs::write(path, text).map_err(|e| HostError::io(path, e))
        }
        SnapshotFormat::Binary => {
            let bytes = state.to_bytes()?;
            std::fs::write(path, bytes).map_err(|e| HostError::io(path, e))
        }
    }
}

/// Log the issues of a propagation report
pub fn log_report(report: &PropagationReport) {
    for issue in &report.issues {
        match issue {
            RuntimeIssue::Execution { node, error } => {
                tracing::error!(%node, %error, "node failed");
            }
            RuntimeIssue::CycleDetected { epoch, node, depth } => {
                tracing::warn!(%epoch, %node, depth, "cycle cut");
            }
            RuntimeIssue::SignalBudgetExceeded { epoch, limit } => {
                tracing::warn!(%epoch, limit, "signal budget exhausted");
            }
        }
    }
}

/// Host session over one graph instance
pub struct Session {
    config: HostConfig,
    engine: Arc<Engine>,
    graph: Graph,
    world: World,
    ticks: u64,
}

impl Session {
    /// Load the graph and build the engine described by the config
    pub fn new(config: HostConfig) -> Result<Self> {
        let mut graph = load_graph(&config.graph)?;
        if let Some(kind) = config.kind {
            graph.kind = kind;
        }

        let world = World::new(&config.world);
        let registry = flowsolo_nodes::default_registry(&world.services());
        validate_graph(&graph, &registry)?;

        tracing::info!(
            graph = %graph.name,
            kind = ?graph.kind,
            nodes = graph.node_count(),
            connections = graph.connection_count(),
            "graph loaded"
        );
        let engine = Arc::new(Engine::new(Arc::new(registry), config.engine.clone()));
        Ok(Self {
            config,
            engine,
            graph,
            world,
            ticks: 0,
        })
    }

    /// The running graph instance
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// The simulated world
    pub fn world(&self) -> &World {
        &self.world
    }

    /// Ticks run so far
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Whether no epoch is running or suspended
    pub fn is_idle(&self) -> bool {
        self.graph.epochs().open_epochs().next().is_none()
    }

    /// Restore runtime state from the configured snapshot file, if present,
    /// decoding it in the configured format
    pub fn restore(&mut self) -> Result<Option<RestoreReport>> {
        let Some(path) = self.config.snapshot.path.clone() else {
            return Ok(None);
        };
        if !path.exists() {
            tracing::info!(path = %path.display(), "no snapshot to restore");
            return Ok(None);
        }
        let format = self.config.snapshot.format;
        let snapshot = load_snapshot_as(&path, format)?;
        if snapshot.graph_name != self.graph.name {
            tracing::warn!(
                saved = %snapshot.graph_name,
                current = %self.graph.name,
                "snapshot was taken from another graph"
            );
        }

        let world_path = world_state_path(&path);
        if world_path.exists() {
            self.world.restore_state(&load_world_state(&world_path, format)?);
        } else {
            tracing::warn!(
                path = %world_path.display(),
                "no saved world, waiting nodes may never resume"
            );
        }
        Ok(Some(snapshot.restore(&mut self.graph)))
    }

    /// Save runtime state to the configured snapshot file, and the world
    /// next to it
    pub fn save(&self) -> Result<bool> {
        let Some(path) = self.config.snapshot.path.as_deref() else {
            return Ok(false);
        };
        let format = self.config.snapshot.format;
        let snapshot = RuntimeSnapshot::capture(&self.graph);
        save_snapshot(&snapshot, path, format)?;
        save_world_state(&self.world.capture_state(), &world_state_path(path), format)?;
        tracing::info!(path = %path.display(), nodes = snapshot.nodes.len(), "snapshot saved");
        Ok(true)
    }

    /// Resume from the snapshot when configured and present, else fire the
    /// start triggers
    pub fn boot(&mut self) -> Result<PropagationReport> {
        if self.config.snapshot.restore_on_start {
            if let Some(report) = self.restore()? {
                tracing::info!(
                    restored = report.restored.len(),
                    warnings = report.warnings.len(),
                    "resumed from snapshot"
                );
                return Ok(PropagationReport::default());
            }
        }
        self.start()
    }

    /// Fire one start trigger
    pub fn trigger(&mut self, start: &StartTrigger) -> Result<PropagationReport> {
        let node = self
            .graph
            .find_node(&start.node)
            .ok_or_else(|| HostError::UnknownStartNode(start.node.clone()))?;
        let target = match &start.pin {
            Some(pin) => TriggerTarget::Pin {
                node,
                pin: pin.clone(),
            },
            None => TriggerTarget::Node(node),
        };
        let mut report = self.engine.trigger(&mut self.graph, target)?.report;
        report.merge(self.deliver_world_events(Duration::ZERO));
        log_report(&report);
        Ok(report)
    }

    /// Fire every configured start trigger
    pub fn start(&mut self) -> Result<PropagationReport> {
        let mut report = PropagationReport::default();
        for start in self.config.start.clone() {
            report.merge(self.trigger(&start)?);
        }
        Ok(report)
    }

    /// Advance time by one tick
    pub fn step(&mut self, delta: Duration) -> PropagationReport {
        self.ticks += 1;
        let mut report = self.engine.tick(&mut self.graph, delta);
        report.merge(self.deliver_world_events(delta));
        log_report(&report);
        self.graph.prune_epochs();
        report
    }

    /// Broadcast world events until the world has nothing more to say
    fn deliver_world_events(&mut self, delta: Duration) -> PropagationReport {
        let mut report = PropagationReport::default();
        let mut events = self.world.advance(delta);
        while !events.is_empty() {
            for event in &events {
                report.merge(self.engine.broadcast(&mut self.graph, event));
            }
            // Nodes reacting to events may have changed facts in turn.
            events = self.world.pending_fact_events();
        }
        report
    }

    /// Run ticks on an interval until idle, the tick limit, or Ctrl-C
    pub async fn run(&mut self) -> Result<StopReason> {
        let period = self.config.tick_interval();
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first interval tick completes immediately.
        interval.tick().await;

        let reason = loop {
            if self.config.exit_when_idle && self.is_idle() {
                break StopReason::Idle;
            }
            if self.config.max_ticks.is_some_and(|max| self.ticks >= max) {
                break StopReason::TickLimit;
            }
            tokio::select! {
                _ = interval.tick() => {
                    self.step(period);
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("interrupted");
                    break StopReason::Interrupted;
                }
            }
        };

        tracing::info!(?reason, ticks = self.ticks, "run loop stopped");
        if self.config.snapshot.save_on_exit {
            self.save()?;
        }
        Ok(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SnapshotSettings;
    use flowsolo_graph::{GraphKind, NodeState};
    use flowsolo_nodes::{CinematicPlayer, FactStore, HostServices};
    use std::path::PathBuf;

    /// Start -> Play "intro" -> Set fact "seen" -> Finish
    fn write_cutscene(dir: &Path) -> PathBuf {
        let registry = flowsolo_nodes::default_registry(&HostServices::default());
        let mut graph = Graph::new("cutscene").with_kind(GraphKind::Cinematic);
        let node = |type_id: &str| registry.create_node(type_id).unwrap();

        let start = graph.add_node(node("flow.start").with_name("Start")).unwrap();
        let play = graph
            .add_node(node("cinematic.play").with_name("Play").with_property("sequence", "intro"))
            .unwrap();
        let seen = graph
            .add_node(node("fact.set").with_name("Seen").with_property("fact", "seen"))
            .unwrap();
        let end = graph.add_node(node("flow.finish").with_name("End")).unwrap();
        graph.connect_by_name(start, "Out", play, "Play").unwrap();
        graph.connect_by_name(play, "Completed", seen, "Create").unwrap();
        graph.connect_by_name(seen, "Done", end, "In").unwrap();

        let path = dir.join("cutscene.ron");
        std::fs::write(&path, graph.to_ron().unwrap()).unwrap();
        path
    }

    fn config(dir: &Path) -> HostConfig {
        let mut config = HostConfig {
            graph: write_cutscene(dir),
            start: vec![StartTrigger::node("Start")],
            tick_interval_ms: 1,
            snapshot: SnapshotSettings {
                path: Some(dir.join("state.bin")),
                save_on_exit: true,
                restore_on_start: true,
                ..SnapshotSettings::default()
            },
            ..HostConfig::default()
        };
        config.world.cinematics.insert("intro".into(), 0.15);
        config
    }

    #[test]
    fn test_cutscene_runs_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::new(config(dir.path())).unwrap();
        session.start().unwrap();
        let play = session.graph().find_node("Play").unwrap();
        assert_eq!(session.graph().node_state(play), Some(NodeState::Active));
        assert!(!session.is_idle());

        session.step(Duration::from_millis(100));
        assert_eq!(session.graph().node_state(play), Some(NodeState::Active));
        session.step(Duration::from_millis(100));

        let end = session.graph().find_node("End").unwrap();
        assert_eq!(session.graph().node_state(end), Some(NodeState::Finished));
        assert_eq!(session.world().facts.get("seen"), 1);
        assert!(session.is_idle());
    }

    #[test]
    fn test_save_and_resume_in_new_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = Session::new(config(dir.path())).unwrap();
        first.start().unwrap();
        assert!(first.save().unwrap());

        let mut second = Session::new(config(dir.path())).unwrap();
        let report = second.restore().unwrap().unwrap();
        assert!(report.warnings.is_empty());
        let play = second.graph().find_node("Play").unwrap();
        assert_eq!(second.graph().node_state(play), Some(NodeState::Active));
        assert!(!second.is_idle());

        assert!(second.world().cinematics.is_playing("intro"));

        second.step(Duration::from_millis(200));
        let end = second.graph().find_node("End").unwrap();
        assert_eq!(second.graph().node_state(end), Some(NodeState::Finished));
        assert!(second.is_idle());
    }

    #[test]
    fn test_restore_uses_configured_format() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.snapshot.path = Some(dir.path().join("save.sav"));
        config.snapshot.format = SnapshotFormat::Ron;

        let mut first = Session::new(config.clone()).unwrap();
        first.start().unwrap();
        first.save().unwrap();
        let text = std::fs::read_to_string(dir.path().join("save.sav")).unwrap();
        assert!(RuntimeSnapshot::from_ron(&text).is_ok());
        assert!(dir.path().join("save.world.sav").exists());

        let mut second = Session::new(config).unwrap();
        let report = second.restore().unwrap().unwrap();
        assert!(report.warnings.is_empty());
        let play = second.graph().find_node("Play").unwrap();
        assert_eq!(second.graph().node_state(play), Some(NodeState::Active));
    }

    #[tokio::test]
    async fn test_resumed_session_runs_to_idle() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = Session::new(config(dir.path())).unwrap();
        first.boot().unwrap();
        first.step(Duration::from_millis(50));
        first.world().facts.set("visits", 3);
        first.save().unwrap();

        let mut resumed = Session::new(config(dir.path())).unwrap();
        let report = resumed.boot().unwrap();
        assert!(report.activated.is_empty());
        assert!(!resumed.is_idle());

        assert_eq!(resumed.run().await.unwrap(), StopReason::Idle);
        let end = resumed.graph().find_node("End").unwrap();
        assert_eq!(resumed.graph().node_state(end), Some(NodeState::Finished));
        assert_eq!(resumed.world().facts.get("seen"), 1);
        assert_eq!(resumed.world().facts.get("visits"), 3);
    }

    #[test]
    fn test_boot_prefers_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let mut fresh = Session::new(config(dir.path())).unwrap();
        let report = fresh.boot().unwrap();
        assert!(!report.activated.is_empty());
        fresh.save().unwrap();

        let mut resumed = Session::new(config(dir.path())).unwrap();
        let report = resumed.boot().unwrap();
        assert!(report.activated.is_empty());
        let play = resumed.graph().find_node("Play").unwrap();
        assert_eq!(resumed.graph().node_state(play), Some(NodeState::Active));
    }

    #[test]
    fn test_wrong_kind_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let config = HostConfig {
            kind: Some(GraphKind::Flow),
            ..config(dir.path())
        };
        assert!(matches!(Session::new(config), Err(HostError::Invalid(_))));
    }

    #[test]
    fn test_unknown_start_node() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::new(config(dir.path())).unwrap();
        let missing = StartTrigger::node("Nowhere");
        assert!(matches!(
            session.trigger(&missing),
            Err(HostError::UnknownStartNode(name)) if name == "Nowhere"
        ));
    }

    #[test]
    fn test_ron_snapshot_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::new(config(dir.path())).unwrap();
        session.start().unwrap();
        let path = dir.path().join("state.ron");
        let snapshot = RuntimeSnapshot::capture(session.graph());
        save_snapshot(&snapshot, &path, SnapshotFormat::Ron).unwrap();
        assert_eq!(load_snapshot(&path).unwrap(), snapshot);
    }

    #[tokio::test]
    async fn test_run_loop_stops_when_idle_and_saves() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::new(config(dir.path())).unwrap();
        session.start().unwrap();
        let reason = session.run().await.unwrap();
        assert_eq!(reason, StopReason::Idle);
        assert!(session.ticks() > 0);
        assert!(dir.path().join("state.bin").exists());
    }

    #[tokio::test]
    async fn test_run_loop_tick_limit() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.max_ticks = Some(2);
        config.world.cinematics.insert("intro".into(), 60.0);
        let mut session = Session::new(config).unwrap();
        session.start().unwrap();
        assert_eq!(session.run().await.unwrap(), StopReason::TickLimit);
        assert_eq!(session.ticks(), 2);
    }
}
