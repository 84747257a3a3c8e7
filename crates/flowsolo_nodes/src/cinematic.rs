// SPDX-License-Identifier: MIT OR Apache-2.0
//! Cinematic nodes, only valid inside cinematic graphs: sequence playback and
//! actor spawning.

use crate::services::{ActorSpawner, CinematicPlayer};
use flowsolo_graph::{
    Activation, ExecutionError, FlowEvent, GraphKind, NodeBehavior, NodeCategory, NodeContext,
    NodeDescriptor, Pin, PinValue, Signal,
};
use std::sync::Arc;

/// Event sent by the host when a sequence ends; payload `sequence` holds its name
pub const CINEMATIC_FINISHED: &str = "cinematic.finished";

const PLAYING: &str = "sequence";

/// `cinematic.play`: start a sequence and report how it went
pub struct PlayCinematic {
    player: Arc<dyn CinematicPlayer>,
}

impl PlayCinematic {
    /// Create the behavior over a player
    pub fn new(player: Arc<dyn CinematicPlayer>) -> Self {
        Self { player }
    }
}

impl NodeBehavior for PlayCinematic {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::new("cinematic.play", "Play Cinematic", NodeCategory::Cinematic)
            .describe("Play a cinematic sequence")
            .input(Pin::exec_in("Play").merged())
            .output(Pin::exec_out("Started"))
            .output(Pin::exec_out("Completed"))
            .output(Pin::exec_out("Failed"))
            .property("sequence", "")
            .property("wait_for_completion", true)
            .only_in([GraphKind::Cinematic])
    }

    fn activate(&self, ctx: &mut NodeContext<'_>) -> Result<Activation, ExecutionError> {
        let sequence = match ctx.require_str("sequence") {
            Ok(sequence) => sequence.to_string(),
            Err(error) => return Ok(Activation::fail("Failed", error)),
        };

        if let Err(err) = self.player.play(&sequence) {
            tracing::warn!(node = %ctx.node_name, %sequence, %err, "cinematic failed to start");
            return Ok(Activation::fail("Failed", err.into()));
        }
        tracing::info!(node = %ctx.node_name, %sequence, "cinematic started");

        if !ctx.bool_or("wait_for_completion", true) {
            return Ok(Activation::Leave(vec![
                Signal::exec("Started"),
                Signal::exec("Completed"),
            ]));
        }
        ctx.remember(PLAYING, PinValue::Name(sequence));
        Ok(Activation::Stay(vec![Signal::exec("Started")]))
    }

    fn on_event(
        &self,
        ctx: &mut NodeContext<'_>,
        event: &FlowEvent,
    ) -> Result<Option<Activation>, ExecutionError> {
        if !event.is(CINEMATIC_FINISHED) {
            return Ok(None);
        }
        let finished = event.get("sequence").and_then(PinValue::as_str);
        let playing = ctx.recall(PLAYING).and_then(PinValue::as_str);
        if finished.is_none() || finished != playing {
            return Ok(None);
        }
        tracing::info!(node = %ctx.node_name, sequence = ?playing, "cinematic completed");
        ctx.forget(PLAYING);
        Ok(Some(Activation::leave("Completed")))
    }

    fn cleanup(&self, ctx: &mut NodeContext<'_>) {
        if let Some(sequence) = ctx.forget(PLAYING) {
            if let Some(sequence) = sequence.as_str() {
                self.player.stop(sequence);
            }
        }
    }
}

/// `cinematic.spawn_actor`: spawn an actor and pass its entity on `Out`
pub struct SpawnActor {
    spawner: Arc<dyn ActorSpawner>,
}

impl SpawnActor {
    /// Create the behavior over a spawner
    pub fn new(spawner: Arc<dyn ActorSpawner>) -> Self {
        Self { spawner }
    }
}

impl NodeBehavior for SpawnActor {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::new(
            "cinematic.spawn_actor",
            "Spawn Cinematic Actor",
            NodeCategory::Cinematic,
        )
        .describe("Spawn an actor during cinematic playback")
        .input(Pin::exec_in("In"))
        .output(Pin::exec_out("Out"))
        .output(Pin::exec_out("Failed"))
        .property("actor_class", "")
        .property("spawn_point", "")
        .only_in([GraphKind::Cinematic])
    }

    fn activate(&self, ctx: &mut NodeContext<'_>) -> Result<Activation, ExecutionError> {
        let class = match ctx.require_str("actor_class") {
            Ok(class) => class.to_string(),
            Err(error) => return Ok(Activation::fail("Failed", error)),
        };
        let spawn_point = ctx
            .property("spawn_point")
            .and_then(PinValue::as_str)
            .unwrap_or_default()
            .to_string();

        match self.spawner.spawn(&class, &spawn_point) {
            Ok(entity) => {
                tracing::info!(node = %ctx.node_name, %class, entity, "actor spawned");
                Ok(Activation::Leave(vec![Signal::with_value(
                    "Out",
                    PinValue::Entity(entity),
                )]))
            }
            Err(err) => {
                tracing::warn!(node = %ctx.node_name, %class, %err, "actor spawn failed");
                Ok(Activation::fail("Failed", err.into()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{ActorRoster, CinematicLibrary};
    use flowsolo_graph::{
        BehaviorRegistry, Engine, EngineConfig, FnBehavior, Graph, NodeId, NodeState,
        TriggerTarget,
    };

    struct Rig {
        engine: Engine,
        player: Arc<CinematicLibrary>,
        graph: Graph,
        play: NodeId,
        completed: NodeId,
        failed: NodeId,
    }

    fn rig(kind: GraphKind, wait: bool, sequence: &str) -> Rig {
        let player = Arc::new(CinematicLibrary::new(["intro"]));
        let mut registry = BehaviorRegistry::new();
        registry.register(PlayCinematic::new(player.clone()));
        registry.register(FnBehavior::new(
            NodeDescriptor::new("test.sink", "Sink", NodeCategory::Custom)
                .input(Pin::exec_in("In")),
            |_ctx| Ok(Activation::Leave(Vec::new())),
        ));
        let engine = Engine::new(Arc::new(registry), EngineConfig::default());

        let mut graph = Graph::new("cutscene").with_kind(kind);
        let node = engine
            .registry()
            .create_node("cinematic.play")
            .unwrap()
            .with_property("sequence", sequence)
            .with_property("wait_for_completion", wait);
        let play = graph.add_node(node).unwrap();
        let completed = graph.add_node(engine.registry().create_node("test.sink").unwrap()).unwrap();
        let failed = graph.add_node(engine.registry().create_node("test.sink").unwrap()).unwrap();
        graph.connect_by_name(play, "Completed", completed, "In").unwrap();
        graph.connect_by_name(play, "Failed", failed, "In").unwrap();
        Rig { engine, player, graph, play, completed, failed }
    }

    #[test]
    fn test_plays_until_finished_event() {
        let mut rig = rig(GraphKind::Cinematic, true, "intro");
        let report = rig.engine.trigger(&mut rig.graph, TriggerTarget::Node(rig.play)).unwrap().report;
        assert!(report.activated.iter().all(|n| *n == rig.play));
        assert_eq!(rig.graph.node_state(rig.play), Some(NodeState::Active));
        assert!(rig.player.is_playing("intro"));

        let other = FlowEvent::new(CINEMATIC_FINISHED).with("sequence", "outro");
        assert!(rig.engine.broadcast(&mut rig.graph, &other).activated.is_empty());

        rig.player.complete("intro");
        let done = FlowEvent::new(CINEMATIC_FINISHED).with("sequence", "intro");
        let report = rig.engine.broadcast(&mut rig.graph, &done);
        assert_eq!(report.activated, vec![rig.completed]);
        assert_eq!(rig.graph.node_state(rig.play), Some(NodeState::Inactive));
    }

    #[test]
    fn test_fire_and_forget() {
        let mut rig = rig(GraphKind::Cinematic, false, "intro");
        let report = rig.engine.trigger(&mut rig.graph, TriggerTarget::Node(rig.play)).unwrap().report;
        assert_eq!(report.activated, vec![rig.play, rig.completed]);
        assert_eq!(rig.graph.node_state(rig.play), Some(NodeState::Inactive));
    }

    #[test]
    fn test_unknown_sequence_fails_and_finishes() {
        let mut rig = rig(GraphKind::Cinematic, true, "missing");
        let report = rig.engine.trigger(&mut rig.graph, TriggerTarget::Node(rig.play)).unwrap().report;
        assert_eq!(report.activated, vec![rig.play, rig.failed]);
        assert_eq!(rig.graph.node_state(rig.play), Some(NodeState::Finished));
        assert_eq!(
            rig.graph.node(rig.play).unwrap().runtime.error,
            Some(ExecutionError::MissingAsset("missing".into()))
        );
        assert_eq!(report.errors().count(), 1);
    }

    #[test]
    fn test_unset_sequence_fails_and_finishes() {
        let mut rig = rig(GraphKind::Cinematic, true, "");
        let report = rig.engine.trigger(&mut rig.graph, TriggerTarget::Node(rig.play)).unwrap().report;
        assert_eq!(report.activated, vec![rig.play, rig.failed]);
        assert_eq!(rig.graph.node_state(rig.play), Some(NodeState::Finished));
        assert!(matches!(
            report.errors().next(),
            Some((_, ExecutionError::MissingProperty(name))) if name == "sequence"
        ));
        assert!(rig.player.playing().is_empty());
    }

    #[test]
    fn test_rejected_outside_cinematic_graphs() {
        let mut rig = rig(GraphKind::Flow, true, "intro");
        let report = rig.engine.trigger(&mut rig.graph, TriggerTarget::Node(rig.play)).unwrap().report;
        assert!(matches!(
            report.errors().next(),
            Some((_, ExecutionError::KindNotAllowed { .. }))
        ));
        assert!(!rig.player.is_playing("intro"));
    }

    fn spawn_rig(class: &str) -> (Engine, Arc<ActorRoster>, Graph, NodeId, NodeId, NodeId) {
        let roster = Arc::new(ActorRoster::new(["guard"], 500));
        let mut registry = BehaviorRegistry::new();
        registry.register(SpawnActor::new(roster.clone()));
        registry.register(FnBehavior::new(
            NodeDescriptor::new("test.sink", "Sink", NodeCategory::Custom)
                .input(Pin::exec_in("In")),
            |_ctx| Ok(Activation::Leave(Vec::new())),
        ));
        let engine = Engine::new(Arc::new(registry), EngineConfig::default());

        let mut graph = Graph::new("spawn").with_kind(GraphKind::Cinematic);
        let node = engine
            .registry()
            .create_node("cinematic.spawn_actor")
            .unwrap()
            .with_property("actor_class", class)
            .with_property("spawn_point", "gate");
        let spawn = graph.add_node(node).unwrap();
        let out = graph.add_node(engine.registry().create_node("test.sink").unwrap()).unwrap();
        let failed = graph.add_node(engine.registry().create_node("test.sink").unwrap()).unwrap();
        graph.connect_by_name(spawn, "Out", out, "In").unwrap();
        graph.connect_by_name(spawn, "Failed", failed, "In").unwrap();
        (engine, roster, graph, spawn, out, failed)
    }

    #[test]
    fn test_spawn_passes_entity_on() {
        let (engine, roster, mut graph, spawn, out, _) = spawn_rig("guard");
        let report = engine.trigger(&mut graph, TriggerTarget::Node(spawn)).unwrap().report;
        assert_eq!(report.activated, vec![spawn, out]);
        let signal = report.signals_from(spawn, "Out").next().unwrap();
        assert_eq!(signal.value, Some(PinValue::Entity(500)));
        assert_eq!(roster.spawned()[0].spawn_point, "gate");
        assert_eq!(graph.node_state(spawn), Some(NodeState::Inactive));
    }

    #[test]
    fn test_spawn_unknown_class_fails_and_finishes() {
        let (engine, roster, mut graph, spawn, _, failed) = spawn_rig("dragon");
        let report = engine.trigger(&mut graph, TriggerTarget::Node(spawn)).unwrap().report;
        assert_eq!(report.activated, vec![spawn, failed]);
        assert_eq!(graph.node_state(spawn), Some(NodeState::Finished));
        assert_eq!(
            graph.node(spawn).unwrap().runtime.error,
            Some(ExecutionError::MissingAsset("dragon".into()))
        );
        assert!(roster.spawned().is_empty());
    }

    #[test]
    fn test_spawn_without_class_fails() {
        let (engine, _, mut graph, spawn, _, failed) = spawn_rig("");
        let report = engine.trigger(&mut graph, TriggerTarget::Node(spawn)).unwrap().report;
        assert_eq!(report.activated, vec![spawn, failed]);
        assert!(matches!(
            report.errors().next(),
            Some((_, ExecutionError::MissingProperty(name))) if name == "actor_class"
        ));
    }

    #[test]
    fn test_cancel_stops_sequence() {
        let mut rig = rig(GraphKind::Cinematic, true, "intro");
        let epoch = rig.engine.trigger(&mut rig.graph, TriggerTarget::Node(rig.play)).unwrap().id;
        rig.engine.cancel(&mut rig.graph, epoch).unwrap();
        assert!(!rig.player.is_playing("intro"));
        assert_eq!(rig.graph.node_state(rig.completed), Some(NodeState::Inactive));
        assert_eq!(rig.graph.node_state(rig.play), Some(NodeState::Inactive));
    }
}
