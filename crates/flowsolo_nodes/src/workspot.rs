// SPDX-License-Identifier: MIT OR Apache-2.0
//! Workspot node: send an actor to a workspot and wait until it is done.

use crate::services::WorkspotManager;
use flowsolo_graph::{
    Activation, ExecutionError, FlowEvent, NodeBehavior, NodeCategory, NodeContext,
    NodeDescriptor, Pin, PinValue, Signal,
};
use std::sync::Arc;

/// Event sent by the host when an actor leaves its workspot; payload `actor`
pub const WORKSPOT_FINISHED: &str = "workspot.finished";

const ACTOR: &str = "actor";

/// `workspot.assign`: `Start` sends the actor in, `Stop` pulls it out
pub struct AssignWorkspot {
    manager: Arc<dyn WorkspotManager>,
}

impl AssignWorkspot {
    /// Create the behavior over a workspot manager
    pub fn new(manager: Arc<dyn WorkspotManager>) -> Self {
        Self { manager }
    }

    fn actor(ctx: &NodeContext<'_>) -> Result<u64, ExecutionError> {
        let raw = ctx.require_int("actor")?;
        u64::try_from(raw).map_err(|_| ExecutionError::InvalidProperty {
            name: "actor".into(),
            reason: format!("actor IDs are non-negative, got {raw}"),
        })
    }

    fn start(&self, ctx: &mut NodeContext<'_>) -> Result<Activation, ExecutionError> {
        let actor = Self::actor(ctx)?;
        let workspot = match ctx.require_str("workspot") {
            Ok(workspot) => workspot.to_string(),
            Err(error) => return Ok(Activation::fail("Failed", error)),
        };
        if let Err(err) = self.manager.start(actor, &workspot) {
            tracing::warn!(node = %ctx.node_name, actor, %workspot, %err, "workspot refused");
            return Ok(Activation::fail("Failed", err.into()));
        }
        tracing::info!(node = %ctx.node_name, actor, %workspot, "workspot started");
        ctx.remember(ACTOR, PinValue::Entity(actor));
        Ok(Activation::Stay(vec![Signal::exec("Started")]))
    }

    fn stop(&self, ctx: &mut NodeContext<'_>) -> Result<Activation, ExecutionError> {
        let Some(actor) = ctx.forget(ACTOR).and_then(|v| v.as_entity()) else {
            tracing::debug!(node = %ctx.node_name, "stop without a running workspot");
            return Ok(Activation::Leave(Vec::new()));
        };
        self.manager.stop(actor, ctx.bool_or("force_stop", false));
        Ok(Activation::leave("Finished"))
    }
}

impl NodeBehavior for AssignWorkspot {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::new("workspot.assign", "Assign Workspot", NodeCategory::Workspot)
            .describe("Send an actor to a workspot")
            .input(Pin::exec_in("Start").merged())
            .input(Pin::exec_in("Stop").merged())
            .output(Pin::exec_out("Started"))
            .output(Pin::exec_out("Finished"))
            .output(Pin::exec_out("Failed"))
            .property("actor", 0_i64)
            .property("workspot", "")
            .property("force_stop", false)
    }

    fn activate(&self, ctx: &mut NodeContext<'_>) -> Result<Activation, ExecutionError> {
        if ctx.fired("Stop") {
            return self.stop(ctx);
        }
        if ctx.recall(ACTOR).is_some() {
            tracing::debug!(node = %ctx.node_name, "workspot already running");
            return Ok(Activation::stay());
        }
        self.start(ctx)
    }

    fn on_event(
        &self,
        ctx: &mut NodeContext<'_>,
        event: &FlowEvent,
    ) -> Result<Option<Activation>, ExecutionError> {
        if !event.is(WORKSPOT_FINISHED) {
            return Ok(None);
        }
        let finished = event.get("actor").and_then(PinValue::as_entity);
        let ours = ctx.recall(ACTOR).and_then(PinValue::as_entity);
        if finished.is_none() || finished != ours {
            return Ok(None);
        }
        ctx.forget(ACTOR);
        Ok(Some(Activation::leave("Finished")))
    }

    fn cleanup(&self, ctx: &mut NodeContext<'_>) {
        if let Some(actor) = ctx.forget(ACTOR).and_then(|v| v.as_entity()) {
            self.manager.stop(actor, true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::WorkspotBoard;
    use flowsolo_graph::{
        BehaviorRegistry, Engine, EngineConfig, EpochStatus, Graph, NodeId, NodeState,
        TriggerTarget,
    };

    fn setup(board: Arc<WorkspotBoard>, actor: i64) -> (Engine, Graph, NodeId) {
        let mut registry = BehaviorRegistry::new();
        registry.register(AssignWorkspot::new(board));
        let engine = Engine::new(Arc::new(registry), EngineConfig::default());
        let mut graph = Graph::new("work");
        let node = engine
            .registry()
            .create_node("workspot.assign")
            .unwrap()
            .with_property("actor", actor)
            .with_property("workspot", "forge");
        let id = graph.add_node(node).unwrap();
        (engine, graph, id)
    }

    fn start(node: NodeId) -> TriggerTarget {
        TriggerTarget::Pin { node, pin: "Start".into() }
    }

    #[test]
    fn test_finished_event_releases_node() {
        let board = Arc::new(WorkspotBoard::new(["forge"]));
        let (engine, mut graph, node) = setup(board.clone(), 4);
        engine.trigger(&mut graph, start(node)).unwrap();
        assert_eq!(graph.node_state(node), Some(NodeState::Active));
        assert_eq!(board.current(4).as_deref(), Some("forge"));

        let other = FlowEvent::new(WORKSPOT_FINISHED).with("actor", PinValue::Entity(5));
        engine.broadcast(&mut graph, &other);
        assert_eq!(graph.node_state(node), Some(NodeState::Active));

        let done = FlowEvent::new(WORKSPOT_FINISHED).with("actor", PinValue::Entity(4));
        engine.broadcast(&mut graph, &done);
        assert_eq!(graph.node_state(node), Some(NodeState::Inactive));
    }

    #[test]
    fn test_stop_input_pulls_actor_out() {
        let board = Arc::new(WorkspotBoard::new(["forge"]));
        let (engine, mut graph, node) = setup(board.clone(), 4);
        let first = engine.trigger(&mut graph, start(node)).unwrap().id;

        engine
            .trigger(&mut graph, TriggerTarget::Pin { node, pin: "Stop".into() })
            .unwrap();
        assert_eq!(graph.node_state(node), Some(NodeState::Inactive));
        assert!(board.current(4).is_none());
        assert_eq!(graph.epochs().get(first).unwrap().status, EpochStatus::Completed);
    }

    #[test]
    fn test_unknown_workspot_fails_and_finishes() {
        let board = Arc::new(WorkspotBoard::new(["mill"]));
        let (engine, mut graph, node) = setup(board.clone(), 4);
        let report = engine.trigger(&mut graph, start(node)).unwrap().report;
        assert_eq!(graph.node_state(node), Some(NodeState::Finished));
        assert_eq!(
            graph.node(node).unwrap().runtime.error,
            Some(ExecutionError::MissingAsset("forge".into()))
        );
        assert_eq!(report.errors().count(), 1);
        assert!(board.current(4).is_none());
    }

    #[test]
    fn test_occupied_workspot_fires_failed() {
        let board = Arc::new(WorkspotBoard::new(["forge"]));
        board.start(9, "forge").unwrap();
        let mut registry = BehaviorRegistry::new();
        registry.register(AssignWorkspot::new(board));
        registry.register(flowsolo_graph::FnBehavior::new(
            NodeDescriptor::new("test.sink", "Sink", NodeCategory::Custom)
                .input(Pin::exec_in("In")),
            |_ctx| Ok(Activation::Leave(Vec::new())),
        ));
        let engine = Engine::new(Arc::new(registry), EngineConfig::default());
        let mut graph = Graph::new("busy");
        let node = engine
            .registry()
            .create_node("workspot.assign")
            .unwrap()
            .with_property("actor", 4_i64)
            .with_property("workspot", "forge");
        let node = graph.add_node(node).unwrap();
        let sink = graph.add_node(engine.registry().create_node("test.sink").unwrap()).unwrap();
        graph.connect_by_name(node, "Failed", sink, "In").unwrap();

        let report = engine.trigger(&mut graph, start(node)).unwrap().report;
        assert_eq!(report.activated, vec![node, sink]);
        assert_eq!(graph.node_state(node), Some(NodeState::Finished));
        assert!(matches!(
            report.errors().next(),
            Some((_, ExecutionError::Failed(reason))) if reason.contains("occupied")
        ));
    }

    #[test]
    fn test_negative_actor_is_invalid() {
        let board = Arc::new(WorkspotBoard::new(["forge"]));
        let (engine, mut graph, node) = setup(board, -1);
        let report = engine.trigger(&mut graph, start(node)).unwrap().report;
        assert!(matches!(
            report.errors().next(),
            Some((_, ExecutionError::InvalidProperty { .. }))
        ));
    }
}
