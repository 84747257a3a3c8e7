// SPDX-License-Identifier: MIT OR Apache-2.0
//! Flow control nodes: entry points, terminal nodes and sequencing.

use flowsolo_graph::{
    Activation, ExecutionError, NodeBehavior, NodeCategory, NodeContext, NodeDescriptor, Pin,
    Signal,
};

/// Number of outputs on `flow.sequence`
pub const SEQUENCE_OUTPUTS: usize = 4;

/// `flow.start`: root node the host triggers directly
pub struct Start;

impl NodeBehavior for Start {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::new("flow.start", "Start", NodeCategory::Flow)
            .describe("Entry point triggered by the host")
            .output(Pin::exec_out("Out"))
    }

    fn activate(&self, ctx: &mut NodeContext<'_>) -> Result<Activation, ExecutionError> {
        tracing::debug!(node = %ctx.node_name, "flow started");
        Ok(Activation::leave("Out"))
    }
}

/// `flow.finish`: single-shot terminal node
pub struct Finish;

impl NodeBehavior for Finish {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::new("flow.finish", "Finish", NodeCategory::Flow)
            .describe("Ends the flow; ignores later signals")
            .input(Pin::exec_in("In").merged())
    }

    fn activate(&self, ctx: &mut NodeContext<'_>) -> Result<Activation, ExecutionError> {
        tracing::info!(node = %ctx.node_name, epoch = ?ctx.epoch, "flow finished");
        Ok(Activation::finish())
    }
}

/// `flow.sequence`: fire `Then 0`, `Then 1`, ... in order
pub struct Sequence;

impl Sequence {
    fn output_name(index: usize) -> String {
        format!("Then {index}")
    }
}

impl NodeBehavior for Sequence {
    fn descriptor(&self) -> NodeDescriptor {
        (0..SEQUENCE_OUTPUTS).fold(
            NodeDescriptor::new("flow.sequence", "Sequence", NodeCategory::Flow)
                .describe("Fire each output in order")
                .input(Pin::exec_in("In").merged()),
            |desc, i| desc.output(Pin::exec_out(Self::output_name(i))),
        )
    }

    fn activate(&self, _ctx: &mut NodeContext<'_>) -> Result<Activation, ExecutionError> {
        Ok(Activation::Leave(
            (0..SEQUENCE_OUTPUTS)
                .map(|i| Signal::exec(Self::output_name(i)))
                .collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowsolo_graph::{
        BehaviorRegistry, Engine, EngineConfig, Graph, NodeState, TriggerTarget,
    };
    use std::sync::Arc;

    fn engine() -> Engine {
        let mut registry = BehaviorRegistry::new();
        registry.register(Start);
        registry.register(Finish);
        registry.register(Sequence);
        Engine::new(Arc::new(registry), EngineConfig::default())
    }

    #[test]
    fn test_sequence_fires_in_order() {
        let engine = engine();
        let mut graph = Graph::new("seq");
        let start = graph.add_node(engine.registry().create_node("flow.start").unwrap()).unwrap();
        let seq = graph.add_node(engine.registry().create_node("flow.sequence").unwrap()).unwrap();
        let first = graph.add_node(engine.registry().create_node("flow.finish").unwrap()).unwrap();
        let second = graph.add_node(engine.registry().create_node("flow.finish").unwrap()).unwrap();
        graph.connect_by_name(start, "Out", seq, "In").unwrap();
        graph.connect_by_name(seq, "Then 1", second, "In").unwrap();
        graph.connect_by_name(seq, "Then 0", first, "In").unwrap();

        let report = engine.trigger(&mut graph, TriggerTarget::Node(start)).unwrap().report;
        assert_eq!(report.activated, vec![start, seq, first, second]);
        assert_eq!(graph.node_state(first), Some(NodeState::Finished));
        assert_eq!(graph.node_state(second), Some(NodeState::Finished));
    }

    #[test]
    fn test_finish_is_single_shot() {
        let engine = engine();
        let mut graph = Graph::new("once");
        let start = graph.add_node(engine.registry().create_node("flow.start").unwrap()).unwrap();
        let end = graph.add_node(engine.registry().create_node("flow.finish").unwrap()).unwrap();
        graph.connect_by_name(start, "Out", end, "In").unwrap();

        engine.trigger(&mut graph, TriggerTarget::Node(start)).unwrap();
        let again = engine.trigger(&mut graph, TriggerTarget::Node(start)).unwrap().report;
        assert_eq!(again.activated, vec![start]);
        assert_eq!(again.signals.len(), 1);
    }
}
