// SPDX-License-Identifier: MIT OR Apache-2.0
//! Graph data structure containing nodes and connections.

use crate::connection::{Connection, ConnectionId};
use crate::epoch::EpochTable;
use crate::node::{Node, NodeId, NodeState};
use crate::pin::{Pin, PinDirection, PinId, PinType};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Kind of flow asset, used to restrict node types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum GraphKind {
    /// Regular gameplay flow
    #[default]
    Flow,
    /// Interaction cinematic flow
    Cinematic,
}

/// A flow graph: template structure plus per-instance runtime state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Graph {
    /// Graph name
    pub name: String,
    /// Asset kind
    #[serde(default)]
    pub kind: GraphKind,
    /// Nodes in the graph
    nodes: IndexMap<NodeId, Node>,
    /// Connections between nodes
    connections: IndexMap<ConnectionId, Connection>,
    /// Trigger epochs of this instance
    #[serde(skip)]
    epochs: EpochTable,
}

impl Graph {
    /// Create a new empty graph
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: GraphKind::default(),
            nodes: IndexMap::new(),
            connections: IndexMap::new(),
            epochs: EpochTable::default(),
        }
    }

    /// Set the graph kind
    pub fn with_kind(mut self, kind: GraphKind) -> Self {
        self.kind = kind;
        self
    }

    /// Parse a graph template from RON
    pub fn from_ron(source: &str) -> Result<Self, GraphError> {
        let mut graph: Graph =
            ron::from_str(source).map_err(|e| GraphError::Ron(e.to_string()))?;
        graph.rebuild_pin_registrations();
        graph.validate()?;
        Ok(graph)
    }

    /// Serialize the graph structure to RON
    pub fn to_ron(&self) -> Result<String, GraphError> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| GraphError::Ron(e.to_string()))
    }

    /// Fresh runtime instance of this graph (same IDs, pristine state)
    pub fn instantiate(&self) -> Self {
        let mut instance = self.clone();
        instance.reset_runtime();
        instance
    }

    /// Reset every node to `Inactive` and forget all epochs
    pub fn reset_runtime(&mut self) {
        for node in self.nodes.values_mut() {
            node.runtime.reset();
        }
        self.epochs.clear();
    }

    /// Add a node to the graph
    pub fn add_node(&mut self, node: Node) -> Result<NodeId, GraphError> {
        let id = node.id;
        if self.nodes.contains_key(&id) {
            return Err(GraphError::DuplicateNode(id));
        }
        let mut node = node;
        for pin in node.inputs.iter_mut().chain(node.outputs.iter_mut()) {
            pin.connections.clear();
        }
        self.nodes.insert(id, node);
        Ok(id)
    }

    /// Remove a node and cascade-remove its connections
    pub fn remove_node(&mut self, node_id: NodeId) -> Result<Node, GraphError> {
        let node = self
            .nodes
            .get(&node_id)
            .ok_or(GraphError::NodeNotFound(node_id))?;
        if node.state().is_live() {
            return Err(GraphError::NodeInUse(node_id));
        }

        let doomed: Vec<ConnectionId> = self
            .connections_for_node(node_id)
            .map(|c| c.id)
            .collect();
        for connection_id in doomed {
            self.disconnect(connection_id)?;
        }

        self.nodes
            .shift_remove(&node_id)
            .ok_or(GraphError::NodeNotFound(node_id))
    }

    /// Get a node by ID
    pub fn node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    /// Get a mutable node by ID
    pub fn node_mut(&mut self, node_id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&node_id)
    }

    /// Get all nodes
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub(crate) fn nodes_mut(&mut self) -> impl Iterator<Item = &mut Node> {
        self.nodes.values_mut()
    }

    /// Get all node IDs
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    /// Get the number of nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// First node with the given display name
    pub fn find_node(&self, name: &str) -> Option<NodeId> {
        self.nodes.values().find(|n| n.name == name).map(|n| n.id)
    }

    /// Nodes of a given type
    pub fn nodes_of_type<'a>(&'a self, node_type: &'a str) -> impl Iterator<Item = &'a Node> {
        self.nodes.values().filter(move |n| n.node_type == node_type)
    }

    /// Current lifecycle state of a node
    pub fn node_state(&self, node_id: NodeId) -> Option<NodeState> {
        self.nodes.get(&node_id).map(Node::state)
    }

    /// Pin of a node by name, inputs first
    pub fn pin_by_name(&self, node_id: NodeId, name: &str) -> Option<&Pin> {
        let node = self.nodes.get(&node_id)?;
        node.input(name).or_else(|| node.output(name))
    }

    /// Trigger epochs of this instance
    pub fn epochs(&self) -> &EpochTable {
        &self.epochs
    }

    pub(crate) fn epochs_mut(&mut self) -> &mut EpochTable {
        &mut self.epochs
    }

    /// Forget completed and cancelled epochs
    pub fn prune_epochs(&mut self) {
        self.epochs.prune();
    }

    /// Connect two pins by name (output on `from_node`, input on `to_node`)
    pub fn connect_by_name(
        &mut self,
        from_node: NodeId,
        from_pin: &str,
        to_node: NodeId,
        to_pin: &str,
    ) -> Result<ConnectionId, GraphError> {
        let from = self.named_pin(from_node, from_pin, PinDirection::Output)?;
        let to = self.named_pin(to_node, to_pin, PinDirection::Input)?;
        self.connect(from_node, from, to_node, to)
    }

    fn named_pin(
        &self,
        node_id: NodeId,
        name: &str,
        direction: PinDirection,
    ) -> Result<PinId, GraphError> {
        let node = self
            .nodes
            .get(&node_id)
            .ok_or(GraphError::NodeNotFound(node_id))?;
        let pin = match direction {
            PinDirection::Input => node.input(name),
            PinDirection::Output => node.output(name),
        };
        pin.map(|p| p.id)
            .ok_or_else(|| GraphError::PinNameNotFound(node_id, name.to_string()))
    }

    /// Add a connection between pins.
    ///
    /// The edit is rejected, leaving the graph untouched, if the pins have the
    /// same direction, incompatible types, or the input already has a source
    /// and does not accept merged inputs. A reversed pair (input first) is
    /// normalized to output -> input.
    pub fn connect(
        &mut self,
        from_node: NodeId,
        from_pin: PinId,
        to_node: NodeId,
        to_pin: PinId,
    ) -> Result<ConnectionId, GraphError> {
        let source_pin = self.pin(from_node, from_pin)?;
        let target_pin = self.pin(to_node, to_pin)?;

        if source_pin.direction == target_pin.direction {
            return Err(GraphError::DirectionMismatch {
                from: from_pin,
                to: to_pin,
                direction: source_pin.direction,
            });
        }

        let (from_node, from_pin, to_node, to_pin, source_pin, target_pin) =
            if source_pin.direction == PinDirection::Input {
                (to_node, to_pin, from_node, from_pin, target_pin, source_pin)
            } else {
                (from_node, from_pin, to_node, to_pin, source_pin, target_pin)
            };

        if from_node == to_node {
            return Err(GraphError::SelfLoop(from_node));
        }

        if !source_pin.pin_type.can_connect_to(&target_pin.pin_type) {
            return Err(GraphError::TypeMismatch {
                from: source_pin.pin_type.clone(),
                to: target_pin.pin_type.clone(),
            });
        }

        let candidate = Connection::new(from_node, from_pin, to_node, to_pin);
        if self.connections.values().any(|c| c.same_endpoints(&candidate)) {
            return Err(GraphError::DuplicateConnection);
        }

        if !target_pin.accepts_source() {
            return Err(GraphError::PinAlreadyConnected(to_pin));
        }

        let id = candidate.id;
        self.register(id, from_node, from_pin);
        self.register(id, to_node, to_pin);
        self.connections.insert(id, candidate);
        tracing::trace!(connection = ?id, "connected pins");
        Ok(id)
    }

    fn pin(&self, node_id: NodeId, pin_id: PinId) -> Result<&Pin, GraphError> {
        self.nodes
            .get(&node_id)
            .ok_or(GraphError::NodeNotFound(node_id))?
            .pin(pin_id)
            .ok_or(GraphError::PinNotFound(pin_id))
    }

    fn register(&mut self, connection: ConnectionId, node_id: NodeId, pin_id: PinId) {
        if let Some(pin) = self.nodes.get_mut(&node_id).and_then(|n| n.pin_mut(pin_id)) {
            pin.register(connection);
        }
    }

    fn unregister(&mut self, connection: ConnectionId, node_id: NodeId, pin_id: PinId) {
        if let Some(pin) = self.nodes.get_mut(&node_id).and_then(|n| n.pin_mut(pin_id)) {
            pin.unregister(connection);
        }
    }

    /// Remove a connection
    pub fn disconnect(&mut self, connection_id: ConnectionId) -> Result<Connection, GraphError> {
        let connection = self
            .connections
            .shift_remove(&connection_id)
            .ok_or(GraphError::ConnectionNotFound(connection_id))?;
        self.unregister(connection_id, connection.from_node, connection.from_pin);
        self.unregister(connection_id, connection.to_node, connection.to_pin);
        Ok(connection)
    }

    /// Get a connection by ID
    pub fn connection(&self, connection_id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&connection_id)
    }

    /// Get all connections
    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    /// Get connections from a specific pin, in connection order
    pub fn connections_from(&self, pin_id: PinId) -> impl Iterator<Item = &Connection> {
        self.connections.values().filter(move |c| c.from_pin == pin_id)
    }

    /// Get connections to a specific pin
    pub fn connections_to(&self, pin_id: PinId) -> impl Iterator<Item = &Connection> {
        self.connections.values().filter(move |c| c.to_pin == pin_id)
    }

    /// Get connections involving a node
    pub fn connections_for_node(&self, node_id: NodeId) -> impl Iterator<Item = &Connection> {
        self.connections.values().filter(move |c| c.involves_node(node_id))
    }

    /// Get the number of connections
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Re-derive pin connection lists from the connection table
    fn rebuild_pin_registrations(&mut self) {
        for node in self.nodes.values_mut() {
            for pin in node.inputs.iter_mut().chain(node.outputs.iter_mut()) {
                pin.connections.clear();
            }
        }
        let edges: Vec<Connection> = self.connections.values().cloned().collect();
        for c in edges {
            self.register(c.id, c.from_node, c.from_pin);
            self.register(c.id, c.to_node, c.to_pin);
        }
    }

    /// Re-check every connection against the structural rules
    pub fn validate(&self) -> Result<(), GraphError> {
        for (key, node) in &self.nodes {
            if *key != node.id {
                return Err(GraphError::DuplicateNode(node.id));
            }
        }

        for c in self.connections.values() {
            let source = self.pin(c.from_node, c.from_pin)?;
            let target = self.pin(c.to_node, c.to_pin)?;
            if c.from_node == c.to_node {
                return Err(GraphError::SelfLoop(c.from_node));
            }
            if source.direction != PinDirection::Output || target.direction != PinDirection::Input
            {
                return Err(GraphError::DirectionMismatch {
                    from: c.from_pin,
                    to: c.to_pin,
                    direction: source.direction,
                });
            }
            if !source.pin_type.can_connect_to(&target.pin_type) {
                return Err(GraphError::TypeMismatch {
                    from: source.pin_type.clone(),
                    to: target.pin_type.clone(),
                });
            }
            if !target.merge_inputs && target.connections.len() > 1 {
                return Err(GraphError::PinAlreadyConnected(c.to_pin));
            }
        }
        Ok(())
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new("Untitled")
    }
}

/// Error when editing or loading a graph
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GraphError {
    /// Node not found
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    /// Node ID already present
    #[error("Duplicate node: {0}")]
    DuplicateNode(NodeId),

    /// Pin not found
    #[error("Pin not found: {0:?}")]
    PinNotFound(PinId),

    /// Pin name not found on a node
    #[error("Pin `{1}` not found on node {0}")]
    PinNameNotFound(NodeId, String),

    /// Connection not found
    #[error("Connection not found: {0:?}")]
    ConnectionNotFound(ConnectionId),

    /// Incompatible pin types
    #[error("Type mismatch: {from:?} cannot connect to {to:?}")]
    TypeMismatch {
        /// Source type
        from: PinType,
        /// Target type
        to: PinType,
    },

    /// Both pins face the same way
    #[error("Direction mismatch: both pins are {direction:?}")]
    DirectionMismatch {
        /// First pin
        from: PinId,
        /// Second pin
        to: PinId,
        /// Shared direction
        direction: PinDirection,
    },

    /// Input already has a source and does not merge
    #[error("Pin already connected: {0:?}")]
    PinAlreadyConnected(PinId),

    /// The same pins are already connected
    #[error("Connection already exists")]
    DuplicateConnection,

    /// Self-loop not allowed
    #[error("Self-loop not allowed on node {0}")]
    SelfLoop(NodeId),

    /// Node is part of a running flow
    #[error("Node in use: {0}")]
    NodeInUse(NodeId),

    /// Template could not be parsed or written
    #[error("RON error: {0}")]
    Ron(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NodeCategory, NodeDescriptor};
    use crate::pin::PinValue;

    fn relay() -> NodeDescriptor {
        NodeDescriptor::new("test.relay", "Relay", NodeCategory::Custom)
            .input(Pin::exec_in("In"))
            .input(Pin::input("Value", PinType::Int))
            .output(Pin::exec_out("Out"))
            .output(Pin::output("Result", PinType::Int))
            .output(Pin::output("Flag", PinType::Bool))
    }

    fn pair() -> (Graph, NodeId, NodeId) {
        let mut graph = Graph::new("test");
        let a = graph.add_node(Node::new(&relay())).unwrap();
        let b = graph.add_node(Node::new(&relay())).unwrap();
        (graph, a, b)
    }

    #[test]
    fn test_connect_registers_on_both_pins() {
        let (mut graph, a, b) = pair();
        let id = graph.connect_by_name(a, "Out", b, "In").unwrap();

        assert_eq!(graph.node(a).unwrap().output("Out").unwrap().connections(), &[id]);
        assert_eq!(graph.node(b).unwrap().input("In").unwrap().connections(), &[id]);
        assert_eq!(graph.connection_count(), 1);
    }

    #[test]
    fn test_pin_by_name() {
        let (graph, a, _) = pair();
        let value = graph.pin_by_name(a, "Value").unwrap();
        assert_eq!(value.direction(), PinDirection::Input);
        assert_eq!(graph.pin_by_name(a, "Flag").unwrap().pin_type(), &PinType::Bool);
        assert!(graph.pin_by_name(a, "Missing").is_none());
    }

    #[test]
    fn test_type_mismatch_leaves_graph_untouched() {
        let (mut graph, a, b) = pair();
        let err = graph.connect_by_name(a, "Flag", b, "Value").unwrap_err();
        assert!(matches!(err, GraphError::TypeMismatch { .. }));
        assert_eq!(graph.connection_count(), 0);
        assert!(!graph.node(a).unwrap().output("Flag").unwrap().is_connected());
        assert!(!graph.node(b).unwrap().input("Value").unwrap().is_connected());
    }

    #[test]
    fn test_direction_mismatch() {
        let (mut graph, a, b) = pair();
        let out_a = graph.node(a).unwrap().output("Out").unwrap().id;
        let out_b = graph.node(b).unwrap().output("Out").unwrap().id;
        let err = graph.connect(a, out_a, b, out_b).unwrap_err();
        assert!(matches!(
            err,
            GraphError::DirectionMismatch { direction: PinDirection::Output, .. }
        ));
    }

    #[test]
    fn test_reversed_pair_is_normalized() {
        let (mut graph, a, b) = pair();
        let in_b = graph.node(b).unwrap().input("In").unwrap().id;
        let out_a = graph.node(a).unwrap().output("Out").unwrap().id;
        let id = graph.connect(b, in_b, a, out_a).unwrap();
        let c = graph.connection(id).unwrap();
        assert_eq!((c.from_node, c.to_node), (a, b));
    }

    #[test]
    fn test_single_source_rule() {
        let (mut graph, a, b) = pair();
        let c = graph.add_node(Node::new(&relay())).unwrap();
        graph.connect_by_name(a, "Result", c, "Value").unwrap();
        let err = graph.connect_by_name(b, "Result", c, "Value").unwrap_err();
        assert!(matches!(err, GraphError::PinAlreadyConnected(_)));
    }

    #[test]
    fn test_merged_input_accepts_many_sources() {
        let merge = NodeDescriptor::new("test.merge", "Merge", NodeCategory::Custom)
            .input(Pin::exec_in("In").merged());
        let (mut graph, a, b) = pair();
        let m = graph.add_node(Node::new(&merge)).unwrap();
        graph.connect_by_name(a, "Out", m, "In").unwrap();
        graph.connect_by_name(b, "Out", m, "In").unwrap();
        assert_eq!(graph.node(m).unwrap().input("In").unwrap().connections().len(), 2);
    }

    #[test]
    fn test_self_loop_and_duplicate_rejected() {
        let (mut graph, a, b) = pair();
        assert!(matches!(
            graph.connect_by_name(a, "Out", a, "In"),
            Err(GraphError::SelfLoop(_))
        ));
        let merge = NodeDescriptor::new("test.merge", "Merge", NodeCategory::Custom)
            .input(Pin::exec_in("In").merged());
        let m = graph.add_node(Node::new(&merge)).unwrap();
        graph.connect_by_name(b, "Out", m, "In").unwrap();
        assert_eq!(
            graph.connect_by_name(b, "Out", m, "In"),
            Err(GraphError::DuplicateConnection)
        );
    }

    #[test]
    fn test_remove_node_cascades() {
        let (mut graph, a, b) = pair();
        graph.connect_by_name(a, "Out", b, "In").unwrap();
        graph.remove_node(b).unwrap();
        assert_eq!(graph.connection_count(), 0);
        assert!(!graph.node(a).unwrap().output("Out").unwrap().is_connected());
    }

    #[test]
    fn test_remove_live_node_fails() {
        let (mut graph, a, b) = pair();
        graph.connect_by_name(a, "Out", b, "In").unwrap();
        graph.node_mut(b).unwrap().runtime.state = NodeState::Active;
        assert!(matches!(graph.remove_node(b), Err(GraphError::NodeInUse(id)) if id == b));
        assert_eq!(graph.connection_count(), 1);
    }

    #[test]
    fn test_disconnect_unregisters() {
        let (mut graph, a, b) = pair();
        let id = graph.connect_by_name(a, "Out", b, "In").unwrap();
        graph.disconnect(id).unwrap();
        assert!(!graph.node(b).unwrap().input("In").unwrap().is_connected());
        assert_eq!(graph.disconnect(id), Err(GraphError::ConnectionNotFound(id)));
    }

    #[test]
    fn test_ron_round_trip_restores_registrations() {
        let (mut graph, a, b) = pair();
        graph.node_mut(a).unwrap().properties.insert("n".into(), PinValue::Int(3));
        graph.connect_by_name(a, "Out", b, "In").unwrap();
        let text = graph.to_ron().unwrap();
        let loaded = Graph::from_ron(&text).unwrap();
        assert_eq!(loaded.node_count(), 2);
        assert_eq!(loaded.node(b).unwrap().input("In").unwrap().connections().len(), 1);
        assert_eq!(loaded.node(a).unwrap().property("n"), Some(&PinValue::Int(3)));
    }

    #[test]
    fn test_instantiate_resets_runtime() {
        let (mut graph, a, _) = pair();
        graph.node_mut(a).unwrap().runtime.state = NodeState::Finished;
        let instance = graph.instantiate();
        assert_eq!(instance.node_state(a), Some(NodeState::Inactive));
        assert_eq!(graph.node_state(a), Some(NodeState::Finished));
    }

    mod prop_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_pin_type() -> BoxedStrategy<PinType> {
            prop_oneof![
                Just(PinType::Exec),
                Just(PinType::Bool),
                Just(PinType::Int),
                Just(PinType::Float),
                Just(PinType::String),
                Just(PinType::Name),
                Just(PinType::Entity),
                Just(PinType::Any),
                "[a-b]".prop_map(PinType::Custom),
            ]
            .boxed()
        }

        /// Two nodes: `from` has output `Out: source`, `to` has input `In: target`
        fn typed_pair(source: PinType, target: PinType) -> (Graph, NodeId, PinId, NodeId, PinId) {
            let mut graph = Graph::new("typed");
            let from = Node::new(
                &NodeDescriptor::new("test.source", "Source", NodeCategory::Custom)
                    .output(Pin::output("Out", source)),
            );
            let to = Node::new(
                &NodeDescriptor::new("test.target", "Target", NodeCategory::Custom)
                    .input(Pin::input("In", target)),
            );
            let from_pin = from.output("Out").unwrap().id;
            let to_pin = to.input("In").unwrap().id;
            let from = graph.add_node(from).unwrap();
            let to = graph.add_node(to).unwrap();
            (graph, from, from_pin, to, to_pin)
        }

        proptest! {
            /// Compatible pairs register the connection on both pins;
            /// incompatible pairs fail with `TypeMismatch` and change nothing.
            #[test]
            fn prop_connect_registers_or_leaves_untouched(
                source in arb_pin_type(),
                target in arb_pin_type(),
            ) {
                let compatible = source.can_connect_to(&target);
                let (mut graph, from, from_pin, to, to_pin) = typed_pair(source, target);

                match graph.connect(from, from_pin, to, to_pin) {
                    Ok(id) => {
                        prop_assert!(compatible);
                        prop_assert_eq!(graph.connection_count(), 1);
                        let out = graph.pin_by_name(from, "Out").unwrap();
                        let inp = graph.pin_by_name(to, "In").unwrap();
                        prop_assert_eq!(out.connections(), &[id][..]);
                        prop_assert_eq!(inp.connections(), &[id][..]);
                    }
                    Err(err) => {
                        prop_assert!(!compatible);
                        prop_assert!(matches!(err, GraphError::TypeMismatch { .. }), "{:?}", err);
                        prop_assert_eq!(graph.connection_count(), 0);
                        prop_assert!(!graph.pin_by_name(from, "Out").unwrap().is_connected());
                        prop_assert!(!graph.pin_by_name(to, "In").unwrap().is_connected());
                    }
                }
            }
        }
    }
}
