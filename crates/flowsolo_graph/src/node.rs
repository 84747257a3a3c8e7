// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node definitions and the per-node activation lifecycle.

use crate::epoch::EpochId;
use crate::graph::GraphKind;
use crate::pin::{Pin, PinDirection, PinId, PinValue};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    /// Create a new random node ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Node type category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeCategory {
    /// Entry points and flow control
    Flow,
    /// Fact system
    Fact,
    /// Cinematic playback
    Cinematic,
    /// Property bindings
    Property,
    /// AI workspots
    Workspot,
    /// Debug helpers
    Debug,
    /// Custom/user-defined
    Custom,
}

/// Named property bag on a node
pub type PropertyMap = IndexMap<String, PinValue>;

/// Node type definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDescriptor {
    /// Unique type identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Category
    pub category: NodeCategory,
    /// Description
    pub description: String,
    /// Default input pins
    pub inputs: Vec<Pin>,
    /// Default output pins
    pub outputs: Vec<Pin>,
    /// Graph kinds this node may run in (empty = all)
    #[serde(default)]
    pub allowed_kinds: Vec<GraphKind>,
    /// Default property values
    #[serde(default)]
    pub properties: PropertyMap,
}

impl NodeDescriptor {
    /// Start a descriptor with no pins
    pub fn new(id: impl Into<String>, name: impl Into<String>, category: NodeCategory) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            category,
            description: String::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            allowed_kinds: Vec::new(),
            properties: PropertyMap::new(),
        }
    }

    /// Set the description
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Add an input pin
    pub fn input(mut self, pin: Pin) -> Self {
        self.inputs.push(Pin { direction: PinDirection::Input, ..pin });
        self
    }

    /// Add an output pin
    pub fn output(mut self, pin: Pin) -> Self {
        self.outputs.push(Pin { direction: PinDirection::Output, ..pin });
        self
    }

    /// Add a default property
    pub fn property(mut self, name: impl Into<String>, value: impl Into<PinValue>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Restrict the node to the given graph kinds
    pub fn only_in(mut self, kinds: impl IntoIterator<Item = GraphKind>) -> Self {
        self.allowed_kinds = kinds.into_iter().collect();
        self
    }

    /// Whether the node may run in a graph of this kind
    pub fn allows(&self, kind: GraphKind) -> bool {
        self.allowed_kinds.is_empty() || self.allowed_kinds.contains(&kind)
    }
}

/// Activation state of a node instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum NodeState {
    /// Waiting for a signal
    #[default]
    Inactive,
    /// Running its behavior
    Activating,
    /// Running, possibly waiting on an external completion
    Active,
    /// Emitting its completion signal
    Deactivating,
    /// Single-shot node that has finished (or failed)
    Finished,
}

impl NodeState {
    /// Whether the lifecycle allows moving to `next`
    pub fn can_transition_to(self, next: NodeState) -> bool {
        use NodeState::*;
        matches!(
            (self, next),
            (Inactive, Activating)
                | (Activating, Active | Finished | Inactive)
                | (Active, Deactivating | Finished | Inactive)
                | (Deactivating, Inactive)
        )
    }

    /// Whether the node is currently part of a running flow
    pub fn is_live(self) -> bool {
        matches!(self, Self::Activating | Self::Active | Self::Deactivating)
    }
}

/// Illegal lifecycle transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("invalid node transition {from:?} -> {to:?}")]
pub struct TransitionError {
    /// Current state
    pub from: NodeState,
    /// Requested state
    pub to: NodeState,
}

/// Runtime failure recorded against a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
pub enum ExecutionError {
    /// No behavior registered for the node's type
    #[error("no behavior registered for node type `{0}`")]
    UnknownBehavior(String),

    /// Node type is restricted to other graph kinds
    #[error("node type `{node_type}` is not allowed in {kind:?} graphs")]
    KindNotAllowed {
        /// Node type ID
        node_type: String,
        /// Kind of the running graph
        kind: GraphKind,
    },

    /// Behavior emitted on a pin the node does not have
    #[error("unknown output pin `{0}`")]
    UnknownOutput(String),

    /// Required property is not set
    #[error("missing property `{0}`")]
    MissingProperty(String),

    /// Referenced asset does not exist in the world
    #[error("missing asset `{0}`")]
    MissingAsset(String),

    /// Property has an unusable value
    #[error("invalid property `{name}`: {reason}")]
    InvalidProperty {
        /// Property name
        name: String,
        /// Why it was rejected
        reason: String,
    },

    /// Lifecycle violation
    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// Behavior-specific failure
    #[error("{0}")]
    Failed(String),
}

impl ExecutionError {
    /// Shorthand for a behavior failure
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Per-instance runtime data of a node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeRuntime {
    /// Lifecycle state
    pub state: NodeState,
    /// Epoch currently driving the node
    pub epoch: Option<EpochId>,
    /// Node-specific data kept between activations
    pub memory: PropertyMap,
    /// Last execution error
    pub error: Option<ExecutionError>,
}

impl NodeRuntime {
    /// Move to another lifecycle state
    pub fn transition(&mut self, to: NodeState) -> Result<(), TransitionError> {
        if !self.state.can_transition_to(to) {
            return Err(TransitionError { from: self.state, to });
        }
        tracing::trace!(from = ?self.state, to = ?to, "node transition");
        self.state = to;
        Ok(())
    }

    /// Return to a pristine, inactive runtime
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// A node instance in the graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Unique instance ID
    pub id: NodeId,
    /// Node type ID (selects the registered behavior)
    pub node_type: String,
    /// Display name (can be customized)
    pub name: String,
    /// Input pins
    pub inputs: Vec<Pin>,
    /// Output pins
    pub outputs: Vec<Pin>,
    /// Static parameters
    #[serde(default)]
    pub properties: PropertyMap,
    /// Runtime state, never part of a template
    #[serde(skip)]
    pub runtime: NodeRuntime,
}

impl Node {
    /// Create a new node from a type definition
    pub fn new(descriptor: &NodeDescriptor) -> Self {
        Self {
            id: NodeId::new(),
            node_type: descriptor.id.clone(),
            name: descriptor.name.clone(),
            inputs: descriptor.inputs.iter().map(Pin::instantiate).collect(),
            outputs: descriptor.outputs.iter().map(Pin::instantiate).collect(),
            properties: descriptor.properties.clone(),
            runtime: NodeRuntime::default(),
        }
    }

    /// Use a fixed ID
    pub fn with_id(mut self, id: NodeId) -> Self {
        self.id = id;
        self
    }

    /// Set the display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set a property
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<PinValue>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Current lifecycle state
    pub fn state(&self) -> NodeState {
        self.runtime.state
    }

    /// Get an input pin by name
    pub fn input(&self, name: &str) -> Option<&Pin> {
        self.inputs.iter().find(|p| p.name == name)
    }

    /// Get an output pin by name
    pub fn output(&self, name: &str) -> Option<&Pin> {
        self.outputs.iter().find(|p| p.name == name)
    }

    /// Get a pin by ID
    pub fn pin(&self, pin_id: PinId) -> Option<&Pin> {
        self.ports().find(|p| p.id == pin_id)
    }

    pub(crate) fn pin_mut(&mut self, pin_id: PinId) -> Option<&mut Pin> {
        self.inputs
            .iter_mut()
            .chain(self.outputs.iter_mut())
            .find(|p| p.id == pin_id)
    }

    /// Get all pins
    pub fn ports(&self) -> impl Iterator<Item = &Pin> {
        self.inputs.iter().chain(self.outputs.iter())
    }

    /// Get a property by name
    pub fn property(&self, name: &str) -> Option<&PinValue> {
        self.properties.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pin::PinType;

    fn descriptor() -> NodeDescriptor {
        NodeDescriptor::new("test.node", "Test", NodeCategory::Custom)
            .input(Pin::exec_in("In"))
            .output(Pin::exec_out("Out"))
            .property("message", "hello")
    }

    #[test]
    fn test_lifecycle_edges() {
        use NodeState::*;
        assert!(Inactive.can_transition_to(Activating));
        assert!(Activating.can_transition_to(Active));
        assert!(Active.can_transition_to(Deactivating));
        assert!(Deactivating.can_transition_to(Inactive));
        assert!(Active.can_transition_to(Finished));
        assert!(!Finished.can_transition_to(Activating));
        assert!(!Inactive.can_transition_to(Active));
        assert!(!Deactivating.can_transition_to(Finished));
    }

    #[test]
    fn test_runtime_rejects_illegal_transition() {
        let mut runtime = NodeRuntime::default();
        let err = runtime.transition(NodeState::Finished).unwrap_err();
        assert_eq!(err.from, NodeState::Inactive);
        assert_eq!(runtime.state, NodeState::Inactive);

        runtime.transition(NodeState::Activating).unwrap();
        runtime.transition(NodeState::Active).unwrap();
        assert!(runtime.state.is_live());
    }

    #[test]
    fn test_node_instances_get_fresh_pin_ids() {
        let desc = descriptor();
        let a = Node::new(&desc);
        let b = Node::new(&desc);
        assert_ne!(a.input("In").unwrap().id, b.input("In").unwrap().id);
        assert_eq!(a.property("message"), Some(&PinValue::from("hello")));
        assert_eq!(a.output("Out").unwrap().pin_type, PinType::Exec);
    }

    #[test]
    fn test_kind_restriction() {
        let open = descriptor();
        let cinematic_only = descriptor().only_in([GraphKind::Cinematic]);
        assert!(open.allows(GraphKind::Flow));
        assert!(cinematic_only.allows(GraphKind::Cinematic));
        assert!(!cinematic_only.allows(GraphKind::Flow));
    }
}
