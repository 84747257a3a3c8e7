// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node extension API.
//!
//! Plugins describe their node types with a [`NodeDescriptor`] and implement
//! [`NodeBehavior`]; the engine only ever talks to this trait. Behaviors are
//! registered in a [`BehaviorRegistry`] keyed by type ID.

use crate::epoch::EpochId;
use crate::graph::GraphKind;
use crate::node::{ExecutionError, Node, NodeCategory, NodeDescriptor, NodeId, PropertyMap};
use crate::pin::PinValue;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Signal emitted on an output pin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// Output pin name
    pub pin: String,
    /// Value carried along the connection
    pub value: Option<PinValue>,
}

impl Signal {
    /// Plain execution signal
    pub fn exec(pin: impl Into<String>) -> Self {
        Self {
            pin: pin.into(),
            value: None,
        }
    }

    /// Signal carrying a value
    pub fn with_value(pin: impl Into<String>, value: impl Into<PinValue>) -> Self {
        Self {
            pin: pin.into(),
            value: Some(value.into()),
        }
    }
}

/// What a node does after running its behavior
#[derive(Debug, Clone, PartialEq)]
pub enum Activation {
    /// Emit, then deactivate back to `Inactive`
    Leave(Vec<Signal>),
    /// Emit and remain `Active`, awaiting an event or tick
    Stay(Vec<Signal>),
    /// Emit, then enter the terminal `Finished` state
    Finish(Vec<Signal>),
    /// Emit, then finish with the error recorded on the node
    Fail(Vec<Signal>, ExecutionError),
}

impl Activation {
    /// Leave through a single output
    pub fn leave(pin: impl Into<String>) -> Self {
        Self::Leave(vec![Signal::exec(pin)])
    }

    /// Stay active without emitting
    pub fn stay() -> Self {
        Self::Stay(Vec::new())
    }

    /// Finish without emitting
    pub fn finish() -> Self {
        Self::Finish(Vec::new())
    }

    /// Fail through a single output, keeping the error
    pub fn fail(pin: impl Into<String>, error: ExecutionError) -> Self {
        Self::Fail(vec![Signal::exec(pin)], error)
    }

    /// Signals to emit
    pub fn signals(&self) -> &[Signal] {
        match self {
            Self::Leave(s) | Self::Stay(s) | Self::Finish(s) | Self::Fail(s, _) => s,
        }
    }
}

/// External event delivered to active nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowEvent {
    /// Event name, e.g. `cinematic.finished`
    pub name: String,
    /// Event arguments
    #[serde(default)]
    pub payload: PropertyMap,
}

impl FlowEvent {
    /// Event without payload
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: PropertyMap::new(),
        }
    }

    /// Add a payload entry
    pub fn with(mut self, key: impl Into<String>, value: impl Into<PinValue>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Payload entry by key
    pub fn get(&self, key: &str) -> Option<&PinValue> {
        self.payload.get(key)
    }

    /// Whether the event has this name
    pub fn is(&self, name: &str) -> bool {
        self.name == name
    }
}

/// View of a node handed to its behavior
pub struct NodeContext<'a> {
    /// Node being run
    pub node_id: NodeId,
    /// Node display name
    pub node_name: &'a str,
    /// Kind of the owning graph
    pub graph_kind: GraphKind,
    /// Epoch driving this call
    pub epoch: Option<EpochId>,
    /// Input pin that fired (None for root triggers, events and ticks)
    pub input: Option<&'a str>,
    /// Value carried by the incoming signal
    pub value: Option<&'a PinValue>,
    /// Static node properties
    pub properties: &'a PropertyMap,
    /// Node memory, persisted by snapshots
    pub memory: &'a mut PropertyMap,
}

impl<'a> NodeContext<'a> {
    pub(crate) fn new(
        node: &'a mut Node,
        graph_kind: GraphKind,
        epoch: Option<EpochId>,
        input: Option<&'a str>,
        value: Option<&'a PinValue>,
    ) -> Self {
        Self {
            node_id: node.id,
            node_name: &node.name,
            graph_kind,
            epoch,
            input,
            value,
            properties: &node.properties,
            memory: &mut node.runtime.memory,
        }
    }

    /// Whether the call came through the named input
    pub fn fired(&self, pin: &str) -> bool {
        self.input == Some(pin)
    }

    /// Property by name
    pub fn property(&self, name: &str) -> Option<&PinValue> {
        self.properties.get(name)
    }

    /// String property that must be present and non-empty
    pub fn require_str(&self, name: &str) -> Result<&str, ExecutionError> {
        match self.properties.get(name) {
            None => Err(ExecutionError::MissingProperty(name.to_string())),
            Some(value) => match value.as_str() {
                Some("") => Err(ExecutionError::MissingProperty(name.to_string())),
                Some(s) => Ok(s),
                None => Err(ExecutionError::InvalidProperty {
                    name: name.to_string(),
                    reason: format!("expected a string, got {:?}", value.pin_type()),
                }),
            },
        }
    }

    /// Integer property that must be present
    pub fn require_int(&self, name: &str) -> Result<i64, ExecutionError> {
        let value = self
            .properties
            .get(name)
            .ok_or_else(|| ExecutionError::MissingProperty(name.to_string()))?;
        value.as_int().ok_or_else(|| ExecutionError::InvalidProperty {
            name: name.to_string(),
            reason: format!("expected an integer, got {:?}", value.pin_type()),
        })
    }

    /// Float property with a fallback
    pub fn float_or(&self, name: &str, default: f64) -> f64 {
        self.properties
            .get(name)
            .and_then(PinValue::as_float)
            .unwrap_or(default)
    }

    /// Boolean property with a fallback
    pub fn bool_or(&self, name: &str, default: bool) -> bool {
        self.properties
            .get(name)
            .and_then(PinValue::as_bool)
            .unwrap_or(default)
    }

    /// Memory entry by key
    pub fn recall(&self, key: &str) -> Option<&PinValue> {
        self.memory.get(key)
    }

    /// Store a memory entry
    pub fn remember(&mut self, key: impl Into<String>, value: impl Into<PinValue>) {
        self.memory.insert(key.into(), value.into());
    }

    /// Remove a memory entry
    pub fn forget(&mut self, key: &str) -> Option<PinValue> {
        self.memory.shift_remove(key)
    }
}

/// Behavior of a node type
pub trait NodeBehavior: Send + Sync {
    /// Type definition (ID, pins, defaults)
    fn descriptor(&self) -> NodeDescriptor;

    /// Run the node for an incoming signal
    fn activate(&self, ctx: &mut NodeContext<'_>) -> Result<Activation, ExecutionError>;

    /// React to an external event while `Active`
    fn on_event(
        &self,
        _ctx: &mut NodeContext<'_>,
        _event: &FlowEvent,
    ) -> Result<Option<Activation>, ExecutionError> {
        Ok(None)
    }

    /// Advance time while `Active`
    fn tick(
        &self,
        _ctx: &mut NodeContext<'_>,
        _delta: Duration,
    ) -> Result<Option<Activation>, ExecutionError> {
        Ok(None)
    }

    /// Release external resources when the node is cancelled
    fn cleanup(&self, _ctx: &mut NodeContext<'_>) {}
}

/// Behavior built from a closure
pub struct FnBehavior<F> {
    descriptor: NodeDescriptor,
    activate: F,
}

impl<F> FnBehavior<F>
where
    F: Fn(&mut NodeContext<'_>) -> Result<Activation, ExecutionError> + Send + Sync,
{
    /// Wrap a closure as a behavior
    pub fn new(descriptor: NodeDescriptor, activate: F) -> Self {
        Self {
            descriptor,
            activate,
        }
    }
}

impl<F> NodeBehavior for FnBehavior<F>
where
    F: Fn(&mut NodeContext<'_>) -> Result<Activation, ExecutionError> + Send + Sync,
{
    fn descriptor(&self) -> NodeDescriptor {
        self.descriptor.clone()
    }

    fn activate(&self, ctx: &mut NodeContext<'_>) -> Result<Activation, ExecutionError> {
        (self.activate)(ctx)
    }
}

struct Registered {
    descriptor: NodeDescriptor,
    behavior: Arc<dyn NodeBehavior>,
}

/// Registry of available node behaviors
#[derive(Default)]
pub struct BehaviorRegistry {
    /// Registered behaviors by type ID
    entries: IndexMap<String, Registered>,
}

impl BehaviorRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a behavior, replacing any previous one with the same type ID
    pub fn register(&mut self, behavior: impl NodeBehavior + 'static) {
        self.register_arc(Arc::new(behavior));
    }

    /// Register a shared behavior
    pub fn register_arc(&mut self, behavior: Arc<dyn NodeBehavior>) {
        let descriptor = behavior.descriptor();
        tracing::debug!(node_type = %descriptor.id, "registered node behavior");
        self.entries.insert(
            descriptor.id.clone(),
            Registered {
                descriptor,
                behavior,
            },
        );
    }

    /// Get a behavior by type ID
    pub fn get(&self, id: &str) -> Option<&Arc<dyn NodeBehavior>> {
        self.entries.get(id).map(|r| &r.behavior)
    }

    /// Get a node type by ID
    pub fn descriptor(&self, id: &str) -> Option<&NodeDescriptor> {
        self.entries.get(id).map(|r| &r.descriptor)
    }

    /// Whether a type ID is registered
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Get all registered types
    pub fn descriptors(&self) -> impl Iterator<Item = &NodeDescriptor> {
        self.entries.values().map(|r| &r.descriptor)
    }

    /// Get types by category
    pub fn descriptors_in_category(
        &self,
        category: NodeCategory,
    ) -> impl Iterator<Item = &NodeDescriptor> {
        self.descriptors().filter(move |d| d.category == category)
    }

    /// Types usable in a graph kind
    pub fn descriptors_for_kind(&self, kind: GraphKind) -> impl Iterator<Item = &NodeDescriptor> {
        self.descriptors().filter(move |d| d.allows(kind))
    }

    /// Create a node from a type ID
    pub fn create_node(&self, type_id: &str) -> Option<Node> {
        self.descriptor(type_id).map(Node::new)
    }

    /// Number of registered types
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
