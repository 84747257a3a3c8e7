// SPDX-License-Identifier: MIT OR Apache-2.0
//! Property bindings: write values onto entity properties from a flow.

use flowsolo_graph::{
    Activation, ExecutionError, NodeBehavior, NodeCategory, NodeContext, NodeDescriptor, Pin,
    PinType, PinValue,
};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Entity ID for binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId(pub u64);

/// Binding of a value to an entity property
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityBinding {
    /// Target entity ID
    pub entity_id: EntityId,
    /// Component type name
    pub component: String,
    /// Property path within component
    pub property_path: String,
}

impl EntityBinding {
    /// Create a binding to a property
    pub fn property(
        entity_id: EntityId,
        component: impl Into<String>,
        property_path: impl Into<String>,
    ) -> Self {
        Self {
            entity_id,
            component: component.into(),
            property_path: property_path.into(),
        }
    }
}

impl std::fmt::Display for EntityBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.entity_id.0, self.component, self.property_path)
    }
}

/// Storage for bound entity properties
pub trait PropertyStore: Send + Sync {
    /// Write a value
    fn write(&self, binding: &EntityBinding, value: PinValue);

    /// Read a value back
    fn read(&self, binding: &EntityBinding) -> Option<PinValue>;
}

/// In-memory property storage
#[derive(Debug, Default)]
pub struct PropertyTable {
    values: RwLock<IndexMap<EntityBinding, PinValue>>,
}

impl PropertyTable {
    /// Number of stored values
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    /// Whether nothing has been written
    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

impl PropertyStore for PropertyTable {
    fn write(&self, binding: &EntityBinding, value: PinValue) {
        tracing::debug!(%binding, ?value, "property written");
        self.values.write().insert(binding.clone(), value);
    }

    fn read(&self, binding: &EntityBinding) -> Option<PinValue> {
        self.values.read().get(binding).cloned()
    }
}

/// `property.bind`: write a value through a binding, then continue.
///
/// The value comes from the last signal on the `Value` input, falling back to
/// the `value` property.
pub struct BindProperty {
    store: Arc<dyn PropertyStore>,
}

impl BindProperty {
    /// Create the behavior over a property store
    pub fn new(store: Arc<dyn PropertyStore>) -> Self {
        Self { store }
    }

    fn binding(ctx: &NodeContext<'_>) -> Result<EntityBinding, ExecutionError> {
        let raw = ctx.require_int("entity")?;
        let entity = u64::try_from(raw).map_err(|_| ExecutionError::InvalidProperty {
            name: "entity".into(),
            reason: format!("entity IDs are non-negative, got {raw}"),
        })?;
        Ok(EntityBinding::property(
            EntityId(entity),
            ctx.require_str("component")?,
            ctx.require_str("property_path")?,
        ))
    }
}

impl NodeBehavior for BindProperty {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::new("property.bind", "Bind Property", NodeCategory::Property)
            .describe("Write a value onto an entity property")
            .input(Pin::exec_in("In").merged())
            .input(Pin::input("Value", PinType::Any))
            .output(Pin::exec_out("Out"))
            .property("entity", 0_i64)
            .property("component", "")
            .property("property_path", "")
    }

    fn activate(&self, ctx: &mut NodeContext<'_>) -> Result<Activation, ExecutionError> {
        if ctx.fired("Value") {
            if let Some(value) = ctx.value.cloned() {
                ctx.remember("value", value);
            }
            return Ok(Activation::Leave(Vec::new()));
        }

        let binding = Self::binding(ctx)?;
        let value = ctx
            .recall("value")
            .or_else(|| ctx.property("value"))
            .cloned()
            .ok_or_else(|| ExecutionError::MissingProperty("value".into()))?;
        self.store.write(&binding, value);
        Ok(Activation::leave("Out"))
    }
}
