// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pin definitions for node inputs/outputs.

use crate::connection::ConnectionId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a pin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PinId(pub Uuid);

impl PinId {
    /// Create a new random pin ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PinId {
    fn default() -> Self {
        Self::new()
    }
}

/// Pin direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PinDirection {
    /// Input pin
    Input,
    /// Output pin
    Output,
}

/// Data type that can flow through pins
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PinType {
    /// Execution signal
    Exec,
    /// Boolean value
    Bool,
    /// Integer value
    Int,
    /// Floating point value
    Float,
    /// String value
    String,
    /// Interned name (fact names, tags)
    Name,
    /// Entity/actor reference
    Entity,
    /// Any data type (for generic nodes)
    Any,
    /// Custom type
    Custom(String),
}

impl PinType {
    /// Whether this is the execution type
    pub fn is_exec(&self) -> bool {
        matches!(self, Self::Exec)
    }

    /// Check if this type can connect to another type
    pub fn can_connect_to(&self, other: &PinType) -> bool {
        // Exec only ever pairs with exec
        if self.is_exec() || other.is_exec() {
            return self.is_exec() && other.is_exec();
        }

        if matches!(self, Self::Any) || matches!(other, Self::Any) {
            return true;
        }

        if self == other {
            return true;
        }

        matches!(
            (self, other),
            (Self::Int, Self::Float)
                | (Self::Float, Self::Int)
                | (Self::Name, Self::String)
                | (Self::String, Self::Name)
        )
    }
}

/// A pin on a node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pin {
    /// Unique pin ID
    pub id: PinId,
    /// Pin name, unique per direction on a node
    pub name: String,
    /// Pin direction
    pub direction: PinDirection,
    /// Data type
    pub pin_type: PinType,
    /// Default value (for data inputs)
    #[serde(default)]
    pub default_value: Option<PinValue>,
    /// Whether an input accepts several sources
    #[serde(default)]
    pub merge_inputs: bool,
    /// Connections registered on this pin
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) connections: Vec<ConnectionId>,
}

impl Pin {
    /// Create a new pin
    pub fn new(name: impl Into<String>, pin_type: PinType, direction: PinDirection) -> Self {
        Self {
            id: PinId::new(),
            name: name.into(),
            direction,
            pin_type,
            default_value: None,
            merge_inputs: false,
            connections: Vec::new(),
        }
    }

    /// Create a new input pin
    pub fn input(name: impl Into<String>, pin_type: PinType) -> Self {
        Self::new(name, pin_type, PinDirection::Input)
    }

    /// Create a new output pin
    pub fn output(name: impl Into<String>, pin_type: PinType) -> Self {
        Self::new(name, pin_type, PinDirection::Output)
    }

    /// Execution input
    pub fn exec_in(name: impl Into<String>) -> Self {
        Self::input(name, PinType::Exec)
    }

    /// Execution output
    pub fn exec_out(name: impl Into<String>) -> Self {
        Self::output(name, PinType::Exec)
    }

    /// Set the default value
    pub fn with_default(mut self, value: PinValue) -> Self {
        self.default_value = Some(value);
        self
    }

    /// Allow several sources on this input
    pub fn merged(mut self) -> Self {
        self.merge_inputs = true;
        self
    }

    /// Data type of the pin
    pub fn pin_type(&self) -> &PinType {
        &self.pin_type
    }

    /// Direction of the pin
    pub fn direction(&self) -> PinDirection {
        self.direction
    }

    /// Connections currently registered on the pin
    pub fn connections(&self) -> &[ConnectionId] {
        &self.connections
    }

    /// Whether the pin has any connection
    pub fn is_connected(&self) -> bool {
        !self.connections.is_empty()
    }

    /// Whether another source may still be attached to this pin
    pub fn accepts_source(&self) -> bool {
        self.direction == PinDirection::Output || self.merge_inputs || self.connections.is_empty()
    }

    /// Clone the pin schema with a fresh ID and no connections
    pub fn instantiate(&self) -> Self {
        Self {
            id: PinId::new(),
            connections: Vec::new(),
            ..self.clone()
        }
    }

    pub(crate) fn register(&mut self, connection: ConnectionId) {
        if !self.connections.contains(&connection) {
            self.connections.push(connection);
        }
    }

    pub(crate) fn unregister(&mut self, connection: ConnectionId) {
        self.connections.retain(|c| *c != connection);
    }
}

/// Value that can be carried by a pin or stored in node memory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PinValue {
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// Float
    Float(f64),
    /// String
    String(String),
    /// Name
    Name(String),
    /// Entity reference
    Entity(u64),
}

impl PinValue {
    /// Get the pin type for this value
    pub fn pin_type(&self) -> PinType {
        match self {
            Self::Bool(_) => PinType::Bool,
            Self::Int(_) => PinType::Int,
            Self::Float(_) => PinType::Float,
            Self::String(_) => PinType::String,
            Self::Name(_) => PinType::Name,
            Self::Entity(_) => PinType::Entity,
        }
    }

    /// Boolean view of the value
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer view of the value (floats are not truncated)
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Entity(e) => i64::try_from(*e).ok(),
            _ => None,
        }
    }

    /// Float view of the value
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// String view of the value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) | Self::Name(s) => Some(s),
            _ => None,
        }
    }

    /// Entity view of the value
    pub fn as_entity(&self) -> Option<u64> {
        match self {
            Self::Entity(e) => Some(*e),
            Self::Int(i) => u64::try_from(*i).ok(),
            _ => None,
        }
    }
}

impl From<bool> for PinValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for PinValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for PinValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for PinValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for PinValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_only_pairs_with_exec() {
        assert!(PinType::Exec.can_connect_to(&PinType::Exec));
        assert!(!PinType::Exec.can_connect_to(&PinType::Any));
        assert!(!PinType::Any.can_connect_to(&PinType::Exec));
        assert!(!PinType::Bool.can_connect_to(&PinType::Exec));
    }

    #[test]
    fn test_implicit_conversions() {
        assert!(PinType::Int.can_connect_to(&PinType::Float));
        assert!(PinType::Name.can_connect_to(&PinType::String));
        assert!(PinType::Any.can_connect_to(&PinType::Entity));
        assert!(!PinType::Bool.can_connect_to(&PinType::Int));
        assert!(!PinType::Custom("a".into()).can_connect_to(&PinType::Custom("b".into())));
    }

    #[test]
    fn test_output_always_accepts_source() {
        let mut input = Pin::exec_in("In");
        assert!(input.accepts_source());
        input.register(ConnectionId::new());
        assert!(!input.accepts_source());

        let mut merged = Pin::exec_in("In").merged();
        merged.register(ConnectionId::new());
        assert!(merged.accepts_source());
    }

    #[test]
    fn test_value_views() {
        assert_eq!(PinValue::Int(3).as_float(), Some(3.0));
        assert_eq!(PinValue::Float(2.5).as_int(), None);
        assert_eq!(PinValue::Name("door".into()).as_str(), Some("door"));
        assert_eq!(PinValue::Int(-1).as_entity(), None);
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
                "[a-c]".prop_map(PinType::Custom),
            ]
            .boxed()
        }

        proptest! {
            /// Compatibility does not depend on which side is the source.
            #[test]
            fn prop_compatibility_is_symmetric(a in arb_pin_type(), b in arb_pin_type()) {
                prop_assert_eq!(a.can_connect_to(&b), b.can_connect_to(&a));
            }

            /// Every type connects to itself, and exec never meets data.
            #[test]
            fn prop_exec_is_isolated(a in arb_pin_type()) {
                prop_assert!(a.can_connect_to(&a));
                prop_assert_eq!(a.can_connect_to(&PinType::Exec), a.is_exec());
            }
        }
    }
}
