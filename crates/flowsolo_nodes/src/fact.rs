// SPDX-License-Identifier: MIT OR Apache-2.0
//! Fact system: named integer world facts and the nodes that set and test them.

use flowsolo_graph::{
    Activation, ExecutionError, FlowEvent, NodeBehavior, NodeCategory, NodeContext,
    NodeDescriptor, Pin, PinType, PinValue,
};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::sync::Arc;

/// Event broadcast after a fact changes; payload `fact` holds its name
pub const FACT_CHANGED: &str = "fact.changed";

/// Storage for world facts. Unset facts read as zero.
pub trait FactStore: Send + Sync {
    /// Current value
    fn get(&self, fact: &str) -> i64;

    /// Overwrite a value
    fn set(&self, fact: &str, value: i64);

    /// Add to a value and return the result
    fn add(&self, fact: &str, delta: i64) -> i64 {
        let value = self.get(fact).saturating_add(delta);
        self.set(fact, value);
        value
    }
}

/// In-memory fact table that remembers which facts changed
#[derive(Debug, Default)]
pub struct FactTable {
    values: RwLock<IndexMap<String, i64>>,
    changed: RwLock<Vec<String>>,
}

impl FactTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Facts changed since the last call, oldest first, without duplicates
    pub fn take_changes(&self) -> Vec<String> {
        std::mem::take(&mut *self.changed.write())
    }

    /// Copy of all facts
    pub fn entries(&self) -> IndexMap<String, i64> {
        self.values.read().clone()
    }

    /// Change events for the facts changed since the last call
    pub fn take_events(&self) -> Vec<FlowEvent> {
        self.take_changes()
            .into_iter()
            .map(|fact| FlowEvent::new(FACT_CHANGED).with("fact", fact))
            .collect()
    }
}

impl FactStore for FactTable {
    fn get(&self, fact: &str) -> i64 {
        self.values.read().get(fact).copied().unwrap_or(0)
    }

    fn set(&self, fact: &str, value: i64) {
        let previous = self.values.write().insert(fact.to_string(), value);
        if previous != Some(value) {
            tracing::debug!(fact, value, "fact changed");
            let mut changed = self.changed.write();
            if !changed.iter().any(|f| f == fact) {
                changed.push(fact.to_string());
            }
        }
    }
}

/// How `fact.set` applies its value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteMode {
    Set,
    Add,
}

impl WriteMode {
    fn parse(ctx: &NodeContext<'_>) -> Result<Self, ExecutionError> {
        match ctx.property("mode").and_then(PinValue::as_str) {
            None | Some("set") => Ok(Self::Set),
            Some("add") => Ok(Self::Add),
            Some(other) => Err(ExecutionError::InvalidProperty {
                name: "mode".into(),
                reason: format!("expected `set` or `add`, got `{other}`"),
            }),
        }
    }
}

/// `fact.set`: write a fact, then continue
pub struct FactSet {
    store: Arc<dyn FactStore>,
}

impl FactSet {
    /// Create the behavior over a fact store
    pub fn new(store: Arc<dyn FactStore>) -> Self {
        Self { store }
    }
}

impl NodeBehavior for FactSet {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::new("fact.set", "Set Fact", NodeCategory::Fact)
            .describe("Set or add to a world fact")
            .input(Pin::exec_in("Create").merged())
            .input(Pin::input("Value", PinType::Int))
            .output(Pin::exec_out("Done"))
            .property("fact", "")
            .property("value", 1_i64)
            .property("mode", "set")
    }

    fn activate(&self, ctx: &mut NodeContext<'_>) -> Result<Activation, ExecutionError> {
        // A data signal only updates the pending value.
        if ctx.fired("Value") {
            if let Some(value) = ctx.value.and_then(PinValue::as_int) {
                ctx.remember("value", value);
            }
            return Ok(Activation::Leave(Vec::new()));
        }

        let fact = ctx.require_str("fact")?.to_string();
        let value = match ctx.recall("value").and_then(PinValue::as_int) {
            Some(value) => value,
            None => ctx.require_int("value")?,
        };
        let result = match WriteMode::parse(ctx)? {
            WriteMode::Set => {
                self.store.set(&fact, value);
                value
            }
            WriteMode::Add => self.store.add(&fact, value),
        };
        tracing::info!(node = %ctx.node_name, %fact, result, "fact written");
        Ok(Activation::leave("Done"))
    }
}

/// Comparison used by `fact.check`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    /// value >= threshold
    AtLeast,
    /// value == threshold
    Equal,
    /// value < threshold
    Below,
}

impl Comparison {
    /// Parse a comparison name
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "at_least" => Some(Self::AtLeast),
            "equal" => Some(Self::Equal),
            "below" => Some(Self::Below),
            _ => None,
        }
    }

    /// Apply the comparison
    pub fn holds(self, value: i64, threshold: i64) -> bool {
        match self {
            Self::AtLeast => value >= threshold,
            Self::Equal => value == threshold,
            Self::Below => value < threshold,
        }
    }
}

/// `fact.check`: branch on a fact
pub struct FactCheck {
    store: Arc<dyn FactStore>,
}

impl FactCheck {
    /// Create the behavior over a fact store
    pub fn new(store: Arc<dyn FactStore>) -> Self {
        Self { store }
    }
}

impl NodeBehavior for FactCheck {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::new("fact.check", "Check Fact", NodeCategory::Fact)
            .describe("Compare a fact against a threshold")
            .input(Pin::exec_in("In").merged())
            .output(Pin::exec_out("True"))
            .output(Pin::exec_out("False"))
            .property("fact", "")
            .property("threshold", 1_i64)
            .property("comparison", "at_least")
    }

    fn activate(&self, ctx: &mut NodeContext<'_>) -> Result<Activation, ExecutionError> {
        let fact = ctx.require_str("fact")?;
        let threshold = ctx.require_int("threshold")?;
        let name = ctx.require_str("comparison")?;
        let comparison = Comparison::parse(name).ok_or_else(|| ExecutionError::InvalidProperty {
            name: "comparison".into(),
            reason: format!("unknown comparison `{name}`"),
        })?;

        let value = self.store.get(fact);
        let pin = if comparison.holds(value, threshold) {
            "True"
        } else {
            "False"
        };
        tracing::debug!(fact, value, threshold, pin, "fact checked");
        Ok(Activation::leave(pin))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowsolo_graph::{BehaviorRegistry, Engine, EngineConfig, Graph, NodeState, TriggerTarget};

    fn setup(table: Arc<FactTable>) -> Engine {
        let mut registry = BehaviorRegistry::new();
        registry.register(FactSet::new(table.clone()));
        registry.register(FactCheck::new(table));
        Engine::new(Arc::new(registry), EngineConfig::default())
    }

    #[test]
    fn test_table_tracks_changes() {
        let table = FactTable::new();
        table.set("door_open", 1);
        table.set("door_open", 1);
        assert_eq!(table.add("coins", 5), 5);
        assert_eq!(table.add("coins", -2), 3);
        assert_eq!(table.take_changes(), vec!["door_open".to_string(), "coins".to_string()]);
        assert!(table.take_changes().is_empty());
        assert_eq!(table.get("missing"), 0);
    }

    #[test]
    fn test_set_then_check() {
        let table = Arc::new(FactTable::new());
        let engine = setup(table.clone());
        let mut graph = Graph::new("facts");
        let set = graph
            .add_node(
                engine
                    .registry()
                    .create_node("fact.set")
                    .unwrap()
                    .with_property("fact", "coins")
                    .with_property("value", 3_i64)
                    .with_property("mode", "add"),
            )
            .unwrap();
        let check = graph
            .add_node(
                engine
                    .registry()
                    .create_node("fact.check")
                    .unwrap()
                    .with_property("fact", "coins")
                    .with_property("threshold", 5_i64),
            )
            .unwrap();
        let reward = graph
            .add_node(
                engine
                    .registry()
                    .create_node("fact.set")
                    .unwrap()
                    .with_property("fact", "rich"),
            )
            .unwrap();
        graph.connect_by_name(set, "Done", check, "In").unwrap();
        graph.connect_by_name(check, "True", reward, "Create").unwrap();

        let create = TriggerTarget::Pin { node: set, pin: "Create".into() };
        engine.trigger(&mut graph, create.clone()).unwrap();
        assert_eq!(table.get("coins"), 3);
        assert_eq!(table.get("rich"), 0);

        let report = engine.trigger(&mut graph, create).unwrap().report;
        assert!(report.is_clean());
        assert_eq!(report.signals_from(check, "True").count(), 1);
        assert_eq!(table.get("coins"), 6);
        assert_eq!(table.get("rich"), 1);
        assert_eq!(graph.node_state(check), Some(NodeState::Inactive));
    }

    #[test]
    fn test_missing_fact_name_fails_node() {
        let table = Arc::new(FactTable::new());
        let engine = setup(table);
        let mut graph = Graph::new("broken");
        let set = graph
            .add_node(engine.registry().create_node("fact.set").unwrap())
            .unwrap();
        let report = engine.trigger(&mut graph, TriggerTarget::Node(set)).unwrap().report;
        assert_eq!(
            report.errors().next().map(|(_, e)| e.clone()),
            Some(ExecutionError::MissingProperty("fact".into()))
        );
        assert_eq!(graph.node_state(set), Some(NodeState::Finished));
    }

    #[test]
    fn test_comparisons() {
        assert!(Comparison::AtLeast.holds(5, 5));
        assert!(!Comparison::Below.holds(5, 5));
        assert!(Comparison::Equal.holds(2, 2));
        assert_eq!(Comparison::parse("nope"), None);
    }
}
