// SPDX-License-Identifier: MIT OR Apache-2.0
//! Wait/continue: hold a flow until a condition is met.
//!
//! The node checks its condition on entry and leaves at once when it already
//! holds. Otherwise it stays `Active` and re-checks on every tick and on every
//! fact change. Elapsed time is kept in node memory, so a restored node keeps
//! waiting where it left off.

use crate::fact::{FactStore, FACT_CHANGED};
use flowsolo_graph::{
    Activation, ExecutionError, FlowEvent, NodeBehavior, NodeCategory, NodeContext,
    NodeDescriptor, Pin, PinValue,
};
use std::sync::Arc;
use std::time::Duration;

const ELAPSED: &str = "elapsed";

/// What a condition can look at
pub struct ConditionContext<'a> {
    /// Time spent waiting so far
    pub elapsed: Duration,
    /// World facts
    pub facts: &'a dyn FactStore,
}

/// A condition a waiting node polls
pub trait Condition: Send + Sync {
    /// Whether the wait is over
    fn is_fulfilled(&self, ctx: &ConditionContext<'_>) -> bool;

    /// Human-readable description for logs
    fn friendly_name(&self) -> String;
}

/// Fulfilled once enough time has passed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeCondition {
    /// Delay in seconds
    pub seconds: f64,
}

impl Condition for TimeCondition {
    fn is_fulfilled(&self, ctx: &ConditionContext<'_>) -> bool {
        ctx.elapsed.as_secs_f64() >= self.seconds
    }

    fn friendly_name(&self) -> String {
        format!("Time Delay: {:.2} seconds", self.seconds)
    }
}

/// Fulfilled once a fact reaches a value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactCondition {
    /// Fact name
    pub fact: String,
    /// Minimum value
    pub at_least: i64,
}

impl Condition for FactCondition {
    fn is_fulfilled(&self, ctx: &ConditionContext<'_>) -> bool {
        ctx.facts.get(&self.fact) >= self.at_least
    }

    fn friendly_name(&self) -> String {
        format!("Fact `{}` >= {}", self.fact, self.at_least)
    }
}

/// `fact.wait`: continue when a time or fact condition holds
pub struct WaitContinue {
    facts: Arc<dyn FactStore>,
}

impl WaitContinue {
    /// Create the behavior over a fact store
    pub fn new(facts: Arc<dyn FactStore>) -> Self {
        Self { facts }
    }

    /// Build the node's condition from its properties
    fn condition(ctx: &NodeContext<'_>) -> Result<Box<dyn Condition>, ExecutionError> {
        match ctx.require_str("condition")? {
            "time" => {
                let seconds = ctx.float_or("seconds", 1.0);
                if !seconds.is_finite() || seconds < 0.0 {
                    return Err(ExecutionError::InvalidProperty {
                        name: "seconds".into(),
                        reason: format!("delay must be a non-negative number, got {seconds}"),
                    });
                }
                Ok(Box::new(TimeCondition { seconds }))
            }
            "fact" => Ok(Box::new(FactCondition {
                fact: ctx.require_str("fact")?.to_string(),
                at_least: ctx.require_int("at_least")?,
            })),
            other => Err(ExecutionError::InvalidProperty {
                name: "condition".into(),
                reason: format!("expected `time` or `fact`, got `{other}`"),
            }),
        }
    }

    fn elapsed(ctx: &NodeContext<'_>) -> Duration {
        let seconds = ctx.recall(ELAPSED).and_then(PinValue::as_float).unwrap_or(0.0);
        Duration::from_secs_f64(seconds.max(0.0))
    }

    fn check(&self, ctx: &mut NodeContext<'_>) -> Result<Option<Activation>, ExecutionError> {
        let condition = Self::condition(ctx)?;
        let fulfilled = condition.is_fulfilled(&ConditionContext {
            elapsed: Self::elapsed(ctx),
            facts: self.facts.as_ref(),
        });
        if !fulfilled {
            return Ok(None);
        }
        tracing::debug!(node = %ctx.node_name, condition = %condition.friendly_name(), "wait fulfilled");
        ctx.forget(ELAPSED);
        Ok(Some(Activation::leave("Out")))
    }
}

impl NodeBehavior for WaitContinue {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::new("fact.wait", "Wait Continue", NodeCategory::Fact)
            .describe("Hold the flow until a time delay passes or a fact is reached")
            .input(Pin::exec_in("In").merged())
            .output(Pin::exec_out("Out"))
            .property("condition", "time")
            .property("seconds", 1.0)
            .property("fact", "")
            .property("at_least", 1_i64)
    }

    fn activate(&self, ctx: &mut NodeContext<'_>) -> Result<Activation, ExecutionError> {
        ctx.remember(ELAPSED, 0.0);
        Ok(self.check(ctx)?.unwrap_or_else(Activation::stay))
    }

    fn on_event(
        &self,
        ctx: &mut NodeContext<'_>,
        event: &FlowEvent,
    ) -> Result<Option<Activation>, ExecutionError> {
        if !event.is(FACT_CHANGED) {
            return Ok(None);
        }
        self.check(ctx)
    }

    fn tick(
        &self,
        ctx: &mut NodeContext<'_>,
        delta: Duration,
    ) -> Result<Option<Activation>, ExecutionError> {
        let elapsed = Self::elapsed(ctx) + delta;
        ctx.remember(ELAPSED, elapsed.as_secs_f64());
        self.check(ctx)
    }

    fn cleanup(&self, ctx: &mut NodeContext<'_>) {
        ctx.forget(ELAPSED);
    }
}
