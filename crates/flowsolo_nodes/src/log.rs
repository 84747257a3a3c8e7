// SPDX-License-Identifier: MIT OR Apache-2.0
//! Debug logging node.

use flowsolo_graph::{
    Activation, ExecutionError, NodeBehavior, NodeCategory, NodeContext, NodeDescriptor, Pin,
    PinType, PinValue,
};

/// `debug.log`: log a message and pass the flow on
pub struct UniversalLog;

impl UniversalLog {
    fn render(message: &str, value: Option<&PinValue>) -> String {
        match value {
            Some(value) => format!("{message} {value:?}"),
            None => message.to_string(),
        }
    }
}

impl NodeBehavior for UniversalLog {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::new("debug.log", "Log", NodeCategory::Debug)
            .describe("Print a message to the log")
            .input(Pin::exec_in("In").merged())
            .input(Pin::input("Value", PinType::Any))
            .output(Pin::exec_out("Out"))
            .property("message", "")
    }

    fn activate(&self, ctx: &mut NodeContext<'_>) -> Result<Activation, ExecutionError> {
        if ctx.fired("Value") {
            if let Some(value) = ctx.value.cloned() {
                ctx.remember("value", value);
            }
            return Ok(Activation::Leave(Vec::new()));
        }
        let message = ctx
            .property("message")
            .and_then(PinValue::as_str)
            .unwrap_or_default();
        let line = Self::render(message, ctx.recall("value"));
        tracing::info!(node = %ctx.node_name, epoch = ?ctx.epoch, "{line}");
        Ok(Activation::leave("Out"))
    }
}
