//! Standard node library
//!
//! Collection of built-in executors for common operations

mod artifact;
mod debug;
mod http;
mod time;
mod transform;
mod trigger;

pub use artifact::TextArtifactNode;
pub use debug::DebugNode;
pub use http::HttpRequestNode;
pub use time::DelayNode;
pub use transform::{JsonParseNode, JsonStringifyNode, MergeNode, TemplateNode};
pub use trigger::ManualTriggerNode;

use flowcore::{NodeContext, NodeError};
use flowruntime::NodeRegistry;
use serde_json::Value;
use std::sync::Arc;

/// Register all standard nodes with a registry
pub fn register_all(registry: &NodeRegistry) {
    registry.register(Arc::new(ManualTriggerNode));
    registry.register(Arc::new(DebugNode));
    registry.register(Arc::new(DelayNode));
    registry.register(Arc::new(JsonParseNode));
    registry.register(Arc::new(JsonStringifyNode));
    registry.register(Arc::new(MergeNode));
    registry.register(Arc::new(TemplateNode));
    registry.register(Arc::new(TextArtifactNode));
    registry.register(Arc::new(HttpRequestNode::new()));
}

/// Value on `port`, or on the default port when nothing is wired to it.
pub(crate) fn port_or_default<'a>(ctx: &'a NodeContext, port: &str) -> Result<&'a Value, NodeError> {
    ctx.require_input(port)
        .or_else(|err| ctx.default_input().ok_or(err))
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
