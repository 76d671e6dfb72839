use async_trait::async_trait;
use flowcore::{interpolate, ExecutorMetadata, NodeContext, NodeError, NodeExecutor, NodeOutput};
use serde_json::Value;

/// Simple debug node that logs its inputs and passes them through
pub struct DebugNode;

#[async_trait]
impl NodeExecutor for DebugNode {
    fn node_type(&self) -> &str {
        "debug.log"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let message = ctx
            .config
            .get("message")
            .map(|template| interpolate(template, &ctx.input))
            .map(|value| match value {
                Value::String(s) => s,
                other => other.to_string(),
            })
            .unwrap_or_else(|| "(no message)".to_string());

        ctx.events.info(format!("DEBUG: {}", message));
        tracing::debug!("[{}] {}", ctx.node_id, message);

        // Also log all inputs for visibility
        for (key, value) in &ctx.input {
            ctx.events.info(format!("  {}: {}", key, value));
        }

        let passthrough = ctx.default_input().cloned().unwrap_or(Value::Null);
        Ok(NodeOutput::new(passthrough))
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata {
            description: "Logs input values for debugging".to_string(),
            category: "debug".to_string(),
            inputs: vec![],
            outputs: vec![],
        }
    }
}
