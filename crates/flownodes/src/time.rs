use async_trait::async_trait;
use flowcore::{ExecutorMetadata, NodeContext, NodeError, NodeExecutor, NodeOutput};
use serde_json::Value;
use tokio::time::{sleep, Duration};

const DEFAULT_DELAY_MS: u64 = 1000;

/// Delay execution for a specified duration
pub struct DelayNode;

#[async_trait]
impl NodeExecutor for DelayNode {
    fn node_type(&self) -> &str {
        "time.delay"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let delay_ms = ctx
            .config
            .get("delay_ms")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_DELAY_MS);

        ctx.events.info(format!("Delaying for {}ms", delay_ms));

        tokio::select! {
            _ = sleep(Duration::from_millis(delay_ms)) => {}
            _ = ctx.cancellation.cancelled() => return Err(NodeError::Cancelled),
        }

        // Pass through the default input
        Ok(NodeOutput::new(
            ctx.default_input().cloned().unwrap_or(Value::Null),
        ))
    }

    fn supports_cancellation(&self) -> bool {
        true
    }

    fn validate_config(&self, config: &Value) -> Result<(), NodeError> {
        match config.get("delay_ms") {
            None => Ok(()),
            Some(v) if v.is_u64() => Ok(()),
            Some(v) => Err(NodeError::Configuration(format!(
                "delay_ms must be a non-negative integer, got {}",
                v
            ))),
        }
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata {
            description: "Delay execution for specified milliseconds".to_string(),
            category: "time".to_string(),
            inputs: vec![],
            outputs: vec![],
        }
    }
}
