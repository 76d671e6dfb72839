use async_trait::async_trait;
use chrono::Utc;
use flowcore::{ExecutorMetadata, NodeContext, NodeError, NodeExecutor, NodeOutput, PortDefinition};
use serde_json::{json, Value};

/// Entry point of a flow. Emits the run input together with the trigger time.
pub struct ManualTriggerNode;

#[async_trait]
impl NodeExecutor for ManualTriggerNode {
    fn node_type(&self) -> &str {
        "trigger.manual"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let input = ctx.default_input().cloned().unwrap_or(Value::Null);
        ctx.events.info("Flow triggered");

        // Object inputs are passed through flat so downstream paths stay short
        let output = match input {
            Value::Object(mut fields) => {
                fields.insert("triggered".to_string(), Value::Bool(true));
                fields.insert("timestamp".to_string(), json!(Utc::now().to_rfc3339()));
                Value::Object(fields)
            }
            other => json!({
                "input": other,
                "triggered": true,
                "timestamp": Utc::now().to_rfc3339(),
            }),
        };
        Ok(NodeOutput::new(output))
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata {
            description: "Starts a flow with the run input".to_string(),
            category: "trigger".to_string(),
            inputs: vec![],
            outputs: vec![PortDefinition {
                name: "default".to_string(),
                description: "Run input plus trigger timestamp".to_string(),
                required: true,
            }],
        }
    }
}
