use crate::port_or_default;
use async_trait::async_trait;
use flowcore::{
    interpolate, ExecutorMetadata, NodeArtifact, NodeContext, NodeError, NodeExecutor, NodeOutput,
};
use serde_json::{json, Value};

/// Write text to the artifact store as a file.
///
/// Content comes from the `content` config (placeholders allowed) or the
/// default input. The output describes the file; the bytes go to storage.
pub struct TextArtifactNode;

#[async_trait]
impl NodeExecutor for TextArtifactNode {
    fn node_type(&self) -> &str {
        "artifact.text"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let content = match ctx.config.get("content") {
            Some(template) => interpolate(template, &ctx.input),
            None => port_or_default(&ctx, "content")?.clone(),
        };
        let text = match content {
            Value::String(s) => s,
            other => serde_json::to_string_pretty(&other)
                .map_err(|e| NodeError::ExecutionFailed(format!("Cannot render content: {}", e)))?,
        };

        let name = ctx
            .config
            .get("filename")
            .and_then(Value::as_str)
            .unwrap_or("output.txt")
            .to_string();
        let mime_type = ctx
            .config
            .get("mime_type")
            .and_then(Value::as_str)
            .unwrap_or("text/plain")
            .to_string();
        let size = text.len();

        ctx.events.info(format!("Writing {} ({} bytes)", name, size));

        let artifact = NodeArtifact::new(name.clone(), mime_type.clone(), text.into_bytes())
            .with_type("document")
            .with_metadata(json!({ "node": ctx.node_id }));
        Ok(NodeOutput::new(json!({
            "filename": name,
            "mimeType": mime_type,
            "size": size,
        }))
        .with_artifact(artifact))
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata {
            description: "Store text content as a file artifact".to_string(),
            category: "output".to_string(),
            inputs: vec![],
            outputs: vec![],
        }
    }
}
