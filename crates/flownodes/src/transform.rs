use crate::{port_or_default, type_name};
use async_trait::async_trait;
use flowcore::{interpolate, ExecutorMetadata, NodeContext, NodeError, NodeExecutor, NodeOutput, PortDefinition};
use serde_json::{Map, Value};

/// Parse JSON string to Value
pub struct JsonParseNode;

#[async_trait]
impl NodeExecutor for JsonParseNode {
    fn node_type(&self) -> &str {
        "transform.json_parse"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let raw = port_or_default(&ctx, "json")?;
        let text = raw.as_str().ok_or_else(|| NodeError::InvalidInputType {
            field: "json".to_string(),
            expected: "string".to_string(),
            actual: type_name(raw).to_string(),
        })?;

        let parsed: Value = serde_json::from_str(text)
            .map_err(|e| NodeError::ExecutionFailed(format!("JSON parse error: {}", e)))?;

        Ok(NodeOutput::new(parsed))
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata {
            description: "Parse JSON string".to_string(),
            category: "transform".to_string(),
            inputs: vec![PortDefinition {
                name: "json".to_string(),
                description: "JSON text, falls back to the default port".to_string(),
                required: true,
            }],
            outputs: vec![],
        }
    }
}

/// Stringify Value to JSON
pub struct JsonStringifyNode;

#[async_trait]
impl NodeExecutor for JsonStringifyNode {
    fn node_type(&self) -> &str {
        "transform.json_stringify"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let value = port_or_default(&ctx, "value")?;
        let pretty = ctx.config.get("pretty").and_then(Value::as_bool).unwrap_or(true);

        let json_str = if pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        }
        .map_err(|e| NodeError::ExecutionFailed(format!("JSON stringify error: {}", e)))?;

        Ok(NodeOutput::new(json_str))
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata {
            description: "Convert value to JSON string".to_string(),
            category: "transform".to_string(),
            inputs: vec![],
            outputs: vec![],
        }
    }
}

/// Combine every input port into one object.
///
/// Object inputs are merged field by field in port name order; anything
/// else is kept under its port name.
pub struct MergeNode;

#[async_trait]
impl NodeExecutor for MergeNode {
    fn node_type(&self) -> &str {
        "transform.merge"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let mut ports: Vec<(&String, &Value)> = ctx.input.iter().collect();
        ports.sort_by(|a, b| a.0.cmp(b.0));

        let mut merged = Map::new();
        for (port, value) in ports {
            match value {
                Value::Object(fields) => {
                    for (k, v) in fields {
                        merged.insert(k.clone(), v.clone());
                    }
                }
                other => {
                    merged.insert(port.clone(), other.clone());
                }
            }
        }
        Ok(NodeOutput::new(Value::Object(merged)))
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata {
            description: "Merge all inputs into a single object".to_string(),
            category: "transform".to_string(),
            inputs: vec![],
            outputs: vec![],
        }
    }
}

/// Render the `template` config against the node's input.
///
/// `{{port.path}}` placeholders are resolved; a template that is a single
/// placeholder yields the referenced value with its type intact.
pub struct TemplateNode;

#[async_trait]
impl NodeExecutor for TemplateNode {
    fn node_type(&self) -> &str {
        "transform.template"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let template = ctx.require_config("template")?;
        Ok(NodeOutput::new(interpolate(template, &ctx.input)))
    }

    fn validate_config(&self, config: &Value) -> Result<(), NodeError> {
        if config.get("template").is_none() {
            return Err(NodeError::Configuration("Missing config: template".to_string()));
        }
        Ok(())
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata {
            description: "Build a value from a template with {{placeholders}}".to_string(),
            category: "transform".to_string(),
            inputs: vec![],
            outputs: vec![],
        }
    }
}
