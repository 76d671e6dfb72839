use crate::{events::EventEmitter, ExecutionId, FlowId, NodeError, NodeId, DEFAULT_PORT};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Capability every registered node type implements.
///
/// Executors are shared across runs and must keep no per-run state.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Registry key (e.g. "http.request", "transform.json_parse")
    fn node_type(&self) -> &str;

    /// Run the node against its merged input.
    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError>;

    /// Whether the executor observes `ctx.cancellation`. When true the
    /// scheduler may drop an in-flight invocation on cancel.
    fn supports_cancellation(&self) -> bool {
        false
    }

    /// A failing critical node aborts the whole run instead of its branch.
    fn is_critical(&self, _config: &Value) -> bool {
        false
    }

    /// Checked at validation time, before publish or run start.
    fn validate_config(&self, _config: &Value) -> Result<(), NodeError> {
        Ok(())
    }

    fn metadata(&self) -> ExecutorMetadata {
        ExecutorMetadata::default()
    }
}

/// Descriptive information about a node type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorMetadata {
    pub description: String,
    pub category: String,
    pub inputs: Vec<PortDefinition>,
    pub outputs: Vec<PortDefinition>,
}

impl Default for ExecutorMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortDefinition {
    pub name: String,
    pub description: String,
    pub required: bool,
}

/// Opaque tenant/auth context handed through to executors untouched.
#[derive(Debug, Clone, Default)]
pub struct TenantContext(Arc<Value>);

impl TenantContext {
    pub fn new(value: Value) -> Self {
        Self(Arc::new(value))
    }

    pub fn get(&self) -> &Value {
        &self.0
    }
}

/// Execution context passed to each node
#[derive(Clone)]
pub struct NodeContext {
    pub execution_id: ExecutionId,
    pub flow_id: FlowId,
    pub node_id: NodeId,
    pub node_type: String,

    /// Inputs keyed by target port
    pub input: Map<String, Value>,

    /// The node's `data` blob
    pub config: Value,

    pub tenant: TenantContext,

    /// Event emitter for real-time updates
    pub events: EventEmitter,

    /// Fires when the run is cancelled or aborted
    pub cancellation: CancellationToken,
}

impl NodeContext {
    /// Get required input or return error
    pub fn require_input(&self, port: &str) -> Result<&Value, NodeError> {
        self.input
            .get(port)
            .ok_or_else(|| NodeError::MissingInput(port.to_string()))
    }

    /// Value on the default port, if any.
    pub fn default_input(&self) -> Option<&Value> {
        self.input.get(DEFAULT_PORT)
    }

    /// Get config value or return error
    pub fn require_config(&self, key: &str) -> Result<&Value, NodeError> {
        self.config
            .get(key)
            .ok_or_else(|| NodeError::Configuration(format!("Missing config: {}", key)))
    }

    pub fn input_object(&self) -> Value {
        Value::Object(self.input.clone())
    }
}

/// Output from node execution
#[derive(Debug, Clone, Default)]
pub struct NodeOutput {
    pub value: Value,
    /// Binary outputs handed to the artifact store after the node settles.
    pub artifacts: Vec<NodeArtifact>,
}

impl NodeOutput {
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            artifacts: Vec::new(),
        }
    }

    pub fn with_artifact(mut self, artifact: NodeArtifact) -> Self {
        self.artifacts.push(artifact);
        self
    }
}

impl From<Value> for NodeOutput {
    fn from(value: Value) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone)]
pub struct NodeArtifact {
    pub name: String,
    pub artifact_type: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
    pub metadata: Value,
}

impl NodeArtifact {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            artifact_type: "file".to_string(),
            mime_type: mime_type.into(),
            bytes,
            metadata: Value::Null,
        }
    }

    pub fn with_type(mut self, artifact_type: impl Into<String>) -> Self {
        self.artifact_type = artifact_type.into();
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}
