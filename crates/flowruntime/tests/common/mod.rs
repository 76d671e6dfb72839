#![allow(dead_code)]

use async_trait::async_trait;
use flowcore::{
    EdgeSpec, ExecutionArtifact, ExecutionStatus, FlowExecution, FlowGraph, FlowId, NodeArtifact,
    NodeContext, NodeError, NodeExecution, NodeExecutor, NodeOutput, NodeSpec, NodeStatus,
    StoreError, TenantContext,
};
use flowruntime::{
    ExecutionStore, FlowRuntime, InMemoryExecutionStore, NodeRegistry, NodeSettlement,
    RunSettlement, RuntimeConfig,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

fn delay(ctx: &NodeContext) -> Option<Duration> {
    ctx.config
        .get("delay_ms")
        .and_then(Value::as_u64)
        .map(Duration::from_millis)
}

/// Returns `config.output` when set, otherwise its whole keyed input.
pub struct EchoNode;

#[async_trait]
impl NodeExecutor for EchoNode {
    fn node_type(&self) -> &str {
        "test.echo"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        if let Some(d) = delay(&ctx) {
            tokio::time::sleep(d).await;
        }
        ctx.events.info(format!("echo from {}", ctx.node_id));
        Ok(NodeOutput::new(
            ctx.config
                .get("output")
                .cloned()
                .unwrap_or_else(|| ctx.input_object()),
        ))
    }
}

/// Always fails; critical when `config.critical` is true.
pub struct FailNode;

#[async_trait]
impl NodeExecutor for FailNode {
    fn node_type(&self) -> &str {
        "test.fail"
    }

    async fn execute(&self, _ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        Err(NodeError::ExecutionFailed("boom".to_string()))
    }

    fn is_critical(&self, config: &Value) -> bool {
        config.get("critical").and_then(Value::as_bool).unwrap_or(false)
    }
}

/// Sleeps for `delay_ms` but stops as soon as the run is cancelled.
pub struct SleepNode;

#[async_trait]
impl NodeExecutor for SleepNode {
    fn node_type(&self) -> &str {
        "test.sleep"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let d = delay(&ctx).unwrap_or(Duration::from_secs(5));
        tokio::select! {
            _ = tokio::time::sleep(d) => Ok(NodeOutput::new(json!("slept"))),
            _ = ctx.cancellation.cancelled() => Err(NodeError::Cancelled),
        }
    }

    fn supports_cancellation(&self) -> bool {
        true
    }
}

/// Sleeps for `delay_ms` and ignores cancellation.
pub struct StubbornNode;

#[async_trait]
impl NodeExecutor for StubbornNode {
    fn node_type(&self) -> &str {
        "test.stubborn"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        tokio::time::sleep(delay(&ctx).unwrap_or(Duration::from_secs(3))).await;
        Ok(NodeOutput::new(json!("finished anyway")))
    }
}

pub struct PanicNode;

#[async_trait]
impl NodeExecutor for PanicNode {
    fn node_type(&self) -> &str {
        "test.panic"
    }

    async fn execute(&self, _ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        panic!("executor bug");
    }
}

/// Produces a small text artifact.
pub struct ArtifactNode;

#[async_trait]
impl NodeExecutor for ArtifactNode {
    fn node_type(&self) -> &str {
        "test.artifact"
    }

    async fn execute(&self, _ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        Ok(NodeOutput::new(json!({ "written": true })).with_artifact(NodeArtifact::new(
            "report.txt",
            "text/plain",
            b"hello".to_vec(),
        )))
    }
}

/// Rejects any config without a `required` key.
pub struct StrictNode;

#[async_trait]
impl NodeExecutor for StrictNode {
    fn node_type(&self) -> &str {
        "test.strict"
    }

    async fn execute(&self, _ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        Ok(NodeOutput::new(Value::Null))
    }

    fn validate_config(&self, config: &Value) -> Result<(), NodeError> {
        config
            .get("required")
            .map(|_| ())
            .ok_or_else(|| NodeError::Configuration("required is missing".to_string()))
    }
}

/// Blocks its validating thread for `check_ms` before accepting the config.
pub struct SlowCheckNode;

#[async_trait]
impl NodeExecutor for SlowCheckNode {
    fn node_type(&self) -> &str {
        "test.slow_check"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        Ok(NodeOutput::new(ctx.input_object()))
    }

    fn validate_config(&self, config: &Value) -> Result<(), NodeError> {
        if let Some(ms) = config.get("check_ms").and_then(Value::as_u64) {
            std::thread::sleep(Duration::from_millis(ms));
        }
        Ok(())
    }
}

pub fn test_registry() -> Arc<NodeRegistry> {
    let registry = NodeRegistry::new();
    registry.register(Arc::new(EchoNode));
    registry.register(Arc::new(FailNode));
    registry.register(Arc::new(SleepNode));
    registry.register(Arc::new(StubbornNode));
    registry.register(Arc::new(PanicNode));
    registry.register(Arc::new(ArtifactNode));
    registry.register(Arc::new(StrictNode));
    registry.register(Arc::new(SlowCheckNode));
    Arc::new(registry)
}

pub fn test_runtime() -> FlowRuntime {
    runtime_with(RuntimeConfig::default())
}

pub fn runtime_with(config: RuntimeConfig) -> FlowRuntime {
    init_tracing();
    FlowRuntime::with_registry(test_registry(), config).unwrap()
}

/// In-memory store that pauses right after a run row is written, until
/// `release` is notified. `created` fires once the row is visible.
pub struct GatedStore {
    inner: InMemoryExecutionStore,
    pub created: Notify,
    pub release: Notify,
}

impl GatedStore {
    pub fn new() -> Self {
        Self {
            inner: InMemoryExecutionStore::new(),
            created: Notify::new(),
            release: Notify::new(),
        }
    }
}

#[async_trait]
impl ExecutionStore for GatedStore {
    async fn create_execution(&self, execution: FlowExecution) -> Result<(), StoreError> {
        self.inner.create_execution(execution).await?;
        self.created.notify_one();
        self.release.notified().await;
        Ok(())
    }

    async fn mark_running(&self, execution_id: &str) -> Result<(), StoreError> {
        self.inner.mark_running(execution_id).await
    }

    async fn finish_execution(
        &self,
        execution_id: &str,
        settlement: RunSettlement,
    ) -> Result<(), StoreError> {
        self.inner.finish_execution(execution_id, settlement).await
    }

    async fn create_node(&self, node: NodeExecution) -> Result<(), StoreError> {
        self.inner.create_node(node).await
    }

    async fn finish_node(
        &self,
        execution_id: &str,
        node_id: &str,
        settlement: NodeSettlement,
    ) -> Result<(), StoreError> {
        self.inner.finish_node(execution_id, node_id, settlement).await
    }

    async fn add_artifact(&self, artifact: ExecutionArtifact) -> Result<(), StoreError> {
        self.inner.add_artifact(artifact).await
    }

    async fn get_execution(&self, execution_id: &str) -> Option<FlowExecution> {
        self.inner.get_execution(execution_id).await
    }

    async fn list_executions(&self, flow_id: FlowId, limit: usize) -> Vec<FlowExecution> {
        self.inner.list_executions(flow_id, limit).await
    }

    async fn delete_execution(&self, execution_id: &str) -> Result<FlowExecution, StoreError> {
        self.inner.delete_execution(execution_id).await
    }
}

pub fn node(id: &str, node_type: &str) -> NodeSpec {
    NodeSpec::new(id, node_type)
}

pub fn edge(source: &str, target: &str) -> EdgeSpec {
    EdgeSpec::new(source, target)
}

pub fn graph(nodes: Vec<NodeSpec>, edges: Vec<EdgeSpec>) -> FlowGraph {
    let mut graph = FlowGraph::new();
    graph.nodes = nodes;
    graph.edges = edges;
    graph
}

/// `trigger -> a -> b`, all echo nodes.
pub fn chain() -> FlowGraph {
    graph(
        vec![
            node("trigger", "test.echo"),
            node("a", "test.echo"),
            node("b", "test.echo"),
        ],
        vec![edge("trigger", "a"), edge("a", "b")],
    )
}

/// Create and publish a flow, returning its id.
pub async fn publish(runtime: &FlowRuntime, graph: FlowGraph) -> FlowId {
    let flow = runtime.versions().create_flow("test", "owner-1", graph).await;
    runtime.publish(flow.id, None).await.unwrap();
    flow.id
}

/// Publish, run and wait for the run to finish.
pub async fn run(runtime: &FlowRuntime, graph: FlowGraph, input: Value) -> FlowExecution {
    let flow_id = publish(runtime, graph).await;
    let execution_id = runtime
        .start_execution(flow_id, input, TenantContext::default())
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(10), runtime.wait(&execution_id))
        .await
        .expect("run did not finish")
        .unwrap()
}

/// Poll until `node_id` reaches `status` in the store.
pub async fn wait_for_node(
    runtime: &FlowRuntime,
    execution_id: &str,
    node_id: &str,
    status: NodeStatus,
) {
    for _ in 0..200 {
        let execution = runtime.get_execution(execution_id).await.unwrap();
        if execution.node(node_id).map(|n| n.status) == Some(status) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("node {} never reached {:?}", node_id, status);
}

/// Every node has exactly one row and every row is terminal.
pub fn assert_settled(execution: &FlowExecution, graph: &FlowGraph) {
    assert!(execution.status.is_terminal());
    assert_ne!(execution.status, ExecutionStatus::Pending);
    assert_eq!(execution.node_executions.len(), graph.nodes.len());
    for node in &graph.nodes {
        let rows: Vec<_> = execution
            .node_executions
            .iter()
            .filter(|n| n.node_id == node.id)
            .collect();
        assert_eq!(rows.len(), 1, "node {} has {} rows", node.id, rows.len());
        assert!(
            rows[0].status.is_terminal(),
            "node {} left {:?}",
            node.id,
            rows[0].status
        );
    }
    assert!(execution.completed_nodes() <= execution.total_nodes);
}
