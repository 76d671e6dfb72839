use crate::artifacts::{ArtifactMetadata, ArtifactStore};
use crate::config::RuntimeConfig;
use crate::graph::{route_output, GraphIndex};
use crate::registry::NodeRegistry;
use crate::store::RunSettlement;
use crate::tracker::ExecutionTracker;
use chrono::Utc;
use flowcore::{
    ExecutionArtifact, ExecutionId, ExecutionStatus, FlowError, FlowGraph, FlowId, NodeArtifact,
    NodeContext, NodeError, NodeExecution, NodeExecutor, NodeId, NodeOutput, NodeStatus,
    TenantContext, DEFAULT_PORT,
};
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Everything a single run needs, captured at start time.
pub struct RunRequest {
    pub execution_id: ExecutionId,
    pub flow_id: FlowId,
    /// Snapshot taken at start; later draft edits never reach it.
    pub graph: FlowGraph,
    pub input: Value,
    pub tenant: TenantContext,
    pub cancellation: CancellationToken,
}

/// Why dispatching stopped early.
#[derive(Debug, Clone)]
enum Halt {
    Cancelled,
    Aborted { node_id: NodeId, error: String },
}

/// Result of one executor invocation, reported back to the dispatch loop.
struct Settled {
    node_id: NodeId,
    result: Result<NodeOutput, NodeError>,
    duration: Duration,
}

/// Mutable bookkeeping of one run, owned by its dispatch loop.
struct RunState {
    index: GraphIndex,
    pending_inputs: HashMap<NodeId, usize>,
    statuses: HashMap<NodeId, NodeStatus>,
    outputs: HashMap<NodeId, Value>,
    ready: VecDeque<NodeId>,
    failures: Vec<(NodeId, String)>,
    halt: Option<Halt>,
}

impl RunState {
    fn new(graph: &FlowGraph) -> Self {
        let index = GraphIndex::build(graph);
        let pending_inputs = index.in_degrees();
        let statuses = graph
            .nodes
            .iter()
            .map(|n| (n.id.clone(), NodeStatus::Pending))
            .collect();
        let ready = index.triggers().into();
        Self {
            index,
            pending_inputs,
            statuses,
            outputs: HashMap::new(),
            ready,
            failures: Vec::new(),
            halt: None,
        }
    }

    fn status(&self, node_id: &str) -> NodeStatus {
        self.statuses
            .get(node_id)
            .copied()
            .unwrap_or(NodeStatus::Pending)
    }

    fn completed(&self) -> usize {
        self.statuses
            .values()
            .filter(|s| **s == NodeStatus::Completed)
            .count()
    }

    /// Merge upstream outputs into the node's keyed input object.
    ///
    /// Triggers get the run input on the default port. Several edges
    /// landing on one port are gathered into an array in edge order.
    fn collect_input(&self, node_id: &str, graph: &FlowGraph, run_input: &Value) -> Map<String, Value> {
        let mut input = Map::new();
        let incoming = self.index.incoming_edges(node_id);
        if incoming.is_empty() {
            input.insert(DEFAULT_PORT.to_string(), run_input.clone());
            return input;
        }

        let mut gathered: HashSet<String> = HashSet::new();
        for position in incoming {
            let edge = &graph.edges[position];
            let Some(output) = self.outputs.get(&edge.source) else {
                continue;
            };
            let value = route_output(edge, output);
            let port = edge.target_port().to_string();
            match input.remove(&port) {
                None => {
                    input.insert(port, value);
                }
                Some(Value::Array(mut items)) if gathered.contains(&port) => {
                    items.push(value);
                    input.insert(port, Value::Array(items));
                }
                Some(previous) => {
                    gathered.insert(port.clone());
                    input.insert(port, Value::Array(vec![previous, value]));
                }
            }
        }
        input
    }

    /// Output of the terminal nodes: the single terminal's output, or an
    /// object keyed by node id when there are several.
    fn result(&self) -> Option<Value> {
        let terminals = self.index.terminals();
        if terminals.len() == 1 {
            return self.outputs.get(&terminals[0]).cloned();
        }
        let merged: Map<String, Value> = terminals
            .into_iter()
            .filter_map(|id| self.outputs.get(&id).map(|v| (id, v.clone())))
            .collect();
        if merged.is_empty() {
            None
        } else {
            Some(Value::Object(merged))
        }
    }

    fn settlement(&self) -> RunSettlement {
        let (status, result, error) = match &self.halt {
            Some(Halt::Cancelled) => (
                ExecutionStatus::Cancelled,
                None,
                Some("Execution cancelled".to_string()),
            ),
            Some(Halt::Aborted { node_id, error }) => (
                ExecutionStatus::Failed,
                self.result(),
                Some(format!("Critical node {} failed: {}", node_id, error)),
            ),
            None if !self.failures.is_empty() => {
                let summary: Vec<String> = self
                    .failures
                    .iter()
                    .map(|(node_id, error)| format!("node {} failed: {}", node_id, error))
                    .collect();
                (ExecutionStatus::Failed, self.result(), Some(summary.join("; ")))
            }
            None => (ExecutionStatus::Completed, self.result(), None),
        };
        RunSettlement {
            status,
            result,
            error,
            end_time: Utc::now(),
        }
    }
}

/// Dependency-driven scheduler. Dispatches every ready node as its own
/// task, bounded per run by `max_parallel_nodes` and across runs by a
/// shared semaphore.
pub struct Scheduler {
    registry: Arc<NodeRegistry>,
    tracker: Arc<ExecutionTracker>,
    artifacts: Arc<dyn ArtifactStore>,
    limiter: Arc<Semaphore>,
    config: RuntimeConfig,
}

impl Scheduler {
    pub fn new(
        registry: Arc<NodeRegistry>,
        tracker: Arc<ExecutionTracker>,
        artifacts: Arc<dyn ArtifactStore>,
        config: RuntimeConfig,
    ) -> Result<Self, FlowError> {
        config.validate()?;
        let limiter = Arc::new(Semaphore::new(config.max_concurrent_nodes));
        Ok(Self {
            registry,
            tracker,
            artifacts,
            limiter,
            config,
        })
    }

    /// Drive a run to its terminal state. The run row must already exist.
    pub async fn run(&self, request: RunRequest) -> ExecutionStatus {
        let started = Instant::now();
        let run_token = request.cancellation.child_token();
        tracing::info!(
            "Starting execution {} of flow {} ({} nodes)",
            request.execution_id,
            request.flow_id,
            request.graph.nodes.len()
        );

        let settlement = match self.execute(&request, &run_token).await {
            Ok(settlement) => settlement,
            Err(e) => {
                tracing::error!(
                    "Execution {} aborted by scheduler failure: {}",
                    request.execution_id,
                    e
                );
                run_token.cancel();
                RunSettlement {
                    status: ExecutionStatus::Failed,
                    result: None,
                    error: Some("Internal scheduler error".to_string()),
                    end_time: Utc::now(),
                }
            }
        };

        let status = settlement.status;
        if let Err(e) = self
            .tracker
            .on_run_complete(&request.execution_id, settlement)
            .await
        {
            tracing::error!(
                "Failed to finalize execution {}: {}",
                request.execution_id,
                e
            );
        }

        tracing::info!(
            "Execution {} finished as {:?} in {}ms",
            request.execution_id,
            status,
            started.elapsed().as_millis()
        );
        status
    }

    async fn execute(
        &self,
        request: &RunRequest,
        run_token: &CancellationToken,
    ) -> Result<RunSettlement, FlowError> {
        let mut state = RunState::new(&request.graph);
        let total = request.graph.nodes.len();
        self.tracker
            .on_run_start(&request.execution_id, request.flow_id, total)
            .await?;

        let mut running = FuturesUnordered::new();

        loop {
            if state.halt.is_none() && run_token.is_cancelled() {
                state.halt = Some(Halt::Cancelled);
            }
            if state.halt.is_none() {
                while let Some(node_id) = state.ready.pop_front() {
                    if let Some(limit) = self.config.max_parallel_nodes {
                        if running.len() >= limit {
                            state.ready.push_front(node_id);
                            break;
                        }
                    }
                    match self.dispatch(request, &mut state, &node_id, run_token).await? {
                        Some(handle) => running.push(handle),
                        None => {
                            // Cancelled while waiting for a slot
                            state.ready.push_front(node_id);
                            break;
                        }
                    }
                }
            }

            // Nothing running and nothing dispatchable: done
            if running.is_empty() {
                break;
            }

            tokio::select! {
                _ = run_token.cancelled(), if state.halt.is_none() => {
                    tracing::info!("Execution {} cancelled", request.execution_id);
                    state.halt = Some(Halt::Cancelled);
                }
                Some(joined) = running.next() => {
                    let settled = joined.map_err(|e| {
                        FlowError::Scheduler(format!("node task join error: {}", e))
                    })?;
                    self.settle(request, &mut state, settled, run_token).await?;
                    self.tracker
                        .on_progress(&request.execution_id, state.completed(), total);
                }
                else => break,
            }
        }

        let reason = match &state.halt {
            Some(Halt::Cancelled) => "execution cancelled".to_string(),
            Some(Halt::Aborted { node_id, .. }) => {
                format!("execution aborted after critical node {} failed", node_id)
            }
            None => "not reached".to_string(),
        };
        for node in &request.graph.nodes {
            if state.status(&node.id) == NodeStatus::Pending {
                self.skip(request, &mut state, &node.id, reason.clone())
                    .await?;
            }
        }

        Ok(state.settlement())
    }

    async fn dispatch(
        &self,
        request: &RunRequest,
        state: &mut RunState,
        node_id: &str,
        run_token: &CancellationToken,
    ) -> Result<Option<tokio::task::JoinHandle<Settled>>, FlowError> {
        let spec = request.graph.find_node(node_id).ok_or_else(|| {
            FlowError::Scheduler(format!("node {} missing from graph snapshot", node_id))
        })?;

        // The row only says running once the node holds a global slot
        let permit = tokio::select! {
            permit = self.limiter.clone().acquire_owned() => permit
                .map_err(|e| FlowError::Scheduler(format!("node limiter closed: {}", e)))?,
            _ = run_token.cancelled() => return Ok(None),
        };

        let input = state.collect_input(node_id, &request.graph, &request.input);

        self.tracker
            .on_node_start(NodeExecution::started(
                request.execution_id.clone(),
                spec.id.clone(),
                spec.node_type.clone(),
                spec.label.clone(),
                Value::Object(input.clone()),
            ))
            .await?;
        state
            .statuses
            .insert(spec.id.clone(), NodeStatus::Running);
        tracing::debug!("Dispatched node {} ({})", spec.id, spec.node_type);

        let ctx = NodeContext {
            execution_id: request.execution_id.clone(),
            flow_id: request.flow_id,
            node_id: spec.id.clone(),
            node_type: spec.node_type.clone(),
            input,
            config: spec.data.clone(),
            tenant: request.tenant.clone(),
            events: self.tracker.emitter(&request.execution_id, &spec.id),
            cancellation: run_token.child_token(),
        };

        let executor = self.registry.get(&spec.node_type);
        let limit = self.config.timeout_for(&spec.node_type);
        let node_id = spec.id.clone();

        Ok(Some(tokio::spawn(async move {
            let _permit = permit;
            let started = Instant::now();
            let result = match executor {
                _ if ctx.cancellation.is_cancelled() => Err(NodeError::Cancelled),
                Some(executor) => invoke(executor, ctx, limit).await,
                None => Err(NodeError::Configuration(format!(
                    "no executor registered for node type {}",
                    ctx.node_type
                ))),
            };
            Settled {
                node_id,
                result,
                duration: started.elapsed(),
            }
        })))
    }

    async fn settle(
        &self,
        request: &RunRequest,
        state: &mut RunState,
        settled: Settled,
        run_token: &CancellationToken,
    ) -> Result<(), FlowError> {
        let Settled {
            node_id,
            result,
            duration,
        } = settled;
        let execution_id = &request.execution_id;
        if state.halt.is_none() && run_token.is_cancelled() {
            state.halt = Some(Halt::Cancelled);
        }

        // Results arriving after a halt are discarded
        let result = match result {
            Ok(_) if state.halt.is_some() => Err(NodeError::Cancelled),
            Ok(output) => match self.store_artifacts(request, &node_id, output.artifacts).await {
                Ok(()) => Ok(output.value),
                Err(e) => Err(NodeError::ExecutionFailed(format!(
                    "artifact storage failed: {}",
                    e
                ))),
            },
            Err(e) => Err(e),
        };

        match result {
            Ok(output) => {
                let duration_ms = duration.as_millis() as u64;
                tracing::info!("Node {} completed in {}ms", node_id, duration_ms);
                self.tracker
                    .on_node_complete(execution_id, &node_id, output.clone(), duration_ms)
                    .await?;
                state
                    .statuses
                    .insert(node_id.clone(), NodeStatus::Completed);
                state.outputs.insert(node_id.clone(), output);

                for position in state.index.outgoing_edges(&node_id) {
                    let target = request.graph.edges[position].target.clone();
                    let remaining = state.pending_inputs.entry(target.clone()).or_insert(0);
                    *remaining = remaining.saturating_sub(1);
                    if *remaining == 0 && state.status(&target) == NodeStatus::Pending {
                        state.ready.push_back(target);
                    }
                }
            }
            Err(error) => {
                tracing::warn!("Node {} failed: {}", node_id, error);
                self.tracker
                    .on_node_failed(execution_id, &node_id, &error)
                    .await?;
                state.statuses.insert(node_id.clone(), NodeStatus::Failed);
                state.failures.push((node_id.clone(), error.to_string()));

                if state.halt.is_some() {
                    return Ok(());
                }

                if self.is_critical(request, &node_id) {
                    tracing::warn!("Critical node {} failed, aborting {}", node_id, execution_id);
                    state.halt = Some(Halt::Aborted {
                        node_id: node_id.clone(),
                        error: error.to_string(),
                    });
                    run_token.cancel();
                    return Ok(());
                }

                let reason = format!("upstream node {} failed", node_id);
                for downstream in state.index.descendants(&node_id) {
                    if state.status(&downstream) == NodeStatus::Pending {
                        self.skip(request, state, &downstream, reason.clone())
                            .await?;
                    }
                }
            }
        }
        Ok(())
    }

    async fn skip(
        &self,
        request: &RunRequest,
        state: &mut RunState,
        node_id: &str,
        reason: String,
    ) -> Result<(), FlowError> {
        let (node_type, label) = request
            .graph
            .find_node(node_id)
            .map(|n| (n.node_type.clone(), n.label.clone()))
            .unwrap_or_default();
        tracing::debug!("Skipping node {}: {}", node_id, reason);
        self.tracker
            .on_node_skipped(NodeExecution::skipped(
                request.execution_id.clone(),
                node_id.to_string(),
                node_type,
                label,
                reason,
            ))
            .await?;
        state
            .statuses
            .insert(node_id.to_string(), NodeStatus::Skipped);
        Ok(())
    }

    fn is_critical(&self, request: &RunRequest, node_id: &str) -> bool {
        request
            .graph
            .find_node(node_id)
            .and_then(|spec| {
                self.registry
                    .get(&spec.node_type)
                    .map(|executor| executor.is_critical(&spec.data))
            })
            .unwrap_or(false)
    }

    async fn store_artifacts(
        &self,
        request: &RunRequest,
        node_id: &str,
        artifacts: Vec<NodeArtifact>,
    ) -> Result<(), FlowError> {
        for artifact in artifacts {
            let size = artifact.bytes.len() as u64;
            let metadata = ArtifactMetadata {
                name: artifact.name.clone(),
                mime_type: artifact.mime_type.clone(),
                extra: artifact.metadata.clone(),
            };
            let artifact_ref = self.artifacts.store(artifact.bytes, &metadata).await?;
            self.tracker
                .on_artifact(ExecutionArtifact {
                    id: Uuid::new_v4(),
                    execution_id: request.execution_id.clone(),
                    node_id: node_id.to_string(),
                    artifact_ref,
                    artifact_type: artifact.artifact_type,
                    name: artifact.name,
                    metadata: artifact.metadata,
                    size,
                    mime_type: artifact.mime_type,
                    created_at: Utc::now(),
                })
                .await?;
        }
        Ok(())
    }
}

/// Call an executor under the node timeout, turning panics into node
/// errors. Executors that support cancellation are dropped when the
/// node's token fires; others run to completion.
async fn invoke(
    executor: Arc<dyn NodeExecutor>,
    ctx: NodeContext,
    limit: Duration,
) -> Result<NodeOutput, NodeError> {
    let token = ctx.cancellation.clone();
    let cancellable = executor.supports_cancellation();

    let guarded = async {
        match AssertUnwindSafe(executor.execute(ctx)).catch_unwind().await {
            Ok(result) => result,
            Err(_) => Err(NodeError::ExecutionFailed("executor panicked".to_string())),
        }
    };
    let bounded = async {
        match timeout(limit, guarded).await {
            Ok(result) => result,
            Err(_) => Err(NodeError::Timeout {
                seconds: limit.as_secs(),
            }),
        }
    };

    if cancellable {
        tokio::select! {
            result = bounded => result,
            _ = token.cancelled() => Err(NodeError::Cancelled),
        }
    } else {
        bounded.await
    }
}
