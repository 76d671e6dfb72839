use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowcore::{
    ExecutionArtifact, ExecutionId, ExecutionStatus, FlowExecution, FlowId, NodeExecution,
    NodeStatus, StoreError,
};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Final fields written once when a node settles.
#[derive(Debug, Clone)]
pub struct NodeSettlement {
    pub status: NodeStatus,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub end_time: DateTime<Utc>,
}

/// Final fields written once when a run ends.
#[derive(Debug, Clone)]
pub struct RunSettlement {
    pub status: ExecutionStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub end_time: DateTime<Utc>,
}

/// Durable append-only record of runs.
///
/// Implementations must accept concurrent writes from many runs and
/// reject any second finalization of the same run or node.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn create_execution(&self, execution: FlowExecution) -> Result<(), StoreError>;

    /// Move a pending run to running.
    async fn mark_running(&self, execution_id: &str) -> Result<(), StoreError>;

    async fn finish_execution(
        &self,
        execution_id: &str,
        settlement: RunSettlement,
    ) -> Result<(), StoreError>;

    /// Insert a node row; at most one per `(execution_id, node_id)`.
    async fn create_node(&self, node: NodeExecution) -> Result<(), StoreError>;

    async fn finish_node(
        &self,
        execution_id: &str,
        node_id: &str,
        settlement: NodeSettlement,
    ) -> Result<(), StoreError>;

    async fn add_artifact(&self, artifact: ExecutionArtifact) -> Result<(), StoreError>;

    /// Run with its node rows and artifacts nested.
    async fn get_execution(&self, execution_id: &str) -> Option<FlowExecution>;

    /// Runs of a flow, newest first.
    async fn list_executions(&self, flow_id: FlowId, limit: usize) -> Vec<FlowExecution>;

    /// Remove a run together with its node rows and artifacts.
    async fn delete_execution(&self, execution_id: &str) -> Result<FlowExecution, StoreError>;
}

struct RunRecord {
    execution: FlowExecution,
    nodes: Vec<NodeExecution>,
    artifacts: Vec<ExecutionArtifact>,
}

impl RunRecord {
    fn assemble(&self) -> FlowExecution {
        let mut execution = self.execution.clone();
        execution.node_executions = self.nodes.clone();
        execution.artifacts = self.artifacts.clone();
        execution
    }
}

/// In-process [`ExecutionStore`].
#[derive(Default)]
pub struct InMemoryExecutionStore {
    runs: RwLock<HashMap<ExecutionId, RunRecord>>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn create_execution(&self, execution: FlowExecution) -> Result<(), StoreError> {
        let mut runs = self.runs.write().await;
        if runs.contains_key(&execution.execution_id) {
            return Err(StoreError::DuplicateExecution(execution.execution_id));
        }
        runs.insert(
            execution.execution_id.clone(),
            RunRecord {
                execution,
                nodes: Vec::new(),
                artifacts: Vec::new(),
            },
        );
        Ok(())
    }

    async fn mark_running(&self, execution_id: &str) -> Result<(), StoreError> {
        let mut runs = self.runs.write().await;
        let record = runs
            .get_mut(execution_id)
            .ok_or_else(|| StoreError::UnknownExecution(execution_id.to_string()))?;
        if record.execution.status.is_terminal() {
            return Err(StoreError::AlreadyFinalized(execution_id.to_string()));
        }
        record.execution.status = ExecutionStatus::Running;
        Ok(())
    }

    async fn finish_execution(
        &self,
        execution_id: &str,
        settlement: RunSettlement,
    ) -> Result<(), StoreError> {
        let mut runs = self.runs.write().await;
        let record = runs
            .get_mut(execution_id)
            .ok_or_else(|| StoreError::UnknownExecution(execution_id.to_string()))?;
        if record.execution.status.is_terminal() {
            return Err(StoreError::AlreadyFinalized(execution_id.to_string()));
        }
        let execution = &mut record.execution;
        execution.status = settlement.status;
        execution.result = settlement.result;
        execution.error = settlement.error;
        execution.end_time = Some(settlement.end_time);
        Ok(())
    }

    async fn create_node(&self, node: NodeExecution) -> Result<(), StoreError> {
        let mut runs = self.runs.write().await;
        let record = runs
            .get_mut(&node.execution_id)
            .ok_or_else(|| StoreError::UnknownExecution(node.execution_id.clone()))?;
        if record.nodes.iter().any(|n| n.node_id == node.node_id) {
            return Err(StoreError::DuplicateNode {
                execution_id: node.execution_id,
                node_id: node.node_id,
            });
        }
        record.nodes.push(node);
        Ok(())
    }

    async fn finish_node(
        &self,
        execution_id: &str,
        node_id: &str,
        settlement: NodeSettlement,
    ) -> Result<(), StoreError> {
        let mut runs = self.runs.write().await;
        let record = runs
            .get_mut(execution_id)
            .ok_or_else(|| StoreError::UnknownExecution(execution_id.to_string()))?;
        let node = record
            .nodes
            .iter_mut()
            .find(|n| n.node_id == node_id)
            .ok_or_else(|| StoreError::UnknownNode {
                execution_id: execution_id.to_string(),
                node_id: node_id.to_string(),
            })?;
        if node.status.is_terminal() {
            return Err(StoreError::AlreadyFinalized(format!(
                "node {} of {}",
                node_id, execution_id
            )));
        }
        node.status = settlement.status;
        node.output = settlement.output;
        node.error = settlement.error;
        node.end_time = Some(settlement.end_time);
        Ok(())
    }

    async fn add_artifact(&self, artifact: ExecutionArtifact) -> Result<(), StoreError> {
        let mut runs = self.runs.write().await;
        let record = runs
            .get_mut(&artifact.execution_id)
            .ok_or_else(|| StoreError::UnknownExecution(artifact.execution_id.clone()))?;
        record.artifacts.push(artifact);
        Ok(())
    }

    async fn get_execution(&self, execution_id: &str) -> Option<FlowExecution> {
        self.runs
            .read()
            .await
            .get(execution_id)
            .map(RunRecord::assemble)
    }

    async fn list_executions(&self, flow_id: FlowId, limit: usize) -> Vec<FlowExecution> {
        let runs = self.runs.read().await;
        let mut found: Vec<FlowExecution> = runs
            .values()
            .filter(|r| r.execution.flow_id == flow_id)
            .map(RunRecord::assemble)
            .collect();
        found.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        found.truncate(limit);
        found
    }

    async fn delete_execution(&self, execution_id: &str) -> Result<FlowExecution, StoreError> {
        self.runs
            .write()
            .await
            .remove(execution_id)
            .map(|record| record.assemble())
            .ok_or_else(|| StoreError::UnknownExecution(execution_id.to_string()))
    }
}
