use crate::{FlowId, NodeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// External-facing correlation id of a run.
pub type ExecutionId = String;

/// Generate a fresh `exec-<unix-millis>-<suffix>` correlation id.
pub fn new_execution_id() -> ExecutionId {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("exec-{}-{}", Utc::now().timestamp_millis(), &suffix[..7])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl NodeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

/// Which graph a run was started against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "version", rename_all = "snake_case")]
pub enum ExecutionSource {
    Published(u32),
    Draft,
}

/// One run of a flow, with its node rows and artifacts nested on read.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowExecution {
    pub id: Uuid,
    pub execution_id: ExecutionId,
    pub flow_id: FlowId,
    pub source: ExecutionSource,
    pub status: ExecutionStatus,
    pub input: serde_json::Value,
    pub total_nodes: usize,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    #[serde(default)]
    pub node_executions: Vec<NodeExecution>,
    #[serde(default)]
    pub artifacts: Vec<ExecutionArtifact>,
}

impl FlowExecution {
    pub fn new(
        execution_id: ExecutionId,
        flow_id: FlowId,
        source: ExecutionSource,
        input: serde_json::Value,
        total_nodes: usize,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            execution_id,
            flow_id,
            source,
            status: ExecutionStatus::Pending,
            input,
            total_nodes,
            start_time: Utc::now(),
            end_time: None,
            result: None,
            error: None,
            node_executions: Vec::new(),
            artifacts: Vec::new(),
        }
    }

    fn count(&self, status: NodeStatus) -> usize {
        self.node_executions
            .iter()
            .filter(|n| n.status == status)
            .count()
    }

    pub fn completed_nodes(&self) -> usize {
        self.count(NodeStatus::Completed)
    }

    pub fn failed_nodes(&self) -> usize {
        self.count(NodeStatus::Failed)
    }

    pub fn skipped_nodes(&self) -> usize {
        self.count(NodeStatus::Skipped)
    }

    /// Share of the graph's nodes that completed, in `[0, 1]`.
    pub fn success_rate(&self) -> f64 {
        if self.total_nodes == 0 {
            return 0.0;
        }
        self.completed_nodes() as f64 / self.total_nodes as f64
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.end_time
            .map(|end| (end - self.start_time).num_milliseconds())
    }

    pub fn node(&self, node_id: &str) -> Option<&NodeExecution> {
        self.node_executions.iter().find(|n| n.node_id == node_id)
    }
}

/// Per-node record within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeExecution {
    pub id: Uuid,
    pub execution_id: ExecutionId,
    pub node_id: NodeId,
    pub node_type: String,
    pub label: Option<String>,
    pub status: NodeStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub input: Option<serde_json::Value>,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl NodeExecution {
    /// Row for a node handed to its executor.
    pub fn started(
        execution_id: ExecutionId,
        node_id: NodeId,
        node_type: String,
        label: Option<String>,
        input: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            execution_id,
            node_id,
            node_type,
            label,
            status: NodeStatus::Running,
            start_time: Some(Utc::now()),
            end_time: None,
            input: Some(input),
            output: None,
            error: None,
        }
    }

    /// Row for a node that was never dispatched.
    pub fn skipped(
        execution_id: ExecutionId,
        node_id: NodeId,
        node_type: String,
        label: Option<String>,
        reason: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            execution_id,
            node_id,
            node_type,
            label,
            status: NodeStatus::Skipped,
            start_time: None,
            end_time: Some(Utc::now()),
            input: None,
            output: None,
            error: Some(reason),
        }
    }

    pub fn duration_ms(&self) -> Option<i64> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}

/// File produced by a node and kept in the artifact store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionArtifact {
    pub id: Uuid,
    pub execution_id: ExecutionId,
    pub node_id: NodeId,
    pub artifact_ref: String,
    pub artifact_type: String,
    pub name: String,
    pub metadata: serde_json::Value,
    pub size: u64,
    pub mime_type: String,
    pub created_at: DateTime<Utc>,
}
