use crate::{EdgeId, ExecutionId, FlowId, NodeId, VersionId};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    #[error("Flow not found: {0}")]
    FlowNotFound(FlowId),

    #[error("Flow version not found: {0}")]
    VersionNotFound(VersionId),

    #[error("Execution not found: {0}")]
    ExecutionNotFound(ExecutionId),

    #[error("Flow {0} has no published version")]
    NoPublishedVersion(FlowId),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Artifact error: {0}")]
    Artifact(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum NodeError {
    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Invalid input type for '{field}': expected {expected}, got {actual}")]
    InvalidInputType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Timeout after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Cancelled")]
    Cancelled,
}

/// Errors raised by the durable execution store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Execution {0} already exists")]
    DuplicateExecution(ExecutionId),

    #[error("Node {node_id} already recorded for execution {execution_id}")]
    DuplicateNode {
        execution_id: ExecutionId,
        node_id: NodeId,
    },

    #[error("Execution {0} is not recorded")]
    UnknownExecution(ExecutionId),

    #[error("Node {node_id} is not recorded for execution {execution_id}")]
    UnknownNode {
        execution_id: ExecutionId,
        node_id: NodeId,
    },

    #[error("{0} is already finalized")]
    AlreadyFinalized(String),
}

/// A single structural problem found in a flow graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "violation", rename_all = "snake_case")]
pub enum Violation {
    EmptyGraph,
    DanglingEdge { edge_id: EdgeId, node_id: NodeId },
    CycleDetected { path: Vec<NodeId> },
    UnreachableNode { node_id: NodeId },
    DuplicateNodeId { node_id: NodeId },
    UnknownNodeType { node_id: NodeId, node_type: String },
    InvalidNodeConfig { node_id: NodeId, message: String },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::EmptyGraph => write!(f, "graph has no nodes"),
            Violation::DanglingEdge { edge_id, node_id } => {
                write!(f, "edge {} references missing node {}", edge_id, node_id)
            }
            Violation::CycleDetected { path } => write!(f, "cycle detected: {}", path.join(" -> ")),
            Violation::UnreachableNode { node_id } => {
                write!(f, "node {} is not reachable from any trigger", node_id)
            }
            Violation::DuplicateNodeId { node_id } => write!(f, "duplicate node id {}", node_id),
            Violation::UnknownNodeType { node_id, node_type } => {
                write!(f, "node {} has unregistered type {}", node_id, node_type)
            }
            Violation::InvalidNodeConfig { node_id, message } => {
                write!(f, "node {} has invalid config: {}", node_id, message)
            }
        }
    }
}

/// Every violation found in one validation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub violations: Vec<Violation>,
}

impl ValidationError {
    pub fn new(violations: Vec<Violation>) -> Self {
        Self { violations }
    }

    pub fn has_cycle(&self) -> bool {
        self.violations
            .iter()
            .any(|v| matches!(v, Violation::CycleDetected { .. }))
    }
}

impl std::error::Error for ValidationError {}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self.violations.iter().map(|v| v.to_string()).collect();
        write!(f, "{}", messages.join("; "))
    }
}
