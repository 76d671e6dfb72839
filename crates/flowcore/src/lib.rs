//! Core abstractions for the flow engine
//!
//! This crate provides the graph model, the execution and version records,
//! and the node executor contract that every other crate depends on. It has
//! no scheduling logic.

mod error;
pub mod events;
mod execution;
mod flow;
mod interpolate;
mod node;
mod version;

pub use error::{FlowError, NodeError, StoreError, ValidationError, Violation};
pub use events::{EventEmitter, ExecutionEvent, NodeEvent};
pub use execution::{
    new_execution_id, ExecutionArtifact, ExecutionId, ExecutionSource, ExecutionStatus,
    FlowExecution, NodeExecution, NodeStatus,
};
pub use flow::{
    EdgeId, EdgeSpec, Flow, FlowGraph, FlowId, FlowStatus, NodeId, NodeSpec, Position,
    DEFAULT_PORT,
};
pub use interpolate::{interpolate, lookup};
pub use node::{
    ExecutorMetadata, NodeArtifact, NodeContext, NodeExecutor, NodeOutput, PortDefinition,
    TenantContext,
};
pub use version::{DeploymentKind, FlowVersion, VersionDeployment, VersionId, VersionStatus};

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
