//! Flow execution runtime
//!
//! Validates flow graphs, schedules their nodes by data dependency,
//! records every transition, streams progress to subscribers and keeps
//! immutable published versions.

mod artifacts;
mod config;
mod graph;
mod publisher;
mod registry;
mod runtime;
mod scheduler;
mod store;
mod tracker;
mod validator;
mod versions;

pub use artifacts::{ArtifactMetadata, ArtifactStore, InMemoryArtifactStore};
pub use config::RuntimeConfig;
pub use graph::{route_output, GraphIndex};
pub use publisher::{EventPublisher, ExecutionSubscription};
pub use registry::NodeRegistry;
pub use runtime::FlowRuntime;
pub use scheduler::{RunRequest, Scheduler};
pub use store::{ExecutionStore, InMemoryExecutionStore, NodeSettlement, RunSettlement};
pub use tracker::ExecutionTracker;
pub use validator::{validate_structure, GraphValidator};
pub use versions::VersionManager;
