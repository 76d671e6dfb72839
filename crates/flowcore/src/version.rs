use crate::{FlowGraph, FlowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type VersionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    Draft,
    Published,
    Archived,
}

/// Immutable snapshot of a flow graph at a given version number.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowVersion {
    pub id: VersionId,
    pub flow_id: FlowId,
    pub version: u32,
    pub name: String,
    pub graph: FlowGraph,
    pub status: VersionStatus,
    pub is_published: bool,
    pub published_at: Option<DateTime<Utc>>,
    /// Version whose graph this one was rolled back from.
    pub source_version: Option<u32>,
    pub changelog: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl FlowVersion {
    /// Whether this version is the live one for its flow.
    pub fn is_current(&self) -> bool {
        self.is_published && self.status == VersionStatus::Published
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentKind {
    Publish,
    Rollback,
}

/// Audit entry appended every time the published version changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionDeployment {
    pub id: Uuid,
    pub flow_id: FlowId,
    pub version_id: VersionId,
    pub previous_version_id: Option<VersionId>,
    pub kind: DeploymentKind,
    pub reason: Option<String>,
    pub deployed_at: DateTime<Utc>,
}
