use crate::validator::GraphValidator;
use chrono::Utc;
use flowcore::{
    DeploymentKind, Flow, FlowError, FlowGraph, FlowId, FlowStatus, FlowVersion,
    VersionDeployment, VersionId, VersionStatus,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

struct FlowEntry {
    flow: Flow,
    versions: Vec<FlowVersion>,
    deployments: Vec<VersionDeployment>,
}

impl FlowEntry {
    fn current(&self) -> Option<&FlowVersion> {
        self.versions.iter().find(|v| v.is_current())
    }
}

#[derive(Default)]
struct Inner {
    flows: HashMap<FlowId, FlowEntry>,
    version_index: HashMap<VersionId, FlowId>,
}

/// How a publish came about, recorded on the snapshot and deployment.
struct PublishRequest {
    changelog: Option<String>,
    kind: DeploymentKind,
    source_version: Option<u32>,
    reason: Option<String>,
}

/// Owns flows and their immutable version snapshots.
///
/// History is append-only: publish and rollback add a version and a
/// deployment record, archive only flips a status. At most one version
/// per flow is published at any time.
pub struct VersionManager {
    validator: Arc<GraphValidator>,
    inner: RwLock<Inner>,
}

impl VersionManager {
    pub fn new(validator: Arc<GraphValidator>) -> Self {
        Self {
            validator,
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Register a new draft flow. The graph is not validated until publish.
    pub async fn create_flow(
        &self,
        name: impl Into<String>,
        owner_id: impl Into<String>,
        graph: FlowGraph,
    ) -> Flow {
        let mut flow = Flow::new(name, owner_id);
        flow.set_graph(graph);
        self.insert_flow(flow).await
    }

    /// Register a flow built elsewhere, e.g. loaded from a file. Status and
    /// version always start over as an unpublished draft.
    pub async fn insert_flow(&self, mut flow: Flow) -> Flow {
        flow.status = FlowStatus::Draft;
        flow.version = 0;
        tracing::info!("Created flow {} ({})", flow.name, flow.id);

        let mut inner = self.inner.write().await;
        inner.flows.insert(
            flow.id,
            FlowEntry {
                flow: flow.clone(),
                versions: Vec::new(),
                deployments: Vec::new(),
            },
        );
        flow
    }

    pub async fn get_flow(&self, flow_id: FlowId) -> Result<Flow, FlowError> {
        let inner = self.inner.read().await;
        inner
            .flows
            .get(&flow_id)
            .map(|entry| entry.flow.clone())
            .ok_or(FlowError::FlowNotFound(flow_id))
    }

    /// Flows owned by `owner_id`, oldest first.
    pub async fn list_flows(&self, owner_id: &str) -> Vec<Flow> {
        let inner = self.inner.read().await;
        let mut flows: Vec<Flow> = inner
            .flows
            .values()
            .filter(|entry| entry.flow.owner_id == owner_id)
            .map(|entry| entry.flow.clone())
            .collect();
        flows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        flows
    }

    /// Replace the working draft. Published snapshots are unaffected.
    pub async fn update_draft(&self, flow_id: FlowId, graph: FlowGraph) -> Result<Flow, FlowError> {
        let mut inner = self.inner.write().await;
        let entry = inner
            .flows
            .get_mut(&flow_id)
            .ok_or(FlowError::FlowNotFound(flow_id))?;
        if entry.flow.status == FlowStatus::Archived {
            return Err(FlowError::InvalidState(format!(
                "flow {} is archived",
                flow_id
            )));
        }
        entry.flow.set_graph(graph);
        Ok(entry.flow.clone())
    }

    /// Retire a flow: its published version is archived and drafts are frozen.
    pub async fn archive_flow(&self, flow_id: FlowId) -> Result<Flow, FlowError> {
        let mut inner = self.inner.write().await;
        let entry = inner
            .flows
            .get_mut(&flow_id)
            .ok_or(FlowError::FlowNotFound(flow_id))?;
        for version in entry.versions.iter_mut().filter(|v| v.is_published) {
            version.is_published = false;
            version.status = VersionStatus::Archived;
        }
        entry.flow.status = FlowStatus::Archived;
        entry.flow.updated_at = Utc::now();
        tracing::info!("Archived flow {}", flow_id);
        Ok(entry.flow.clone())
    }

    /// Remove a flow with all of its versions and deployment records.
    pub async fn delete_flow(&self, flow_id: FlowId) -> Result<(), FlowError> {
        let mut inner = self.inner.write().await;
        let entry = inner
            .flows
            .remove(&flow_id)
            .ok_or(FlowError::FlowNotFound(flow_id))?;
        for version in &entry.versions {
            inner.version_index.remove(&version.id);
        }
        tracing::info!("Deleted flow {}", flow_id);
        Ok(())
    }

    /// Snapshot the current draft as the next published version.
    pub async fn publish(
        &self,
        flow_id: FlowId,
        changelog: Option<String>,
    ) -> Result<FlowVersion, FlowError> {
        let (expected, graph) = {
            let inner = self.inner.read().await;
            let entry = inner
                .flows
                .get(&flow_id)
                .ok_or(FlowError::FlowNotFound(flow_id))?;
            (entry.flow.version, entry.flow.graph())
        };
        self.commit(
            flow_id,
            expected,
            graph,
            PublishRequest {
                changelog,
                kind: DeploymentKind::Publish,
                source_version: None,
                reason: None,
            },
        )
        .await
    }

    /// Publish a prior version's graph again as a new version. The draft is
    /// replaced by that graph.
    pub async fn rollback(
        &self,
        flow_id: FlowId,
        version_id: VersionId,
        reason: Option<String>,
    ) -> Result<FlowVersion, FlowError> {
        let (expected, target) = {
            let inner = self.inner.read().await;
            let entry = inner
                .flows
                .get(&flow_id)
                .ok_or(FlowError::FlowNotFound(flow_id))?;
            let target = entry
                .versions
                .iter()
                .find(|v| v.id == version_id)
                .cloned()
                .ok_or(FlowError::VersionNotFound(version_id))?;
            (entry.flow.version, target)
        };
        tracing::info!(
            "Rolling back flow {} to version {}",
            flow_id,
            target.version
        );
        self.commit(
            flow_id,
            expected,
            target.graph,
            PublishRequest {
                changelog: Some(format!("Rollback to version {}", target.version)),
                kind: DeploymentKind::Rollback,
                source_version: Some(target.version),
                reason,
            },
        )
        .await
    }

    /// Validate outside the lock, then commit only if no other publish
    /// landed in between.
    async fn commit(
        &self,
        flow_id: FlowId,
        expected: u32,
        graph: FlowGraph,
        request: PublishRequest,
    ) -> Result<FlowVersion, FlowError> {
        self.validator.validate(&graph)?;

        let mut inner = self.inner.write().await;
        let entry = inner
            .flows
            .get_mut(&flow_id)
            .ok_or(FlowError::FlowNotFound(flow_id))?;
        if entry.flow.version != expected {
            return Err(FlowError::Conflict(format!(
                "flow {} was published as version {} while publishing over version {}",
                flow_id, entry.flow.version, expected
            )));
        }
        if entry.flow.status == FlowStatus::Archived {
            return Err(FlowError::InvalidState(format!(
                "flow {} is archived",
                flow_id
            )));
        }

        let now = Utc::now();
        let mut previous_version_id = None;
        for version in entry.versions.iter_mut().filter(|v| v.is_published) {
            version.is_published = false;
            version.status = VersionStatus::Archived;
            previous_version_id = Some(version.id);
        }

        let version = FlowVersion {
            id: Uuid::new_v4(),
            flow_id,
            version: expected + 1,
            name: entry.flow.name.clone(),
            graph,
            status: VersionStatus::Published,
            is_published: true,
            published_at: Some(now),
            source_version: request.source_version,
            changelog: request.changelog,
            created_at: now,
        };

        // Draft edits made while validating must survive a plain publish
        if request.kind == DeploymentKind::Rollback {
            entry.flow.set_graph(version.graph.clone());
        }
        entry.flow.version = version.version;
        entry.flow.status = FlowStatus::Published;
        entry.flow.updated_at = now;
        entry.versions.push(version.clone());
        entry.deployments.push(VersionDeployment {
            id: Uuid::new_v4(),
            flow_id,
            version_id: version.id,
            previous_version_id,
            kind: request.kind,
            reason: request.reason,
            deployed_at: now,
        });
        inner.version_index.insert(version.id, flow_id);

        tracing::info!("Published flow {} as version {}", flow_id, version.version);
        Ok(version)
    }

    /// Mark a version archived. The live version cannot be archived.
    pub async fn archive(&self, version_id: VersionId) -> Result<FlowVersion, FlowError> {
        let mut inner = self.inner.write().await;
        let flow_id = *inner
            .version_index
            .get(&version_id)
            .ok_or(FlowError::VersionNotFound(version_id))?;
        let entry = inner
            .flows
            .get_mut(&flow_id)
            .ok_or(FlowError::FlowNotFound(flow_id))?;
        let version = entry
            .versions
            .iter_mut()
            .find(|v| v.id == version_id)
            .ok_or(FlowError::VersionNotFound(version_id))?;
        if version.is_current() {
            return Err(FlowError::InvalidState(
                "Cannot archive active version".to_string(),
            ));
        }
        version.status = VersionStatus::Archived;
        tracing::info!("Archived version {} of flow {}", version.version, flow_id);
        Ok(version.clone())
    }

    /// All versions of a flow, newest first.
    pub async fn list_versions(&self, flow_id: FlowId) -> Result<Vec<FlowVersion>, FlowError> {
        let inner = self.inner.read().await;
        let entry = inner
            .flows
            .get(&flow_id)
            .ok_or(FlowError::FlowNotFound(flow_id))?;
        let mut versions = entry.versions.clone();
        versions.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(versions)
    }

    pub async fn get_version(&self, version_id: VersionId) -> Result<FlowVersion, FlowError> {
        let inner = self.inner.read().await;
        inner
            .version_index
            .get(&version_id)
            .and_then(|flow_id| inner.flows.get(flow_id))
            .and_then(|entry| entry.versions.iter().find(|v| v.id == version_id))
            .cloned()
            .ok_or(FlowError::VersionNotFound(version_id))
    }

    /// The published version, if any. Archived versions never qualify.
    pub async fn current_version(&self, flow_id: FlowId) -> Result<Option<FlowVersion>, FlowError> {
        let inner = self.inner.read().await;
        let entry = inner
            .flows
            .get(&flow_id)
            .ok_or(FlowError::FlowNotFound(flow_id))?;
        Ok(entry.current().cloned())
    }

    /// Deployment history, oldest first.
    pub async fn deployments(&self, flow_id: FlowId) -> Result<Vec<VersionDeployment>, FlowError> {
        let inner = self.inner.read().await;
        inner
            .flows
            .get(&flow_id)
            .map(|entry| entry.deployments.clone())
            .ok_or(FlowError::FlowNotFound(flow_id))
    }
}
