use crate::artifacts::{ArtifactStore, InMemoryArtifactStore};
use crate::config::RuntimeConfig;
use crate::publisher::{EventPublisher, ExecutionSubscription};
use crate::registry::NodeRegistry;
use crate::scheduler::{RunRequest, Scheduler};
use crate::store::{ExecutionStore, InMemoryExecutionStore};
use crate::tracker::ExecutionTracker;
use crate::validator::GraphValidator;
use crate::versions::VersionManager;
use flowcore::{
    new_execution_id, ExecutionId, ExecutionSource, FlowError, FlowExecution, FlowGraph, FlowId,
    FlowVersion, TenantContext, VersionId,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio_util::sync::CancellationToken;

/// Main entry point of the engine: owns the registry, validator, version
/// manager, tracker and scheduler, and runs each execution on its own task.
pub struct FlowRuntime {
    config: RuntimeConfig,
    registry: Arc<NodeRegistry>,
    validator: Arc<GraphValidator>,
    versions: Arc<VersionManager>,
    tracker: Arc<ExecutionTracker>,
    artifacts: Arc<dyn ArtifactStore>,
    scheduler: Arc<Scheduler>,
    active: Arc<RwLock<HashMap<ExecutionId, CancellationToken>>>,
}

impl FlowRuntime {
    /// Runtime with an empty registry. Fails if `config` is invalid.
    pub fn with_config(config: RuntimeConfig) -> Result<Self, FlowError> {
        Self::with_registry(Arc::new(NodeRegistry::new()), config)
    }

    /// Create a runtime around a pre-populated registry, with in-memory
    /// execution and artifact stores.
    pub fn with_registry(
        registry: Arc<NodeRegistry>,
        config: RuntimeConfig,
    ) -> Result<Self, FlowError> {
        Self::with_stores(
            registry,
            config,
            Arc::new(InMemoryExecutionStore::new()),
            Arc::new(InMemoryArtifactStore::new()),
        )
    }

    pub fn with_stores(
        registry: Arc<NodeRegistry>,
        config: RuntimeConfig,
        store: Arc<dyn ExecutionStore>,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> Result<Self, FlowError> {
        config.validate()?;
        let validator = Arc::new(GraphValidator::new(registry.clone()));
        let versions = Arc::new(VersionManager::new(validator.clone()));
        let publisher = Arc::new(EventPublisher::new(config.event_buffer_size));
        let tracker = Arc::new(ExecutionTracker::new(store, publisher));
        let scheduler = Arc::new(Scheduler::new(
            registry.clone(),
            tracker.clone(),
            artifacts.clone(),
            config.clone(),
        )?);

        Ok(Self {
            config,
            registry,
            validator,
            versions,
            tracker,
            artifacts,
            scheduler,
            active: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Registry for registering node types
    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Flow and version management
    pub fn versions(&self) -> &Arc<VersionManager> {
        &self.versions
    }

    pub fn validate(&self, graph: &FlowGraph) -> Result<(), FlowError> {
        self.validator.validate(graph)?;
        Ok(())
    }

    pub async fn publish(
        &self,
        flow_id: FlowId,
        changelog: Option<String>,
    ) -> Result<FlowVersion, FlowError> {
        self.versions.publish(flow_id, changelog).await
    }

    pub async fn archive(&self, version_id: VersionId) -> Result<FlowVersion, FlowError> {
        self.versions.archive(version_id).await
    }

    pub async fn rollback(
        &self,
        flow_id: FlowId,
        version_id: VersionId,
        reason: Option<String>,
    ) -> Result<FlowVersion, FlowError> {
        self.versions.rollback(flow_id, version_id, reason).await
    }

    /// Start a run against the flow's published version. Returns as soon
    /// as the run is recorded; execution continues in the background.
    pub async fn start_execution(
        &self,
        flow_id: FlowId,
        input: Value,
        tenant: TenantContext,
    ) -> Result<ExecutionId, FlowError> {
        let version = self
            .versions
            .current_version(flow_id)
            .await?
            .ok_or(FlowError::NoPublishedVersion(flow_id))?;
        self.launch(
            flow_id,
            version.graph,
            ExecutionSource::Published(version.version),
            input,
            tenant,
        )
        .await
    }

    /// Test-run the flow's working draft without publishing it.
    pub async fn start_draft_execution(
        &self,
        flow_id: FlowId,
        input: Value,
        tenant: TenantContext,
    ) -> Result<ExecutionId, FlowError> {
        let flow = self.versions.get_flow(flow_id).await?;
        self.launch(flow_id, flow.graph(), ExecutionSource::Draft, input, tenant)
            .await
    }

    async fn launch(
        &self,
        flow_id: FlowId,
        graph: FlowGraph,
        source: ExecutionSource,
        input: Value,
        tenant: TenantContext,
    ) -> Result<ExecutionId, FlowError> {
        // Rejected graphs never leave an execution row behind
        self.validator.validate(&graph)?;

        let execution_id = new_execution_id();
        self.tracker
            .on_run_created(FlowExecution::new(
                execution_id.clone(),
                flow_id,
                source,
                input.clone(),
                graph.nodes.len(),
            ))
            .await?;

        let cancellation = CancellationToken::new();
        self.active
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(execution_id.clone(), cancellation.clone());

        let request = RunRequest {
            execution_id: execution_id.clone(),
            flow_id,
            graph,
            input,
            tenant,
            cancellation,
        };
        let scheduler = self.scheduler.clone();
        let active = self.active.clone();
        tokio::spawn(async move {
            let execution_id = request.execution_id.clone();
            scheduler.run(request).await;
            active
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&execution_id);
        });

        tracing::info!("Queued execution {} for flow {}", execution_id, flow_id);
        Ok(execution_id)
    }

    /// Run state with nested node executions and artifacts.
    pub async fn get_execution(&self, execution_id: &str) -> Result<FlowExecution, FlowError> {
        self.tracker
            .store()
            .get_execution(execution_id)
            .await
            .ok_or_else(|| FlowError::ExecutionNotFound(execution_id.to_string()))
    }

    pub async fn list_executions(&self, flow_id: FlowId, limit: usize) -> Vec<FlowExecution> {
        self.tracker.store().list_executions(flow_id, limit).await
    }

    /// Delete a finished run, its node rows and its stored artifacts.
    pub async fn delete_execution(&self, execution_id: &str) -> Result<(), FlowError> {
        let execution = self.get_execution(execution_id).await?;
        if !execution.status.is_terminal() {
            return Err(FlowError::InvalidState(format!(
                "execution {} is still {:?}",
                execution_id, execution.status
            )));
        }
        let removed = self.tracker.store().delete_execution(execution_id).await?;
        for artifact in &removed.artifacts {
            if let Err(e) = self.artifacts.delete(&artifact.artifact_ref).await {
                tracing::warn!(
                    "Failed to delete artifact {} of {}: {}",
                    artifact.artifact_ref,
                    execution_id,
                    e
                );
            }
        }
        tracing::info!("Deleted execution {}", execution_id);
        Ok(())
    }

    /// Live events of a run. Never fails: an unknown id yields a single
    /// `NotFound` event.
    pub fn subscribe(&self, execution_id: &str) -> ExecutionSubscription {
        ExecutionSubscription::new(
            execution_id.to_string(),
            self.tracker.publisher().subscribe(execution_id),
            self.tracker.store().clone(),
        )
    }

    /// Request cancellation. `Ok(false)` if the run already finished.
    pub async fn cancel(&self, execution_id: &str) -> Result<bool, FlowError> {
        let execution = self.get_execution(execution_id).await?;
        if execution.status.is_terminal() {
            return Ok(false);
        }
        let token = self
            .active
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(execution_id)
            .cloned();
        match token {
            Some(token) => {
                tracing::info!("Cancellation requested for {}", execution_id);
                token.cancel();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn is_active(&self, execution_id: &str) -> bool {
        self.active
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(execution_id)
    }

    /// Wait for a run to reach a terminal state and return it.
    pub async fn wait(&self, execution_id: &str) -> Result<FlowExecution, FlowError> {
        self.subscribe(execution_id).collect().await;
        self.get_execution(execution_id).await
    }
}
