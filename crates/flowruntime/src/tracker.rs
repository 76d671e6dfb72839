use crate::publisher::EventPublisher;
use crate::store::{ExecutionStore, NodeSettlement, RunSettlement};
use chrono::Utc;
use flowcore::{
    EventEmitter, ExecutionArtifact, ExecutionEvent, FlowError, FlowExecution, FlowId,
    NodeError, NodeExecution, NodeId, NodeStatus,
};
use serde_json::Value;
use std::sync::Arc;

/// Records run and node transitions in the store, then pushes each one
/// through the publisher. Never decides scheduling.
///
/// The store write always happens first, so a subscriber that sees an
/// event can find the same state by querying.
pub struct ExecutionTracker {
    store: Arc<dyn ExecutionStore>,
    publisher: Arc<EventPublisher>,
}

impl ExecutionTracker {
    pub fn new(store: Arc<dyn ExecutionStore>, publisher: Arc<EventPublisher>) -> Self {
        Self { store, publisher }
    }

    pub fn store(&self) -> &Arc<dyn ExecutionStore> {
        &self.store
    }

    pub fn publisher(&self) -> &Arc<EventPublisher> {
        &self.publisher
    }

    pub fn emitter(&self, execution_id: &str, node_id: &NodeId) -> EventEmitter {
        self.publisher.emitter(execution_id, node_id)
    }

    /// Open the run's event channel, then persist the pending run. Anyone
    /// who can see the row can also subscribe to its live events.
    pub async fn on_run_created(&self, execution: FlowExecution) -> Result<(), FlowError> {
        let execution_id = execution.execution_id.clone();
        self.publisher.open(&execution_id);
        if let Err(e) = self.store.create_execution(execution).await {
            self.publisher.close(&execution_id);
            return Err(e.into());
        }
        Ok(())
    }

    pub async fn on_run_start(
        &self,
        execution_id: &str,
        flow_id: FlowId,
        total_nodes: usize,
    ) -> Result<(), FlowError> {
        self.store.mark_running(execution_id).await?;
        self.publisher.publish(ExecutionEvent::ExecutionStarted {
            execution_id: execution_id.to_string(),
            flow_id,
            total_nodes,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    pub async fn on_node_start(&self, node: NodeExecution) -> Result<(), FlowError> {
        let event = ExecutionEvent::NodeStarted {
            execution_id: node.execution_id.clone(),
            node_id: node.node_id.clone(),
            node_type: node.node_type.clone(),
            timestamp: node.start_time.unwrap_or_else(Utc::now),
        };
        self.store.create_node(node).await?;
        self.publisher.publish(event);
        Ok(())
    }

    pub async fn on_node_complete(
        &self,
        execution_id: &str,
        node_id: &str,
        output: Value,
        duration_ms: u64,
    ) -> Result<(), FlowError> {
        let end_time = Utc::now();
        self.store
            .finish_node(
                execution_id,
                node_id,
                NodeSettlement {
                    status: NodeStatus::Completed,
                    output: Some(output.clone()),
                    error: None,
                    end_time,
                },
            )
            .await?;
        self.publisher.publish(ExecutionEvent::NodeCompleted {
            execution_id: execution_id.to_string(),
            node_id: node_id.to_string(),
            output,
            duration_ms,
            timestamp: end_time,
        });
        Ok(())
    }

    pub async fn on_node_failed(
        &self,
        execution_id: &str,
        node_id: &str,
        error: &NodeError,
    ) -> Result<(), FlowError> {
        let end_time = Utc::now();
        self.store
            .finish_node(
                execution_id,
                node_id,
                NodeSettlement {
                    status: NodeStatus::Failed,
                    output: None,
                    error: Some(error.to_string()),
                    end_time,
                },
            )
            .await?;
        self.publisher.publish(ExecutionEvent::NodeFailed {
            execution_id: execution_id.to_string(),
            node_id: node_id.to_string(),
            error: error.to_string(),
            timestamp: end_time,
        });
        Ok(())
    }

    /// Record a node that will never be dispatched.
    pub async fn on_node_skipped(&self, node: NodeExecution) -> Result<(), FlowError> {
        let event = ExecutionEvent::NodeSkipped {
            execution_id: node.execution_id.clone(),
            node_id: node.node_id.clone(),
            reason: node.error.clone().unwrap_or_default(),
            timestamp: node.end_time.unwrap_or_else(Utc::now),
        };
        self.store.create_node(node).await?;
        self.publisher.publish(event);
        Ok(())
    }

    pub async fn on_artifact(&self, artifact: ExecutionArtifact) -> Result<(), FlowError> {
        self.store.add_artifact(artifact).await?;
        Ok(())
    }

    pub fn on_progress(&self, execution_id: &str, completed_nodes: usize, total_nodes: usize) {
        self.publisher.publish(ExecutionEvent::Progress {
            execution_id: execution_id.to_string(),
            completed_nodes,
            total_nodes,
            timestamp: Utc::now(),
        });
    }

    /// Finalize the run and send the terminal event, closing the channel.
    pub async fn on_run_complete(
        &self,
        execution_id: &str,
        settlement: RunSettlement,
    ) -> Result<(), FlowError> {
        let event = ExecutionEvent::ExecutionFinished {
            execution_id: execution_id.to_string(),
            status: settlement.status,
            result: settlement.result.clone(),
            error: settlement.error.clone(),
            timestamp: settlement.end_time,
        };
        let stored = self.store.finish_execution(execution_id, settlement).await;
        // Subscribers are released even when the write fails.
        self.publisher.publish(event);
        stored?;
        Ok(())
    }
}
