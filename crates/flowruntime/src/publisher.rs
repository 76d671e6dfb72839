use crate::store::ExecutionStore;
use chrono::Utc;
use flowcore::{EventEmitter, ExecutionEvent, ExecutionId, NodeId};
use futures::stream::{self, Stream};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast::{self, error::RecvError};

/// Fan-out of tracker state changes to live subscribers, one broadcast
/// channel per execution.
///
/// Delivery is best-effort. All events of a run go through a single
/// channel, so events for one node arrive in the order they were sent.
pub struct EventPublisher {
    channels: RwLock<HashMap<ExecutionId, broadcast::Sender<ExecutionEvent>>>,
    capacity: usize,
}

impl EventPublisher {
    /// `capacity` is clamped to at least one slot per channel.
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Open the channel for a run. Idempotent.
    pub fn open(&self, execution_id: &str) -> broadcast::Sender<ExecutionEvent> {
        let mut channels = self.channels.write().unwrap_or_else(|e| e.into_inner());
        channels
            .entry(execution_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Send an event to the run's subscribers. A terminal event closes
    /// the channel once sent.
    pub fn publish(&self, event: ExecutionEvent) {
        let terminal = event.is_terminal();
        let execution_id = event.execution_id().to_string();
        let sender = {
            let channels = self.channels.read().unwrap_or_else(|e| e.into_inner());
            channels.get(&execution_id).cloned()
        };
        if let Some(sender) = sender {
            // No receivers is not an error
            let _ = sender.send(event);
        }
        if terminal {
            self.close(&execution_id);
        }
    }

    pub fn close(&self, execution_id: &str) {
        let mut channels = self.channels.write().unwrap_or_else(|e| e.into_inner());
        channels.remove(execution_id);
    }

    pub fn subscribe(&self, execution_id: &str) -> Option<broadcast::Receiver<ExecutionEvent>> {
        let channels = self.channels.read().unwrap_or_else(|e| e.into_inner());
        channels.get(execution_id).map(|sender| sender.subscribe())
    }

    /// Emitter handed to a node so its executor can stream its own events.
    pub fn emitter(&self, execution_id: &str, node_id: &NodeId) -> EventEmitter {
        let sender = self.open(execution_id);
        EventEmitter::new(execution_id.to_string(), node_id.clone(), sender)
    }
}

/// Stream of one run's events, always ending with a terminal event.
///
/// A subscriber that arrives after the run finished, or whose channel
/// closed under it, gets the terminal state rebuilt from the store; an
/// unknown execution id yields a single `NotFound`.
pub struct ExecutionSubscription {
    execution_id: ExecutionId,
    receiver: Option<broadcast::Receiver<ExecutionEvent>>,
    store: Arc<dyn ExecutionStore>,
    finished: bool,
}

impl ExecutionSubscription {
    pub(crate) fn new(
        execution_id: ExecutionId,
        receiver: Option<broadcast::Receiver<ExecutionEvent>>,
        store: Arc<dyn ExecutionStore>,
    ) -> Self {
        Self {
            execution_id,
            receiver,
            store,
            finished: false,
        }
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Next event, or `None` once the terminal event has been delivered.
    pub async fn next(&mut self) -> Option<ExecutionEvent> {
        if self.finished {
            return None;
        }

        if let Some(receiver) = self.receiver.as_mut() {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        if event.is_terminal() {
                            self.finished = true;
                        }
                        return Some(event);
                    }
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(
                            "Subscriber of {} lagged, {} events dropped",
                            self.execution_id,
                            missed
                        );
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            self.receiver = None;
        }

        self.finished = true;
        Some(self.terminal_from_store().await)
    }

    async fn terminal_from_store(&self) -> ExecutionEvent {
        match self.store.get_execution(&self.execution_id).await {
            Some(execution) => ExecutionEvent::ExecutionFinished {
                execution_id: execution.execution_id,
                status: execution.status,
                result: execution.result,
                error: execution.error,
                timestamp: execution.end_time.unwrap_or_else(Utc::now),
            },
            None => ExecutionEvent::NotFound {
                execution_id: self.execution_id.clone(),
            },
        }
    }

    /// Drain every remaining event, terminal one included.
    pub async fn collect(mut self) -> Vec<ExecutionEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.next().await {
            events.push(event);
        }
        events
    }

    pub fn into_stream(self) -> impl Stream<Item = ExecutionEvent> {
        stream::unfold(self, |mut subscription| async move {
            subscription.next().await.map(|event| (event, subscription))
        })
    }
}
