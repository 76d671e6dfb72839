mod common;

use common::*;
use flowcore::{ExecutionEvent, ExecutionStatus, NodeEvent, NodeStatus, TenantContext};
use flowruntime::{EventPublisher, FlowRuntime, InMemoryArtifactStore, RuntimeConfig};
use futures::StreamExt;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_subscribe_unknown_execution_ends_immediately() {
    let runtime = test_runtime();
    let mut subscription = runtime.subscribe("exec-0-missing");

    let event = tokio::time::timeout(Duration::from_secs(1), subscription.next())
        .await
        .expect("subscription hung")
        .unwrap();
    assert!(matches!(event, ExecutionEvent::NotFound { ref execution_id } if execution_id == "exec-0-missing"));
    assert!(subscription.next().await.is_none());
}

#[tokio::test]
async fn test_event_stream_follows_node_lifecycle() {
    let runtime = test_runtime();
    let graph = graph(
        vec![
            node("trigger", "test.echo"),
            node("a", "test.echo").with_data(json!({ "delay_ms": 20 })),
            node("b", "test.echo").with_data(json!({ "delay_ms": 10 })),
            node("c", "test.echo"),
        ],
        vec![
            edge("trigger", "a"),
            edge("trigger", "b"),
            edge("a", "c"),
            edge("b", "c"),
        ],
    );
    let flow_id = publish(&runtime, graph).await;
    let execution_id = runtime
        .start_execution(flow_id, json!({}), TenantContext::default())
        .await
        .unwrap();
    let events = runtime.subscribe(&execution_id).collect().await;

    assert!(matches!(
        events.first(),
        Some(ExecutionEvent::ExecutionStarted { total_nodes: 4, .. })
    ));
    match events.last() {
        Some(ExecutionEvent::ExecutionFinished { status, .. }) => {
            assert_eq!(*status, ExecutionStatus::Completed)
        }
        other => panic!("unexpected last event: {:?}", other),
    }
    assert!(events.iter().all(|e| e.execution_id() == execution_id));

    // Per node: started, then completed, nothing after
    let mut transitions: HashMap<&str, Vec<NodeStatus>> = HashMap::new();
    for event in &events {
        if let (Some(node_id), Some(status)) = (event.node_id(), event.node_status()) {
            transitions.entry(node_id).or_default().push(status);
        }
    }
    assert_eq!(transitions.len(), 4);
    for statuses in transitions.values() {
        assert_eq!(statuses, &vec![NodeStatus::Running, NodeStatus::Completed]);
    }

    // Progress never goes backwards
    let progress: Vec<usize> = events
        .iter()
        .filter_map(|e| match e {
            ExecutionEvent::Progress {
                completed_nodes,
                total_nodes,
                ..
            } => {
                assert_eq!(*total_nodes, 4);
                Some(*completed_nodes)
            }
            _ => None,
        })
        .collect();
    assert!(!progress.is_empty());
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(progress.last(), Some(&4));
}

#[tokio::test]
async fn test_failure_is_delivered_as_events() {
    let runtime = test_runtime();
    let graph = graph(
        vec![
            node("trigger", "test.echo"),
            node("a", "test.fail"),
            node("b", "test.echo"),
        ],
        vec![edge("trigger", "a"), edge("a", "b")],
    );
    let flow_id = publish(&runtime, graph).await;
    let execution_id = runtime
        .start_execution(flow_id, json!({}), TenantContext::default())
        .await
        .unwrap();
    let events = runtime.subscribe(&execution_id).collect().await;

    assert!(events.iter().any(|e| matches!(
        e,
        ExecutionEvent::NodeFailed { node_id, error, .. } if node_id == "a" && error.contains("boom")
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        ExecutionEvent::NodeSkipped { node_id, .. } if node_id == "b"
    )));
    match events.last() {
        Some(ExecutionEvent::ExecutionFinished { status, error, .. }) => {
            assert_eq!(*status, ExecutionStatus::Failed);
            assert!(error.as_deref().unwrap().contains("node a failed"));
        }
        other => panic!("unexpected last event: {:?}", other),
    }
}

#[tokio::test]
async fn test_executor_events_are_forwarded() {
    let runtime = test_runtime();
    let flow_id = publish(&runtime, chain()).await;
    let execution_id = runtime
        .start_execution(flow_id, json!({}), TenantContext::default())
        .await
        .unwrap();
    let events = runtime.subscribe(&execution_id).collect().await;

    let messages: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            ExecutionEvent::NodeEvent {
                event: NodeEvent::Info { message },
                ..
            } => Some(message.as_str()),
            _ => None,
        })
        .collect();
    assert!(messages.contains(&"echo from a"));
    assert!(messages.contains(&"echo from b"));
}

#[tokio::test]
async fn test_late_subscriber_gets_terminal_state() {
    let runtime = test_runtime();
    let execution = run(&runtime, chain(), json!({ "x": 1 })).await;

    let events = runtime.subscribe(&execution.execution_id).collect().await;
    assert_eq!(events.len(), 1);
    match &events[0] {
        ExecutionEvent::ExecutionFinished { status, result, .. } => {
            assert_eq!(*status, ExecutionStatus::Completed);
            assert_eq!(result, &execution.result);
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn test_subscription_as_stream() {
    let runtime = test_runtime();
    let flow_id = publish(&runtime, chain()).await;
    let execution_id = runtime
        .start_execution(flow_id, json!({}), TenantContext::default())
        .await
        .unwrap();

    let stream = runtime.subscribe(&execution_id).into_stream();
    futures::pin_mut!(stream);
    let mut last = None;
    while let Some(event) = stream.next().await {
        last = Some(event);
    }
    assert!(last.map(|e| e.is_terminal()).unwrap_or(false));
}

#[tokio::test]
async fn test_cancelled_run_ends_with_cancelled_event() {
    let runtime = test_runtime();
    let graph = graph(
        vec![
            node("trigger", "test.echo"),
            node("slow", "test.sleep").with_data(json!({ "delay_ms": 5000 })),
        ],
        vec![edge("trigger", "slow")],
    );
    let flow_id = publish(&runtime, graph).await;
    let execution_id = runtime
        .start_execution(flow_id, json!({}), TenantContext::default())
        .await
        .unwrap();
    let mut subscription = runtime.subscribe(&execution_id);

    loop {
        match subscription.next().await {
            Some(ExecutionEvent::NodeStarted { node_id, .. }) if node_id == "slow" => break,
            Some(_) => continue,
            None => panic!("stream ended before slow node started"),
        }
    }
    runtime.cancel(&execution_id).await.unwrap();

    let rest = subscription.collect().await;
    match rest.last() {
        Some(ExecutionEvent::ExecutionFinished { status, result, .. }) => {
            assert_eq!(*status, ExecutionStatus::Cancelled);
            assert_eq!(*result, None);
        }
        other => panic!("unexpected last event: {:?}", other),
    }
}

#[tokio::test]
async fn test_subscriber_of_freshly_stored_run_gets_live_events() {
    init_tracing();
    let store = Arc::new(GatedStore::new());
    let runtime = Arc::new(
        FlowRuntime::with_stores(
            test_registry(),
            RuntimeConfig::default(),
            store.clone(),
            Arc::new(InMemoryArtifactStore::new()),
        )
        .unwrap(),
    );
    let flow_id = publish(&runtime, chain()).await;

    let starting = {
        let runtime = runtime.clone();
        tokio::spawn(async move {
            runtime
                .start_execution(flow_id, json!({}), TenantContext::default())
                .await
        })
    };
    store.created.notified().await;

    // The row is visible but the run has not been handed to the scheduler
    let listed = runtime.list_executions(flow_id, 1).await;
    assert_eq!(listed[0].status, ExecutionStatus::Pending);
    let execution_id = listed[0].execution_id.clone();
    let subscription = runtime.subscribe(&execution_id);

    store.release.notify_one();
    assert_eq!(starting.await.unwrap().unwrap(), execution_id);

    let events = subscription.collect().await;
    assert!(matches!(
        events.first(),
        Some(ExecutionEvent::ExecutionStarted { .. })
    ));
    match events.last() {
        Some(ExecutionEvent::ExecutionFinished { status, .. }) => {
            assert_eq!(*status, ExecutionStatus::Completed)
        }
        other => panic!("unexpected last event: {:?}", other),
    }
}

#[tokio::test]
async fn test_zero_capacity_publisher_still_delivers() {
    let publisher = EventPublisher::new(0);
    publisher.open("exec-1-abcdef0");
    let mut receiver = publisher.subscribe("exec-1-abcdef0").unwrap();

    publisher.publish(ExecutionEvent::NotFound {
        execution_id: "exec-1-abcdef0".into(),
    });

    assert!(matches!(
        receiver.recv().await.unwrap(),
        ExecutionEvent::NotFound { .. }
    ));
    assert!(publisher.subscribe("exec-1-abcdef0").is_none());
}
