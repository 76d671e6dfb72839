// crates/flownodes/tests/nodes_test.rs

use flowcore::{
    EventEmitter, ExecutionStatus, FlowGraph, NodeContext, NodeError, NodeExecutor, NodeSpec,
    EdgeSpec, TenantContext,
};
use flownodes::{
    register_all, DebugNode, DelayNode, HttpRequestNode, JsonParseNode, JsonStringifyNode,
    ManualTriggerNode, MergeNode, TemplateNode, TextArtifactNode,
};
use flowruntime::{FlowRuntime, NodeRegistry, RuntimeConfig};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// Helper function to create a test context
fn create_test_context(node_type: &str, config: Value, input: Value) -> NodeContext {
    let input: Map<String, Value> = match input {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("default".to_string(), other);
            map
        }
    };
    NodeContext {
        execution_id: "exec-test".to_string(),
        flow_id: uuid::Uuid::new_v4(),
        node_id: "node-1".to_string(),
        node_type: node_type.to_string(),
        input,
        config,
        tenant: TenantContext::default(),
        events: EventEmitter::detached("exec-test".to_string(), "node-1".to_string()),
        cancellation: CancellationToken::new(),
    }
}

#[tokio::test]
async fn test_trigger_passes_object_input_through() {
    let ctx = create_test_context("trigger.manual", Value::Null, json!({ "default": { "x": 1 } }));
    let output = ManualTriggerNode.execute(ctx).await.unwrap();

    assert_eq!(output.value["x"], 1);
    assert_eq!(output.value["triggered"], true);
    assert!(output.value["timestamp"].is_string());
}

#[tokio::test]
async fn test_trigger_wraps_scalar_input() {
    let ctx = create_test_context("trigger.manual", Value::Null, json!("hi"));
    let output = ManualTriggerNode.execute(ctx).await.unwrap();
    assert_eq!(output.value["input"], "hi");
}

#[tokio::test]
async fn test_json_parse_reads_default_port() {
    let ctx = create_test_context("transform.json_parse", Value::Null, json!(r#"{"a":[1,2]}"#));
    let output = JsonParseNode.execute(ctx).await.unwrap();
    assert_eq!(output.value, json!({ "a": [1, 2] }));
}

#[tokio::test]
async fn test_json_parse_rejects_non_string() {
    let ctx = create_test_context("transform.json_parse", Value::Null, json!({ "json": 42 }));
    let err = JsonParseNode.execute(ctx).await.unwrap_err();
    assert_eq!(
        err,
        NodeError::InvalidInputType {
            field: "json".to_string(),
            expected: "string".to_string(),
            actual: "number".to_string(),
        }
    );
}

#[tokio::test]
async fn test_json_parse_missing_input() {
    let ctx = create_test_context("transform.json_parse", Value::Null, json!({}));
    let err = JsonParseNode.execute(ctx).await.unwrap_err();
    assert_eq!(err, NodeError::MissingInput("json".to_string()));
}

#[tokio::test]
async fn test_json_stringify_compact() {
    let ctx = create_test_context(
        "transform.json_stringify",
        json!({ "pretty": false }),
        json!({ "value": { "a": 1 } }),
    );
    let output = JsonStringifyNode.execute(ctx).await.unwrap();
    assert_eq!(output.value, json!(r#"{"a":1}"#));
}

#[tokio::test]
async fn test_merge_combines_ports() {
    let ctx = create_test_context(
        "transform.merge",
        Value::Null,
        json!({ "left": { "a": 1 }, "right": { "b": 2 }, "count": 3 }),
    );
    let output = MergeNode.execute(ctx).await.unwrap();
    assert_eq!(output.value, json!({ "a": 1, "b": 2, "count": 3 }));
}

#[tokio::test]
async fn test_template_interpolates_input() {
    let ctx = create_test_context(
        "transform.template",
        json!({ "template": { "greeting": "Hello {{default.name}}", "items": "{{default.items}}" } }),
        json!({ "default": { "name": "Ada", "items": [1, 2] } }),
    );
    let output = TemplateNode.execute(ctx).await.unwrap();
    assert_eq!(
        output.value,
        json!({ "greeting": "Hello Ada", "items": [1, 2] })
    );
}

#[test]
fn test_template_requires_config() {
    assert!(TemplateNode.validate_config(&json!({})).is_err());
    assert!(TemplateNode.validate_config(&json!({ "template": "x" })).is_ok());
}

#[tokio::test]
async fn test_debug_passes_input_through() {
    let ctx = create_test_context(
        "debug.log",
        json!({ "message": "got {{default.n}}" }),
        json!({ "default": { "n": 5 } }),
    );
    let output = DebugNode.execute(ctx).await.unwrap();
    assert_eq!(output.value, json!({ "n": 5 }));
}

#[tokio::test]
async fn test_delay_waits_then_passes_through() {
    let ctx = create_test_context("time.delay", json!({ "delay_ms": 20 }), json!("payload"));
    let output = DelayNode.execute(ctx).await.unwrap();
    assert_eq!(output.value, json!("payload"));
}

#[tokio::test]
async fn test_delay_observes_cancellation() {
    let ctx = create_test_context("time.delay", json!({ "delay_ms": 10_000 }), Value::Null);
    let token = ctx.cancellation.clone();
    let handle = tokio::spawn(async move { DelayNode.execute(ctx).await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    token.cancel();

    let result = tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("delay ignored cancellation")
        .unwrap();
    assert_eq!(result.unwrap_err(), NodeError::Cancelled);
    assert!(DelayNode.supports_cancellation());
}

#[test]
fn test_delay_config_validation() {
    assert!(DelayNode.validate_config(&json!({ "delay_ms": 5 })).is_ok());
    assert!(DelayNode.validate_config(&json!({ "delay_ms": "soon" })).is_err());
}

#[tokio::test]
async fn test_text_artifact_emits_file() {
    let ctx = create_test_context(
        "artifact.text",
        json!({ "content": "Report for {{default.user}}", "filename": "report.md", "mime_type": "text/markdown" }),
        json!({ "default": { "user": "ada" } }),
    );
    let output = TextArtifactNode.execute(ctx).await.unwrap();

    assert_eq!(output.artifacts.len(), 1);
    let artifact = &output.artifacts[0];
    assert_eq!(artifact.name, "report.md");
    assert_eq!(artifact.mime_type, "text/markdown");
    assert_eq!(artifact.bytes, b"Report for ada".to_vec());
    assert_eq!(output.value["size"], 14);
}

#[test]
fn test_http_config_checks() {
    let node = HttpRequestNode::new();
    assert!(node.validate_config(&Value::Null).is_ok());
    assert!(node.validate_config(&json!({ "method": "post" })).is_ok());
    assert!(node.validate_config(&json!({ "method": "BREW" })).is_err());
    assert!(node.is_critical(&json!({ "critical": true })));
    assert!(!node.is_critical(&json!({})));
}

#[tokio::test]
async fn test_http_requires_url() {
    let ctx = create_test_context("http.request", Value::Null, json!({}));
    let err = HttpRequestNode::new().execute(ctx).await.unwrap_err();
    assert_eq!(err, NodeError::MissingInput("url".to_string()));
}

#[test]
fn test_register_all() {
    let registry = NodeRegistry::new();
    register_all(&registry);
    assert_eq!(
        registry.list_node_types(),
        vec![
            "artifact.text",
            "debug.log",
            "http.request",
            "time.delay",
            "transform.json_parse",
            "transform.json_stringify",
            "transform.merge",
            "transform.template",
            "trigger.manual",
        ]
    );
    assert_eq!(registry.get_metadata("time.delay").unwrap().category, "time");
}

#[tokio::test]
async fn test_standard_nodes_in_a_flow() {
    let registry = NodeRegistry::new();
    register_all(&registry);
    let runtime = FlowRuntime::with_registry(Arc::new(registry), RuntimeConfig::default()).unwrap();

    let mut graph = FlowGraph::new();
    graph.nodes = vec![
        NodeSpec::new("start", "trigger.manual"),
        NodeSpec::new("greet", "transform.template")
            .with_data(json!({ "template": "Hello {{default.name}}" })),
        NodeSpec::new("save", "artifact.text").with_data(json!({ "filename": "greeting.txt" })),
    ];
    graph.edges = vec![EdgeSpec::new("start", "greet"), EdgeSpec::new("greet", "save")];

    let flow = runtime.versions().create_flow("greeter", "owner", graph).await;
    let execution_id = runtime
        .start_draft_execution(flow.id, json!({ "name": "Ada" }), TenantContext::default())
        .await
        .unwrap();
    let execution = runtime.wait(&execution_id).await.unwrap();

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.node("greet").unwrap().output, Some(json!("Hello Ada")));
    assert_eq!(execution.artifacts.len(), 1);
    assert_eq!(execution.artifacts[0].name, "greeting.txt");
    assert_eq!(execution.artifacts[0].size, 9);
}
