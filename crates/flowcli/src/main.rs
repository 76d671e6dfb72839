// crates/flowcli/src/main.rs

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use flowcore::{ExecutionEvent, Flow, NodeEvent, NodeSpec, TenantContext};
use flowruntime::{FlowRuntime, NodeRegistry, RuntimeConfig};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flow")]
#[command(about = "Flow Engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish and execute a flow file
    Run {
        /// Path to flow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Input data as JSON string
        #[arg(short, long)]
        input: Option<String>,

        /// Runtime configuration (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Run the draft without publishing it
        #[arg(long)]
        draft: bool,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a flow file
    Validate {
        /// Path to flow JSON file
        file: PathBuf,
    },

    /// List available node types
    Nodes,

    /// Create a new example flow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "flow.json")]
        output: PathBuf,
    },
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn standard_registry() -> Arc<NodeRegistry> {
    let registry = NodeRegistry::new();
    flownodes::register_all(&registry);
    Arc::new(registry)
}

fn load_flow(file: &Path) -> Result<Flow> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("cannot read {}", file.display()))?;
    let flow: Flow = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a valid flow file", file.display()))?;
    Ok(flow)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            input,
            config,
            draft,
            verbose,
        } => {
            init_logging(verbose);
            run_flow(file, input, config, draft).await?;
        }

        Commands::Validate { file } => {
            init_logging(false);
            validate_flow(file)?;
        }

        Commands::Nodes => {
            list_nodes();
        }

        Commands::Init { output } => {
            create_example_flow(output)?;
        }
    }

    Ok(())
}

async fn run_flow(
    file: PathBuf,
    input: Option<String>,
    config: Option<PathBuf>,
    draft: bool,
) -> Result<()> {
    println!("🚀 Loading flow from: {}", file.display());

    let flow = load_flow(&file)?;
    println!("📋 Flow: {}", flow.name);
    println!("   Nodes: {}", flow.nodes.len());
    println!("   Edges: {}", flow.edges.len());
    println!();

    let input: Value = match input {
        Some(raw) => serde_json::from_str(&raw).context("input must be valid JSON")?,
        None => Value::Object(Default::default()),
    };

    let config = match config {
        Some(path) => RuntimeConfig::load(&path)?,
        None => RuntimeConfig::default(),
    };
    let runtime = FlowRuntime::with_registry(standard_registry(), config)?;

    let flow = runtime.versions().insert_flow(flow).await;
    let execution_id = if draft {
        runtime
            .start_draft_execution(flow.id, input, TenantContext::default())
            .await?
    } else {
        let version = runtime.publish(flow.id, None).await?;
        println!("📌 Published version {}", version.version);
        runtime
            .start_execution(flow.id, input, TenantContext::default())
            .await?
    };

    let mut events = runtime.subscribe(&execution_id);
    while let Some(event) = events.next().await {
        print_event(&event);
    }

    let execution = runtime.get_execution(&execution_id).await?;

    println!();
    println!("📊 Execution Summary:");
    println!("   Execution ID: {}", execution.execution_id);
    println!("   Status: {:?}", execution.status);
    println!(
        "   Completed: {}/{} nodes ({} failed, {} skipped)",
        execution.completed_nodes(),
        execution.total_nodes,
        execution.failed_nodes(),
        execution.skipped_nodes()
    );
    if let Some(ms) = execution.duration_ms() {
        println!("   Duration: {}ms", ms);
    }
    for artifact in &execution.artifacts {
        println!("   📎 {} ({} bytes) -> {}", artifact.name, artifact.size, artifact.artifact_ref);
    }

    if let Some(result) = &execution.result {
        println!();
        println!("📤 Result:");
        println!("{}", serde_json::to_string_pretty(result)?);
    }

    if let Some(error) = &execution.error {
        anyhow::bail!("execution {} did not complete: {}", execution.execution_id, error);
    }

    Ok(())
}

fn print_event(event: &ExecutionEvent) {
    match event {
        ExecutionEvent::ExecutionStarted { total_nodes, .. } => {
            println!("▶️  Execution started ({} nodes)", total_nodes);
        }
        ExecutionEvent::NodeStarted {
            node_id, node_type, ..
        } => {
            println!("  ⚡ Starting node: {} ({})", node_id, node_type);
        }
        ExecutionEvent::NodeCompleted {
            node_id,
            duration_ms,
            ..
        } => {
            println!("  ✅ Node {} completed in {}ms", node_id, duration_ms);
        }
        ExecutionEvent::NodeFailed { node_id, error, .. } => {
            println!("  ❌ Node {} failed: {}", node_id, error);
        }
        ExecutionEvent::NodeSkipped {
            node_id, reason, ..
        } => {
            println!("  ⏭️  Node {} skipped: {}", node_id, reason);
        }
        ExecutionEvent::NodeEvent { node_id, event, .. } => match event {
            NodeEvent::Info { message } => {
                println!("     ℹ️  [{}] {}", node_id, message);
            }
            NodeEvent::Warning { message } => {
                println!("     ⚠️  [{}] {}", node_id, message);
            }
            NodeEvent::Progress { percent, message } => {
                if let Some(msg) = message {
                    println!("     📊 [{}] {}% - {}", node_id, percent, msg);
                } else {
                    println!("     📊 [{}] {}%", node_id, percent);
                }
            }
            NodeEvent::Data { .. } => {}
        },
        ExecutionEvent::Progress {
            completed_nodes,
            total_nodes,
            ..
        } => {
            tracing::debug!("Progress {}/{}", completed_nodes, total_nodes);
        }
        ExecutionEvent::ExecutionFinished { status, .. } => {
            println!("✨ Execution finished: {:?}", status);
        }
        ExecutionEvent::NotFound { execution_id } => {
            println!("💥 Execution {} not found", execution_id);
        }
    }
}

fn validate_flow(file: PathBuf) -> Result<()> {
    println!("🔍 Validating flow: {}", file.display());

    let flow = load_flow(&file)?;
    let runtime = FlowRuntime::with_registry(standard_registry(), RuntimeConfig::default())?;

    match runtime.validate(&flow.graph()) {
        Ok(()) => {
            println!("✅ Flow is valid:");
            println!("   Name: {}", flow.name);
            println!("   Nodes: {}", flow.nodes.len());
            println!("   Edges: {}", flow.edges.len());
            Ok(())
        }
        Err(flowcore::FlowError::Validation(errors)) => {
            println!("❌ Flow is invalid:");
            for violation in &errors.violations {
                println!("   • {}", violation);
            }
            anyhow::bail!("{} violation(s) found", errors.violations.len())
        }
        Err(e) => Err(e.into()),
    }
}

fn list_nodes() {
    println!("📦 Available Node Types:");
    println!();

    let registry = standard_registry();
    for node_type in registry.list_node_types() {
        if let Some(metadata) = registry.get_metadata(&node_type) {
            println!("  • {} ({})", node_type, metadata.category);
            println!("    {}", metadata.description);
        } else {
            println!("  • {}", node_type);
        }
    }
}

fn create_example_flow(output: PathBuf) -> Result<()> {
    let mut flow = Flow::new("Example HTTP Flow", "local");
    flow.description = Some("Fetches data from an API and logs the result".to_string());

    let trigger = flow.add_node(
        NodeSpec::new("start", "trigger.manual")
            .with_label("Start")
            .with_position(0.0, 100.0),
    );
    let fetch = flow.add_node(
        NodeSpec::new("fetch", "http.request")
            .with_label("Fetch Data")
            .with_data(serde_json::json!({ "method": "GET", "url": "{{default.url}}" }))
            .with_position(200.0, 100.0),
    );
    let log = flow.add_node(
        NodeSpec::new("log", "debug.log")
            .with_label("Log Response")
            .with_data(serde_json::json!({ "message": "{{default.body}}" }))
            .with_position(400.0, 100.0),
    );

    flow.connect(trigger, fetch.clone());
    flow.connect(fetch, log);

    let json = serde_json::to_string_pretty(&flow)?;
    std::fs::write(&output, json)?;

    println!("✨ Created example flow: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  flow run --file {} --input '{{\"url\": \"https://api.github.com/zen\"}}'",
        output.display()
    );

    Ok(())
}
