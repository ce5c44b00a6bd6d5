//! Ledgerflow CLI entry point.
//!
//! Binary name: `lflow`
//!
//! Wires the engine to its SQLite store, in-memory cache, and in-process
//! queue, and exposes commands to trigger a dry run of a workflow, inspect
//! a stored workflow, and validate the step graph configuration.

mod handlers;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{ArgAction, Parser, Subcommand};
use ledgerflow_core::engine::WorkflowEngine;
use ledgerflow_core::graph::validate_graph;
use ledgerflow_core::repository::WorkflowStore;
use ledgerflow_infra::cache::MemoryStatusCache;
use ledgerflow_infra::config::load_engine_config;
use ledgerflow_infra::queue::{QueueWorker, channel};
use ledgerflow_infra::sqlite::{DatabasePool, SqliteWorkflowStore};
use ledgerflow_types::context::WorkflowContext;
use ledgerflow_types::workflow::WorkflowKind;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "lflow", about = "Ledgerflow workflow engine runner", version)]
struct Cli {
    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Export spans via the OpenTelemetry stdout exporter
    #[arg(long, global = true)]
    otel: bool,

    /// Data directory holding the database and config.toml
    #[arg(long, global = true, env = "LEDGERFLOW_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Trigger a workflow and drive it to a terminal status with simulated
    /// handlers
    Run {
        /// Workflow kind: economy_setup, user_recovery, or redemption
        #[arg(long)]
        kind: String,

        /// Idempotency seed for the trigger (e.g. a token id)
        #[arg(long)]
        seed: String,

        /// Owning client id
        #[arg(long)]
        client_id: Option<Uuid>,

        /// Request params as a JSON object
        #[arg(long)]
        params: Option<String>,
    },

    /// Print a stored workflow and its steps as JSON
    Status {
        /// Workflow id
        id: Uuid,
    },

    /// Check the step graph tables for referential consistency
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if std::env::var_os("RUST_LOG").is_none() {
        let filter = match cli.verbose {
            0 => "warn",
            1 => "info,ledgerflow=debug",
            _ => "trace",
        };
        // SAFETY: called before any other thread is spawned.
        unsafe { std::env::set_var("RUST_LOG", filter) };
    }
    ledgerflow_observe::tracing_setup::init_tracing(cli.otel)
        .map_err(|e| anyhow::anyhow!("tracing init failed: {e}"))?;

    let data_dir = cli.data_dir.unwrap_or_else(|| {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(format!("{home}/.ledgerflow"))
    });

    match cli.command {
        Commands::Run {
            kind,
            seed,
            client_id,
            params,
        } => {
            let kind = WorkflowKind::parse(&kind)
                .ok_or_else(|| anyhow::anyhow!("unknown workflow kind '{kind}'"))?;
            let params = parse_params(params.as_deref())?;
            run_workflow(&data_dir, kind, client_id, params, &seed).await?;
        }

        Commands::Status { id } => {
            let store = open_store(&data_dir).await?;
            let workflow = store
                .get_workflow(&id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("workflow {id} not found"))?;
            let steps = store.steps_for_workflow(&id).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "workflow": workflow,
                    "steps": steps,
                }))?
            );
        }

        Commands::Validate => {
            validate_graph()?;
            let missing = handlers::simulated_registry().missing_kinds();
            anyhow::ensure!(missing.is_empty(), "unhandled step kinds: {missing:?}");
            println!("step graph ok");
        }
    }

    ledgerflow_observe::tracing_setup::shutdown_tracing();
    Ok(())
}

fn parse_params(raw: Option<&str>) -> anyhow::Result<WorkflowContext> {
    let Some(raw) = raw else {
        return Ok(WorkflowContext::new());
    };
    let value: serde_json::Value = serde_json::from_str(raw)?;
    let serde_json::Value::Object(map) = value else {
        anyhow::bail!("--params must be a JSON object");
    };
    Ok(WorkflowContext::from_pairs(map))
}

async fn open_store(data_dir: &PathBuf) -> anyhow::Result<SqliteWorkflowStore> {
    tokio::fs::create_dir_all(data_dir).await?;
    let url = format!("sqlite://{}/ledgerflow.db?mode=rwc", data_dir.display());
    let pool = DatabasePool::new(&url).await?;
    Ok(SqliteWorkflowStore::new(pool))
}

async fn run_workflow(
    data_dir: &PathBuf,
    kind: WorkflowKind,
    client_id: Option<Uuid>,
    params: WorkflowContext,
    seed: &str,
) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(data_dir).await?;
    let config = load_engine_config(data_dir).await;
    let url = format!("sqlite://{}/ledgerflow.db?mode=rwc", data_dir.display());
    let pool = DatabasePool::new(&url).await?;

    let (publisher, rx) = channel(config.queue_capacity);
    let engine = Arc::new(WorkflowEngine::new(
        SqliteWorkflowStore::new(pool.clone()),
        MemoryStatusCache::new(),
        publisher.clone(),
        handlers::simulated_registry(),
        config.clone(),
    ));
    let shutdown = CancellationToken::new();
    let worker = QueueWorker::new(
        engine.clone(),
        rx,
        publisher.sender(),
        config.max_redeliveries,
        shutdown.clone(),
    );
    let worker = tokio::spawn(worker.run());

    let (workflow, _) = engine
        .insert_init_step(kind, client_id, params, seed)
        .await?;
    println!("workflow {} triggered ({kind})", workflow.id);

    let store = SqliteWorkflowStore::new(pool);
    let finished = timeout(Duration::from_secs(60), async {
        loop {
            let workflow = store
                .get_workflow(&workflow.id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("workflow disappeared"))?;
            if workflow.status.is_terminal() {
                return anyhow::Ok(workflow);
            }
            sleep(Duration::from_millis(25)).await;
        }
    })
    .await
    .map_err(|_| anyhow::anyhow!("workflow did not finish within 60s"))??;

    shutdown.cancel();
    worker.await?;

    let steps = store.steps_for_workflow(&finished.id).await?;
    println!("status: {}", finished.status.as_str());
    for step in &steps {
        println!("  {:>2}. {:<34} {}", step.sequence, step.kind.as_str(), step.status.as_str());
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&finished.response_data.to_value())?
    );
    Ok(())
}
