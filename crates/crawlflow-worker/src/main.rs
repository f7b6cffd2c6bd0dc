//! Crawlflow worker binary.
//!
//! Runs the step interpreter against NATS, seeds workflows, validates
//! definitions and replays single fetch outcomes offline.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crawlflow_core::{load_workflow, StepExecutor, WorkflowDefinition};
use crawlflow_worker::bridge::plan;
use crawlflow_worker::seed::{publish_seed, seed_item};
use crawlflow_worker::{NatsQueue, QueueBridge, Worker, WorkerConfig};

#[derive(Parser)]
#[command(name = "crawlflow-worker")]
#[command(version, about = "Crawlflow workflow step interpreter", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Workflow definition file (overrides CRAWLFLOW_DEFINITION_PATH)
    #[arg(short, long, global = true)]
    definition: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Consume fetch outcomes and route step results (default)
    Run,

    /// Publish the seed work item to the request queue
    Seed {
        /// Seed URL (defaults to the first request step url or taskInfo.baseUrl)
        #[arg(long)]
        url: Option<String>,
    },

    /// Load and validate the workflow definition
    Validate,

    /// Process one fetch outcome JSON file offline and print the routing plan
    Replay {
        /// File holding one serialized fetch outcome
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,crawlflow_worker=debug".into());
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn load_definition(path: &Path) -> Result<WorkflowDefinition> {
    load_workflow(path).with_context(|| format!("Failed to load workflow definition {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let mut config = WorkerConfig::from_env().context("Invalid CRAWLFLOW_* configuration")?;
    if let Some(path) = cli.definition {
        config.definition_path = path;
    }

    init_tracing(config.log_json);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config).await,
        Commands::Seed { url } => seed(config, url).await,
        Commands::Validate => validate(config),
        Commands::Replay { file } => replay(config, file).await,
    }
}

async fn run(config: WorkerConfig) -> Result<()> {
    tracing::info!("Starting Crawlflow worker");

    let definition = Arc::new(load_definition(&config.definition_path)?);
    let names = config.queue_names();
    let concurrency = config.concurrency(definition.task.concurrency);

    tracing::info!(
        worker_id = %config.worker_id,
        task_id = %definition.task_id(),
        steps = definition.len(),
        concurrency,
        responses = %names.responses,
        "Worker configuration loaded"
    );

    let queue = Arc::new(
        NatsQueue::connect(&config.nats_url, &config.nats_stream, &config.nats_consumer, &names).await?,
    );
    let executor = Arc::new(StepExecutor::new(definition));
    let bridge = Arc::new(QueueBridge::new(queue.clone(), executor, names));
    let worker = Worker::new(
        config.worker_id.clone(),
        queue,
        bridge,
        concurrency,
        config.receive_wait(),
        config.shutdown_grace(),
    );

    // Handle shutdown signals
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
            cancel.cancel();
        });
    }

    worker.run(cancel).await
}

async fn seed(config: WorkerConfig, url: Option<String>) -> Result<()> {
    let definition = load_definition(&config.definition_path)?;
    let names = config.queue_names();
    let item = seed_item(&definition, url.as_deref())?;

    let queue = NatsQueue::connect(&config.nats_url, &config.nats_stream, &config.nats_consumer, &names).await?;
    publish_seed(&queue, &names, &item).await
}

fn validate(config: WorkerConfig) -> Result<()> {
    let definition = load_definition(&config.definition_path)?;

    println!(
        "{}: task '{}', {} steps",
        config.definition_path.display(),
        definition.task_id(),
        definition.len()
    );
    for (index, step) in definition.steps.iter().enumerate() {
        println!(
            "  [{}] {} ({}, timeout {}s, retries {}, {} rules)",
            index,
            step.id,
            step.action.kind(),
            step.timeout.as_secs_f64(),
            step.retry_count,
            step.action.rules().len()
        );
    }
    Ok(())
}

async fn replay(config: WorkerConfig, file: PathBuf) -> Result<()> {
    let definition = Arc::new(load_definition(&config.definition_path)?);
    let payload = std::fs::read(&file).with_context(|| format!("Failed to read {}", file.display()))?;

    let executor = Arc::new(StepExecutor::new(definition));
    let routing = plan(&executor, &payload).await;
    let summary = routing.summary();
    let batch = routing.into_batch(&config.queue_names(), "replay", Utc::now())?;

    let routes = batch
        .iter()
        .map(|outbound| {
            let payload: serde_json::Value = serde_json::from_slice(&outbound.payload)?;
            Ok(serde_json::json!({ "subject": outbound.subject, "payload": payload }))
        })
        .collect::<Result<Vec<_>, serde_json::Error>>()?;

    let report = serde_json::json!({ "summary": summary, "routes": routes });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
