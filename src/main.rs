//! # Orchestrator Entry Point
//!
//! `serve` runs the background loops against an in-process broker; the
//! other subcommands operate on the job store directly and print JSON.
//! Outside `serve` no broker is running, so `backlog` reads queue depths
//! from the job store and reports no worker health or scaling advice.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Duration;
use clap::{Parser, Subcommand};
use migration::{Migrator, MigratorTrait};
use orchestrator::{
    broker::{LocalBroker, TaskHandler},
    checkpoint::{CheckpointStore, InMemoryCheckpointStore},
    config::{AppConfig, ConfigLoader},
    db,
    error::ExecutionError,
    lifecycle::SubmitJob,
    models::{JobKind, JobStatus},
    repositories::{CheckpointRepository, JobFilter, JobRepository},
    service::{JobOrchestrator, PageRequest},
    telemetry,
};
use serde::Serialize;
use serde_json::{Value as JsonValue, json};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "orchestrator")]
#[command(about = "Job orchestration for scrape and backfill work", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate,

    /// Run the dispatch, release and monitor loops until interrupted
    Serve {
        /// Register handlers that acknowledge tasks without doing work
        #[arg(long)]
        dry_run: bool,
    },

    /// Submit a job
    Submit {
        /// Job type: scrape_all, scrape_one, scrape_platform, backfill
        job_type: String,
        /// JSON object of job parameters
        #[arg(short, long, default_value = "{}")]
        params: String,
        /// 0 (most urgent) to 9
        #[arg(long)]
        priority: Option<i16>,
        /// Expected maximum duration in seconds
        #[arg(long)]
        sla_budget: Option<i64>,
        /// Job that must complete first
        #[arg(long)]
        depends_on: Option<Uuid>,
        /// Delay before the job becomes eligible, in seconds
        #[arg(long)]
        delay: Option<i64>,
        #[arg(long)]
        max_retries: Option<u32>,
    },

    /// Show one job
    Show { id: Uuid },

    /// List jobs, newest first
    List {
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        job_type: Option<String>,
        #[arg(long)]
        queue: Option<String>,
        #[arg(long)]
        limit: Option<u64>,
        /// Cursor from a previous page
        #[arg(long)]
        cursor: Option<String>,
    },

    /// Pause a pending job
    Pause { id: Uuid },

    /// Resume a paused job
    Resume { id: Uuid },

    /// Cancel a pending or running job
    Cancel { id: Uuid },

    /// Backlog as recorded in the job store
    Backlog,

    /// SLA compliance for one job, or the aggregate report
    Sla {
        /// Job to evaluate; omit for the aggregate report
        #[arg(long)]
        job: Option<Uuid>,
        /// Report window in hours (default from configuration)
        #[arg(long)]
        window_hours: Option<i64>,
    },
}

/// Acknowledges every task with its parameters.
struct DryRunHandler;

#[async_trait]
impl TaskHandler for DryRunHandler {
    async fn run(&self, args: JsonValue) -> Result<JsonValue, ExecutionError> {
        Ok(json!({ "dry_run": true, "params": args.get("params").cloned().unwrap_or(JsonValue::Null) }))
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn build(
    config: &AppConfig,
) -> Result<(JobOrchestrator, Arc<LocalBroker>, UnboundedReceiver<orchestrator::broker::TaskOutcome>)> {
    let db = db::init_pool(config)
        .await
        .context("initializing database connection pool")?;
    Migrator::up(&db, None)
        .await
        .context("running database migrations")?;

    let queues = JobKind::queues().into_iter().map(str::to_string).collect();
    let (broker, outcomes) = LocalBroker::new(&config.broker, queues);
    let broker = Arc::new(broker);
    let checkpoints: Arc<dyn CheckpointStore> = if config.checkpoint.in_memory() {
        warn!("in-memory checkpoint store selected; checkpoints will not survive a restart");
        Arc::new(InMemoryCheckpointStore::new(config.checkpoint.cache_capacity))
    } else {
        Arc::new(CheckpointRepository::new(db.clone()))
    };

    let orchestrator = JobOrchestrator::new(
        Arc::new(JobRepository::new(db)),
        broker.clone(),
        checkpoints,
        config,
    );
    Ok((orchestrator, broker, outcomes))
}

async fn serve(config: AppConfig, dry_run: bool) -> Result<()> {
    let (orchestrator, broker, outcomes) = build(&config).await?;

    if dry_run {
        for kind in JobKind::ALL {
            broker.register(kind.task_name(), DryRunHandler).await;
        }
        warn!("dry-run handlers registered; tasks complete without doing work");
    }

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for shutdown signal");
        }
        info!("shutdown signal received");
        signal_token.cancel();
    });

    orchestrator.run(shutdown, outcomes).await?;
    broker.close();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new()
        .load()
        .context("loading configuration")?;
    telemetry::init_tracing(&config).context("initializing tracing")?;
    if let Ok(redacted_json) = config.redacted_json() {
        info!(profile = %config.profile, config = %redacted_json, "configuration loaded");
    }

    match cli.command {
        Commands::Migrate => {
            let db = db::init_pool(&config)
                .await
                .context("initializing database connection pool")?;
            Migrator::up(&db, None)
                .await
                .context("running database migrations")?;
            println!("Migrations applied.");
        }
        Commands::Serve { dry_run } => serve(config, dry_run).await?,
        command => {
            let (orchestrator, broker, _outcomes) = build(&config).await?;
            broker.close();
            run_command(&orchestrator, command).await?;
        }
    }

    Ok(())
}

async fn run_command(orchestrator: &JobOrchestrator, command: Commands) -> Result<()> {
    match command {
        Commands::Submit {
            job_type,
            params,
            priority,
            sla_budget,
            depends_on,
            delay,
            max_retries,
        } => {
            let params: JsonValue =
                serde_json::from_str(&params).context("parsing --params as JSON")?;
            let request = SubmitJob {
                job_type,
                params,
                priority,
                sla_budget_seconds: sla_budget,
                depends_on,
                run_at: delay.map(|seconds| chrono::Utc::now() + Duration::seconds(seconds)),
                max_retries,
            };
            print_json(&orchestrator.submit_job(request).await?)?;
        }
        Commands::Show { id } => print_json(&orchestrator.get_job(id).await?)?,
        Commands::List {
            status,
            job_type,
            queue,
            limit,
            cursor,
        } => {
            let filter = JobFilter {
                status: status
                    .map(|raw| raw.parse::<JobStatus>())
                    .transpose()
                    .map_err(anyhow::Error::msg)?,
                job_type: job_type
                    .map(|raw| raw.parse::<JobKind>())
                    .transpose()
                    .map_err(anyhow::Error::msg)?,
                queue,
                paused: None,
            };
            let page = orchestrator
                .list_jobs(&filter, &PageRequest { cursor, limit })
                .await?;
            print_json(&page)?;
        }
        Commands::Pause { id } => print_json(&json!({ "paused": orchestrator.pause_job(id).await? }))?,
        Commands::Resume { id } => {
            print_json(&json!({ "resumed": orchestrator.resume_job(id).await? }))?
        }
        Commands::Cancel { id } => {
            print_json(&json!({ "cancelled": orchestrator.cancel_job(id).await? }))?
        }
        Commands::Backlog => {
            print_json(&json!({
                "backlog": orchestrator.backlog().await,
                "scope": "job store only; worker health and scaling are reported by serve",
            }))?;
        }
        Commands::Sla { job, window_hours } => match job {
            Some(id) => print_json(&orchestrator.sla_status(id).await?)?,
            None => {
                let window = window_hours.map(Duration::hours);
                print_json(&orchestrator.sla_report(window).await?)?;
            }
        },
        Commands::Migrate | Commands::Serve { .. } => {}
    }
    Ok(())
}
