//! CLI command definitions for taskforge.
//!
//! The `run` command drives a bounded simulated session: it seeds the pool
//! from the configured distribution, starts the discovery feeder, streams
//! engine events to the log and prints a final status snapshot as JSON.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use crate::engine::{EngineConfig, EngineEvent, Orchestrator};
use crate::feeder::{DiscoveryFeeder, SimulatedDiscoverySource};
use crate::metrics;
use crate::scheduler::BalancingStrategy;
use crate::workers::SimulatedExecutor;

/// Parallel task-orchestration engine for heterogeneous ingestion work.
#[derive(Parser)]
#[command(name = "taskforge")]
#[command(about = "Distribute ingestion work across a pool of typed workers")]
#[command(version)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run a bounded simulated orchestration session.
    Run(RunArgs),

    /// Load configuration from the environment, validate it and print it.
    Validate,
}

/// Arguments for `taskforge run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// How long the session runs, in seconds.
    #[arg(short, long, default_value = "30")]
    pub duration: u64,

    /// Balancing strategy (round-robin, least-load, content-type, intelligent).
    #[arg(short, long)]
    pub strategy: Option<BalancingStrategy>,

    /// Fraction of simulated executions that fail.
    #[arg(long, default_value = "0.1")]
    pub failure_rate: f64,

    /// Compression factor applied to simulated processing times; 0.02 turns
    /// a 20s task into 400ms of wall clock.
    #[arg(long, default_value = "0.02")]
    pub time_scale: f64,

    /// Discovery feeder poll interval in milliseconds.
    #[arg(long, default_value = "2000")]
    pub feed_interval_ms: u64,

    /// Tasks produced per feeder poll.
    #[arg(long, default_value = "4")]
    pub feed_batch: usize,

    /// Print the Prometheus metrics dump at the end of the session.
    #[arg(long)]
    pub dump_metrics: bool,
}

/// Parses command-line arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Executes the parsed CLI command.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_session(args).await,
        Commands::Validate => validate_config(),
    }
}

fn validate_config() -> anyhow::Result<()> {
    let config = EngineConfig::from_env()?;
    info!(
        max_workers = config.max_workers,
        strategy = %config.strategy,
        adaptive_scaling = config.adaptive_scaling,
        "Configuration is valid"
    );
    println!(
        "configuration valid: {} baseline workers, ceiling {}, floor {}, strategy {}",
        config.max_workers,
        config.worker_ceiling(),
        config.worker_floor(),
        config.strategy
    );
    Ok(())
}

async fn run_session(args: RunArgs) -> anyhow::Result<()> {
    metrics::init_metrics()?;

    let mut config = EngineConfig::from_env()?;
    if let Some(strategy) = args.strategy {
        config = config.with_strategy(strategy);
    }
    // Scale the slow production ticks down so a short demo session sees
    // monitor and scaler activity.
    config = config
        .with_monitor_tick(Duration::from_secs(5))
        .with_scaler_tick(Duration::from_secs(10));

    let executor = Arc::new(SimulatedExecutor::new(args.failure_rate, args.time_scale));
    let mut engine = Orchestrator::new(config, executor)?;

    let mut events = engine.subscribe();
    let event_logger = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_event(&event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed = missed, "Event logger lagged behind the stream");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    engine.start().await?;

    let feeder = DiscoveryFeeder::new(
        Arc::new(SimulatedDiscoverySource::new(args.feed_batch)),
        Duration::from_millis(args.feed_interval_ms),
    );
    let feeder_handle = feeder.spawn(engine.handle());

    info!(duration_secs = args.duration, "Session running");
    tokio::time::sleep(Duration::from_secs(args.duration)).await;

    if let Err(err) = engine.shutdown().await {
        warn!(error = %err, "Shutdown did not drain cleanly");
    }
    feeder_handle.await?;
    event_logger.abort();

    let status = engine.status();
    println!("{}", serde_json::to_string_pretty(&status)?);

    if args.dump_metrics {
        println!("{}", metrics::export_metrics());
    }

    Ok(())
}

fn log_event(event: &EngineEvent) {
    match event {
        EngineEvent::TaskCompleted {
            task_id,
            quality_score,
            duration_ms,
            ..
        } => info!(task_id = %task_id, quality = quality_score, duration_ms = duration_ms, "completed"),
        EngineEvent::TaskFailedPermanently {
            task_id,
            retry_count,
            error,
        } => warn!(task_id = %task_id, retry_count = retry_count, error = %error, "failed permanently"),
        EngineEvent::PerformanceWarning { alert } => warn!(alert = %alert, "performance warning"),
        EngineEvent::ScaledUp { added, worker_count } => {
            info!(added = added, worker_count = worker_count, "scaled up")
        }
        EngineEvent::ScaledDown {
            removed,
            worker_count,
        } => info!(removed = removed, worker_count = worker_count, "scaled down"),
        other => tracing::debug!(event = ?other, "engine event"),
    }
}
