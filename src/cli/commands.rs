//! CLI command definitions for the order pipeline.
//!
//! `serve` is the composition root: it opens both stores, builds the worker
//! pools and runs them until Ctrl-C. The remaining commands are one-shot
//! clients of the same stores.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::metrics::{export_metrics, init_metrics, MetricsCollector};
use crate::scheduler::{QueueClient, INGESTION_QUEUE, PROCESSING_QUEUE};
use crate::service::{build_worker_manager, OrderService};
use crate::storage::{seed_sample_data, NewOrder, OrderStore, SqliteOrderStore};

/// Default interval between queue depth samples while serving.
const DEFAULT_SAMPLE_INTERVAL_SECS: u64 = 5;

/// Queue-driven order processing pipeline.
#[derive(Parser)]
#[command(name = "order-pipeline")]
#[command(about = "Queue-driven order processing pipeline backed by Redis and SQLite")]
#[command(version)]
#[command(
    long_about = "order-pipeline accepts orders, admits them through a Redis ingestion queue and completes them in batches.\n\nConfiguration is read from environment variables (REDIS_URL, DATABASE_URL, BATCH_SIZE, ...) and may be overridden by flags.\n\nExample usage:\n  order-pipeline seed\n  order-pipeline serve --processing-workers 4\n  order-pipeline submit --user U1 --item I1 --item I2 --amount 1049.98"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// Redis URL of the queue store (overrides REDIS_URL).
    #[arg(long, global = true)]
    pub redis_url: Option<String>,

    /// SQLite URL of the order store (overrides DATABASE_URL).
    #[arg(long, global = true)]
    pub database_url: Option<String>,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the ingestion and processing pools until interrupted.
    Serve(ServeArgs),

    /// Create an order and queue it for processing.
    Submit(SubmitArgs),

    /// Show a single order.
    #[command(alias = "get")]
    Order(OrderArgs),

    /// Show the processing queue and processed counter.
    Status,

    /// Show aggregate order metrics.
    Metrics(MetricsArgs),

    /// Insert the sample users and items.
    Seed,
}

/// Arguments for `order-pipeline serve`.
#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Maximum number of orders per batch.
    #[arg(short = 'b', long)]
    pub batch_size: Option<usize>,

    /// Number of batch processing units.
    #[arg(short = 'p', long)]
    pub processing_workers: Option<usize>,

    /// Number of ingestion units.
    #[arg(short = 'i', long)]
    pub ingestion_workers: Option<usize>,

    /// Simulated per-batch work in milliseconds.
    #[arg(long)]
    pub processing_delay_ms: Option<u64>,

    /// Delete both queues and the processed counter before starting.
    #[arg(long)]
    pub reset: bool,

    /// Seconds between queue depth samples.
    #[arg(long, default_value_t = DEFAULT_SAMPLE_INTERVAL_SECS)]
    pub sample_interval_secs: u64,
}

/// Arguments for `order-pipeline submit`.
#[derive(Parser, Debug)]
pub struct SubmitArgs {
    /// Id of the ordering user.
    #[arg(short, long)]
    pub user: String,

    /// Item id; repeat for several items.
    #[arg(short, long = "item", required = true)]
    pub items: Vec<String>,

    /// Claimed order total.
    #[arg(short, long)]
    pub amount: f64,
}

/// Arguments for `order-pipeline order`.
#[derive(Parser, Debug)]
pub struct OrderArgs {
    /// Order id.
    pub order_id: String,
}

/// Arguments for `order-pipeline metrics`.
#[derive(Parser, Debug)]
pub struct MetricsArgs {
    /// Print Prometheus exposition text instead of JSON.
    #[arg(long)]
    pub prometheus: bool,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Serve(args) => run_serve_command(config, args).await,
        Commands::Submit(args) => run_submit_command(config, args).await,
        Commands::Order(args) => run_order_command(config, args).await,
        Commands::Status => run_status_command(config).await,
        Commands::Metrics(args) => run_metrics_command(config, args).await,
        Commands::Seed => run_seed_command(config).await,
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<PipelineConfig> {
    let mut config = PipelineConfig::from_env()?;
    if let Some(url) = &cli.redis_url {
        config = config.with_redis_url(url.clone());
    }
    if let Some(url) = &cli.database_url {
        config = config.with_database_url(url.clone());
    }
    Ok(config)
}

async fn open_store(config: &PipelineConfig) -> anyhow::Result<Arc<SqliteOrderStore>> {
    Ok(Arc::new(SqliteOrderStore::open(&config.database_url).await?))
}

async fn connect_queue(config: &PipelineConfig) -> anyhow::Result<Arc<QueueClient>> {
    let queue = QueueClient::connect(&config.redis_url)
        .await?
        .with_retry_policy(config.retry_policy());
    Ok(Arc::new(queue))
}

async fn open_service(config: &PipelineConfig) -> anyhow::Result<OrderService> {
    let store: Arc<dyn OrderStore> = open_store(config).await?;
    let queue = connect_queue(config).await?;
    Ok(OrderService::new(store, queue))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ============================================================================
// Serve
// ============================================================================

fn apply_serve_overrides(mut config: PipelineConfig, args: &ServeArgs) -> PipelineConfig {
    if let Some(size) = args.batch_size {
        config = config.with_batch_size(size);
    }
    if let Some(workers) = args.processing_workers {
        config = config.with_processing_workers(workers);
    }
    if let Some(workers) = args.ingestion_workers {
        config = config.with_ingestion_workers(workers);
    }
    if let Some(ms) = args.processing_delay_ms {
        config = config.with_processing_delay(Duration::from_millis(ms));
    }
    if args.reset {
        config = config.with_reset_on_start(true);
    }
    config
}

async fn run_serve_command(config: PipelineConfig, args: ServeArgs) -> anyhow::Result<()> {
    let config = apply_serve_overrides(config, &args);
    config.validate()?;

    init_metrics()?;

    let store: Arc<dyn OrderStore> = open_store(&config).await?;
    let queue = connect_queue(&config).await?;

    if config.reset_on_start {
        queue.reset().await?;
        warn!("Queues and processed counter reset");
    }

    let mut manager = build_worker_manager(&config, Arc::clone(&queue), store);
    manager.start_all()?;

    info!(
        ingestion_workers = config.ingestion_workers,
        processing_workers = config.processing_workers,
        batch_size = config.batch_size,
        "Order pipeline running; press Ctrl-C to stop"
    );

    let sample_interval = Duration::from_secs(args.sample_interval_secs.max(1));
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "Failed to listen for Ctrl-C, shutting down");
            }
        }
        _ = sample_queue_depth(Arc::clone(&queue), sample_interval) => {}
    }

    info!("Shutdown requested");
    for (pool, report) in manager.stop_all().await {
        info!(
            pool = %pool,
            graceful = report.graceful,
            forced = report.forced,
            "Pool stopped"
        );
    }

    Ok(())
}

/// Samples both queue lengths into the depth gauge forever.
async fn sample_queue_depth(queue: Arc<QueueClient>, every: Duration) {
    let metrics = MetricsCollector::new();
    let mut ticker = tokio::time::interval(every);

    loop {
        ticker.tick().await;
        for name in [INGESTION_QUEUE, PROCESSING_QUEUE] {
            match queue.queue_length(name).await {
                Ok(depth) => metrics.update_queue_depth(name, depth),
                Err(e) => warn!(queue = name, error = %e, "Failed to sample queue depth"),
            }
        }
    }
}

// ============================================================================
// One-shot commands
// ============================================================================

async fn run_submit_command(config: PipelineConfig, args: SubmitArgs) -> anyhow::Result<()> {
    let service = open_service(&config).await?;
    let order = service
        .submit(NewOrder::new(args.user, args.items, args.amount))
        .await?;
    print_json(&order)
}

async fn run_order_command(config: PipelineConfig, args: OrderArgs) -> anyhow::Result<()> {
    // Lookups only need the order store.
    let store = open_store(&config).await?;
    let order = store.get_order(&args.order_id).await?;
    print_json(&order)
}

async fn run_status_command(config: PipelineConfig) -> anyhow::Result<()> {
    let queue = connect_queue(&config).await?;
    print_json(&queue.status().await?)
}

async fn run_metrics_command(config: PipelineConfig, args: MetricsArgs) -> anyhow::Result<()> {
    if !args.prometheus {
        let store = open_store(&config).await?;
        return print_json(&store.order_metrics().await?);
    }

    // A one-shot process has no counters of its own; report current depths.
    init_metrics()?;
    let queue = connect_queue(&config).await?;
    let metrics = MetricsCollector::new();
    for name in [INGESTION_QUEUE, PROCESSING_QUEUE] {
        metrics.update_queue_depth(name, queue.queue_length(name).await?);
    }
    print!("{}", export_metrics());
    Ok(())
}

async fn run_seed_command(config: PipelineConfig) -> anyhow::Result<()> {
    let store = open_store(&config).await?;
    let report = seed_sample_data(&store).await?;
    print_json(&report)
}
