//! Fetchmill main entry point
//!
//! This is the command-line interface for the Fetchmill job engine.

use clap::Parser;
use fetchmill::config::{load_config, Config, StoreBackend};
use fetchmill::dispatcher::{Dispatcher, JobOutcome, SubmitOptions};
use fetchmill::queue::{MemoryQueue, Queue};
use fetchmill::spider::SpiderRegistry;
use fetchmill::store::{FileStore, JobStore, MemoryStore};
use fetchmill::worker::{HttpFetcher, WorkerPool};
use fetchmill::JobStatus;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Fetchmill: a single-node fetch-and-parse job engine
///
/// Fetchmill runs single-URL crawl jobs through registered spiders. A job
/// is submitted, fetched and parsed by a worker pool with bounded retries,
/// and driven to a terminal state that can be queried for its result.
#[derive(Parser, Debug)]
#[command(name = "fetchmill")]
#[command(version)]
#[command(about = "A single-node fetch-and-parse job engine", long_about = None)]
struct Cli {
    /// Path to TOML configuration file (defaults apply when omitted)
    #[arg(value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Spider to run
    #[arg(short, long)]
    spider: Option<String>,

    /// Target URL (falls back to the spider's start URL)
    #[arg(short, long)]
    url: Option<String>,

    /// Attempt ceiling override for this job
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Fetch timeout override for this job (seconds)
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// List registered spiders and exit
    #[arg(long, conflicts_with_all = ["spider", "stats"])]
    list_spiders: bool,

    /// Show job counts from the store and exit
    #[arg(long, conflicts_with_all = ["spider", "list_spiders"])]
    stats: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    let config = match &cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path.display());
            load_config(path)?
        }
        None => Config::default(),
    };

    if cli.list_spiders {
        handle_list_spiders();
        return Ok(());
    }

    // The store backend is chosen once at startup; everything downstream is
    // generic over it.
    match config.store.backend {
        StoreBackend::Memory => run(Arc::new(MemoryStore::new()), config, cli).await,
        StoreBackend::File => {
            let store = FileStore::open(&config.store.jobs_dir)?;
            run(Arc::new(store), config, cli).await
        }
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("fetchmill=info,warn"),
            1 => EnvFilter::new("fetchmill=debug,info"),
            2 => EnvFilter::new("fetchmill=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --list-spiders mode
fn handle_list_spiders() {
    let registry = SpiderRegistry::with_builtins();
    println!("Registered spiders:");
    for name in registry.names() {
        if let Some(spider) = registry.resolve(&name) {
            match spider.fetch_spec().start_url {
                Some(url) => println!("  {} (start URL: {})", name, url),
                None => println!("  {} (URL required at submission)", name),
            }
        }
    }
}

/// Handles the --stats mode: shows job counts from the store
fn handle_stats<S: JobStore>(store: &S) -> anyhow::Result<()> {
    let stats = store.stats()?;
    println!("Jobs in store: {}", stats.total);
    for status in JobStatus::all() {
        let count = stats.counts.get(&status).copied().unwrap_or(0);
        println!("  {:<10} {}", status.as_str(), count);
    }
    Ok(())
}

/// Runs the engine with the chosen store backend
async fn run<S: JobStore>(store: Arc<S>, config: Config, cli: Cli) -> anyhow::Result<()> {
    if cli.stats {
        return handle_stats(store.as_ref());
    }

    let spider = cli
        .spider
        .ok_or_else(|| anyhow::anyhow!("--spider is required (or use --list-spiders)"))?;

    let queue = Arc::new(MemoryQueue::new());
    let registry = Arc::new(SpiderRegistry::with_builtins());
    let fetcher = Arc::new(HttpFetcher::new(&config.fetch)?);

    // Persisted pending jobs from a previous run go back into the queue
    // before the workers start.
    for job in store.list(Some(JobStatus::Pending))? {
        tracing::info!("Re-enqueueing persisted pending job {}", job.id);
        queue.enqueue(job.id).await?;
    }

    let dispatcher = Dispatcher::new(
        Arc::clone(&store),
        Arc::clone(&queue),
        Arc::clone(&registry),
        &config,
    );

    let mut pool = WorkerPool::new(store, queue, registry, fetcher, config);
    pool.start();

    let options = SubmitOptions {
        url: cli.url,
        max_attempts: cli.max_attempts,
        timeout: cli.timeout_secs.map(Duration::from_secs),
    };
    let id = dispatcher.submit(&spider, options).await?;
    println!("Submitted job {}", id);

    // Poll until the job reaches a terminal state
    loop {
        let report = dispatcher.status(id)?;
        if report.status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    let exit = match dispatcher.result(id)? {
        JobOutcome::Ready(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        JobOutcome::Failed(error) => Err(anyhow::anyhow!("job failed: {}", error)),
        JobOutcome::Cancelled => Err(anyhow::anyhow!("job was cancelled")),
        JobOutcome::NotReady => unreachable!("polled until terminal"),
    };

    pool.shutdown().await;
    exit
}
