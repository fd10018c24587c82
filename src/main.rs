//! Shelf-Crawler main entry point
//!
//! This is the command-line interface for the Shelf-Crawler catalog crawler.

use anyhow::{bail, Context};
use clap::Parser;
use shelf_crawler::catalog::SelectorCatalog;
use shelf_crawler::checkpoint::{CheckpointManager, JobType};
use shelf_crawler::config::{load_config_with_hash, Config};
use shelf_crawler::output::{print_report, write_markdown_summary, JobReport};
use shelf_crawler::page::HttpBrowser;
use shelf_crawler::storage::{open_store, CheckpointStore, MemoryCheckpointStore};
use shelf_crawler::{CrawlError, CrawlJob, CrawlOrchestrator};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Shelf-Crawler: a resumable e-commerce catalog crawler
///
/// Shelf-Crawler discovers a storefront's categories, pages through their
/// listings and extracts product records, pacing itself per domain and
/// checkpointing progress so an interrupted job picks up where it stopped.
#[derive(Parser, Debug)]
#[command(name = "shelf-crawler")]
#[command(version)]
#[command(about = "A resumable e-commerce catalog crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Storefront root URL to crawl
    #[arg(long, required_unless_present_any = ["status", "purge_expired"])]
    url: Option<String>,

    /// Kind of job: product-catalog, product-detail or category-discovery
    #[arg(long, default_value = "product-catalog")]
    job_type: JobType,

    /// Continue (or create) the checkpoint with this id
    #[arg(long)]
    job_id: Option<Uuid>,

    /// Start a new checkpoint instead of resuming the latest active or failed one
    #[arg(long, conflicts_with = "job_id")]
    fresh: bool,

    /// Crawl without persisting checkpoints or writing the summary
    #[arg(long)]
    dry_run: bool,

    /// Show the report of a stored checkpoint and exit
    #[arg(long, value_name = "ID", conflicts_with_all = ["url", "purge_expired"])]
    status: Option<Uuid>,

    /// Delete expired checkpoints and exit
    #[arg(long, conflicts_with = "url")]
    purge_expired: bool,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if let Some(id) = cli.status {
        handle_status(&config, id).await
    } else if cli.purge_expired {
        handle_purge(&config).await
    } else {
        handle_crawl(&cli, config).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("shelf_crawler=info,warn"),
            1 => EnvFilter::new("shelf_crawler=debug,info"),
            2 => EnvFilter::new("shelf_crawler=trace,debug"),
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

fn open_manager(config: &Config) -> anyhow::Result<Arc<CheckpointManager>> {
    let store = open_store(Path::new(&config.output.database_path))
        .with_context(|| format!("failed to open {}", config.output.database_path))?;
    Ok(Arc::new(CheckpointManager::new(
        Arc::new(store),
        config.crawler.checkpoint_ttl_days,
    )))
}

/// Handles `--status`: prints the report of a stored checkpoint
async fn handle_status(config: &Config, id: Uuid) -> anyhow::Result<()> {
    let checkpoints = open_manager(config)?;
    let Some(record) = checkpoints.get(id).await? else {
        bail!("no checkpoint {} in {}", id, config.output.database_path);
    };

    print_report(&JobReport::from_record(&record, Duration::ZERO));
    Ok(())
}

/// Handles `--purge-expired`: removes checkpoints past their expiry
async fn handle_purge(config: &Config) -> anyhow::Result<()> {
    let checkpoints = open_manager(config)?;
    let removed = checkpoints.purge_expired().await?;
    println!("Purged {} expired checkpoint(s)", removed);
    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(cli: &Cli, config: Config) -> anyhow::Result<()> {
    let Some(root_url) = cli.url.as_deref() else {
        bail!("--url is required to start a crawl");
    };

    let checkpoints = if cli.dry_run {
        tracing::info!("Dry run: checkpoints are kept in memory only");
        let store: Arc<dyn CheckpointStore> = Arc::new(MemoryCheckpointStore::new());
        Arc::new(CheckpointManager::new(store, config.crawler.checkpoint_ttl_days))
    } else {
        open_manager(&config)?
    };

    let browser = Arc::new(HttpBrowser::new(&config).context("failed to build HTTP client")?);
    let catalog = Arc::new(SelectorCatalog::new(
        config.catalog.clone(),
        Duration::from_millis(config.pagination.navigation_timeout_ms),
    ));
    let orchestrator =
        CrawlOrchestrator::new(&config, browser, catalog.clone(), catalog, checkpoints);

    let mut job = CrawlJob::new(root_url, &config.crawler);
    job.job_type = cli.job_type;
    job.job_id = cli.job_id;
    job.resume = !cli.fresh;

    if cli.fresh {
        tracing::info!("Starting a fresh job (ignoring active checkpoints)");
    } else {
        tracing::info!("Starting job (will resume an active or failed checkpoint if one exists)");
    }

    let cancel = job.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after in-flight pages");
            cancel.cancel();
        }
    });

    match orchestrator.run(job).await {
        Ok(report) => {
            print_report(&report);
            if !cli.dry_run {
                let path = Path::new(&config.output.summary_path);
                write_markdown_summary(&report, path)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                println!("✓ Summary written to: {}", path.display());
            }
            Ok(())
        }
        Err(CrawlError::Cancelled) => {
            println!("Job cancelled; run the same command again to resume.");
            Ok(())
        }
        Err(e) => Err(e).context("crawl job failed"),
    }
}
