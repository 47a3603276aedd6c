//! Lead-Harvest main entry point
//!
//! This is the command-line interface for the Lead-Harvest pipeline.

use anyhow::{Context, Result};
use clap::Parser;
use lead_harvest::config::{load_config_with_hash, Config};
use lead_harvest::crawler::{Coordinator, PortalRegistry, QueryBank, QueryMode, SearchChain};
use lead_harvest::http::{HttpManager, HttpSettings};
use lead_harvest::lifecycle::{Emitter, RunController, RunParams};
use lead_harvest::output::{load_statistics, print_statistics};
use lead_harvest::resilience::{BreakerPolicy, CircuitBreaker};
use lead_harvest::scoring::{AdjustmentStore, LearningWorker, TelephoneBookDirectory, DEFAULT_DIRECTORY_URL};
use lead_harvest::storage::{SqliteStorage, Storage};
use lead_harvest::RunStatus;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use url::Url;

/// Lead-Harvest: a resilient multi-portal lead pipeline
///
/// Crawls classified-ad portals and search backends for job-seeker
/// contact data, classifies and scores it, and stores de-duplicated
/// leads in a local SQLite database.
#[derive(Parser, Debug)]
#[command(name = "lead-harvest")]
#[command(version)]
#[command(about = "A resilient multi-portal lead pipeline", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Clear seen URLs, done queries and the directory cache before crawling
    #[arg(long)]
    fresh: bool,

    /// Show active portals and generated queries without any network access
    #[arg(long, conflicts_with_all = ["stats", "reset"])]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with_all = ["dry_run", "reset"])]
    stats: bool,

    /// Clear dedup indices and caches, then exit (requires --confirm)
    #[arg(long, conflicts_with_all = ["dry_run", "stats"])]
    reset: bool,

    /// Confirms a destructive --reset
    #[arg(long, requires = "reset")]
    confirm: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet, cli.json_logs);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config);
        Ok(())
    } else if cli.stats {
        handle_stats(&config)
    } else if cli.reset {
        handle_reset(&config, cli.confirm).await
    } else {
        handle_crawl(config, config_hash, cli.fresh).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool, json: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("lead_harvest=info,warn"),
            1 => EnvFilter::new("lead_harvest=debug,info"),
            2 => EnvFilter::new("lead_harvest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Handles the --dry-run mode: shows portals and queries without fetching
fn handle_dry_run(config: &Config) {
    println!("=== Lead-Harvest Dry Run ===\n");

    println!("Crawler Configuration:");
    println!("  Mode: {}", config.crawler.mode);
    println!("  Industries: {}", config.crawler.industries.join(", "));
    println!("  Queries per industry: {}", config.crawler.queries_per_industry);
    println!("  Max concurrent requests: {}", config.crawler.max_concurrent_requests);
    println!("  Max requests per host: {}", config.crawler.max_requests_per_host);
    println!("  Request timeout: {}s", config.crawler.request_timeout_secs);
    println!("  Insecure TLS fallback: {}", config.http.allow_insecure_tls);

    println!("\nStorage:");
    println!("  Database: {}", config.storage.database_path);

    let registry = PortalRegistry::from_overrides(&config.portals);
    println!("\nPortals ({} active):", registry.active().count());
    for portal in registry.all() {
        let marker = if portal.enabled { "+" } else { "-" };
        println!("  {} {} (max {} pages)", marker, portal.name, portal.max_pages);
        for template in &portal.listing_urls {
            println!("    * {}", template);
        }
    }

    if config.crawler.search_enabled {
        println!("\nSearch backends: {}", config.search.backends.join(" -> "));
        let mode = config.crawler.mode.parse::<QueryMode>().unwrap_or_default();
        let queries = QueryBank::new(mode).generate_all(&config.crawler.industries);
        println!("Generated queries ({}):", queries.len());
        for query in &queries {
            println!("  [{}] {}", query.industry, query.text);
        }
    } else {
        println!("\nSearch path disabled");
    }

    println!("\n✓ Configuration is valid");
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> Result<()> {
    println!("Database: {}\n", config.storage.database_path);

    let storage = SqliteStorage::open(&config.storage).context("Failed to open database")?;
    let stats = load_statistics(&storage, 10)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles --reset: clears dedup indices and the directory cache
async fn handle_reset(config: &Config, confirm: bool) -> Result<()> {
    let storage = SqliteStorage::open(&config.storage)
        .context("Failed to open database")?
        .into_shared();
    let controller = RunController::new(storage, Arc::new(CircuitBreaker::default()), Emitter::default());

    let summary = controller.reset(confirm).await?;
    println!(
        "✓ Reset: {} seen URLs, {} queries, {} directory entries removed",
        summary.urls, summary.queries, summary.directory_entries
    );
    Ok(())
}

/// Handles the main crawl operation
///
/// The first Ctrl-C requests a cooperative stop; a second one kills the run.
async fn handle_crawl(config: Config, config_hash: String, fresh: bool) -> Result<()> {
    let config = Arc::new(config);
    let storage = SqliteStorage::open(&config.storage)
        .context("Failed to open database")?
        .into_shared();

    let breaker = Arc::new(CircuitBreaker::new(BreakerPolicy::from_config(&config.circuit_breaker)));
    let http = Arc::new(HttpManager::new(HttpSettings::from_config(&config), Arc::clone(&breaker))?);

    let snapshot = storage.lock().load_adjustments()?;
    let adjustments = Arc::new(AdjustmentStore::new(snapshot));
    let learner = LearningWorker::spawn(
        config.storage.clone(),
        Duration::from_secs(config.scoring.learning_interval_secs),
        Arc::clone(&adjustments),
    )?;

    let controller = RunController::new(Arc::clone(&storage), breaker, Emitter::default());
    if fresh {
        tracing::info!("Starting fresh crawl (clearing dedup state)");
        controller.reset(true).await?;
    }

    let mut coordinator = Coordinator::new(Arc::clone(&config), Arc::clone(&http), storage, adjustments);
    if config.scoring.directory_lookup {
        let base = config.scoring.directory_url.as_deref().unwrap_or(DEFAULT_DIRECTORY_URL);
        let base = Url::parse(base).with_context(|| format!("Invalid directory URL {}", base))?;
        coordinator = coordinator.with_directory(Arc::new(TelephoneBookDirectory::new(Arc::clone(&http), base)));
    }
    log_plan(&config, coordinator.portals(), coordinator.search());

    let run_id = controller
        .start(RunParams {
            config_hash,
            coordinator,
        })
        .await?;
    tracing::info!(run_id, "Run started");

    let status = tokio::select! {
        status = controller.wait() => status,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupt received, stopping (press Ctrl-C again to kill)");
            if let Err(e) = controller.stop().await {
                tracing::debug!(error = %e, "Stop ignored");
            }
            tokio::select! {
                status = controller.wait() => status,
                _ = tokio::signal::ctrl_c() => {
                    controller.kill().await?;
                    controller.wait().await
                }
            }
        }
    };

    learner.shutdown();

    let report = controller.status();
    tracing::info!(
        run_id,
        status = %status,
        links_checked = report.counters.links_checked,
        leads_accepted = report.counters.leads_accepted,
        blocked = report.counters.blocked,
        "Run finished"
    );

    match (status, report.failure) {
        (RunStatus::Crashed, Some(failure)) => {
            anyhow::bail!("Run crashed ({}): {}", failure.classification, failure.message)
        }
        _ => Ok(()),
    }
}

fn log_plan(config: &Config, portals: &PortalRegistry, search: &SearchChain) {
    tracing::info!(
        portals = portals.active().count(),
        search_backends = %search.names().join(","),
        industries = %config.crawler.industries.join(","),
        mode = %config.crawler.mode,
        "Crawl plan"
    );
}
