//! Frontier scheduler entry point
//!
//! This is the command-line interface for running the fetch workers and
//! operating the frontier.

use anyhow::{bail, Context};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use frontier_scheduler::config::{load_config_with_hash, Config};
use frontier_scheduler::crawler::{build_politeness, run_scheduler, sync_sources, LogSink};
use frontier_scheduler::frontier::{NewEntry, DEFAULT_BASE_PRIORITY};
use frontier_scheduler::output::{build_report, print_report, write_markdown_report};
use frontier_scheduler::poll::{FeedPoller, PollResult, SourceRegistry};
use frontier_scheduler::state::{DisableReason, Origin};
use frontier_scheduler::storage::{open_storage, FrontierStore, SourceStore, SqliteStorage};
use frontier_scheduler::{normalize_url, CrawlError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Frontier scheduler: a durable URL frontier with polite fetch workers
///
/// Producers submit URLs, workers claim and fetch them while respecting
/// robots.txt and per-host delays, and failing sources are disabled and
/// probed again after a cooldown.
#[derive(Parser, Debug)]
#[command(name = "frontier-scheduler")]
#[command(version)]
#[command(about = "A durable URL frontier with polite fetch workers", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(short, long, value_name = "CONFIG", default_value = "frontier.toml")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run workers, the lease reaper and the feed poller until Ctrl-C
    Run,

    /// Submit URLs to the frontier
    Submit {
        #[arg(required = true)]
        urls: Vec<String>,

        /// Source the URLs belong to
        #[arg(long)]
        source: Option<String>,

        /// How the URLs were discovered
        #[arg(long, default_value = "manual", value_parser = parse_origin)]
        origin: Origin,

        /// Base priority before origin bonus and depth penalty
        #[arg(long, default_value_t = DEFAULT_BASE_PRIORITY)]
        priority: u8,

        #[arg(long, default_value_t = 0)]
        depth: u32,
    },

    /// Discover missing feeds, then poll sources once
    Poll {
        /// Poll only this source, even if it is not due
        #[arg(long)]
        source: Option<String>,
    },

    /// Show frontier and source status
    Stats,

    /// Re-enable a source
    Enable { source: String },

    /// Disable a source until it is enabled again
    Disable { source: String },

    /// Override a host's minimum delay between fetches
    SetDelay {
        host: String,

        /// Delay in milliseconds
        delay_ms: u64,
    },

    /// Requeue entries whose claim lease has expired
    Reap,

    /// Validate the configuration and show what would run
    Validate,
}

fn parse_origin(value: &str) -> Result<Origin, String> {
    Origin::from_db_string(value)
        .ok_or_else(|| format!("unknown origin '{}' (feed, sitemap, spider, manual)", value))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", hash);

    match cli.command {
        Command::Run => handle_run(&config).await,
        Command::Submit {
            urls,
            source,
            origin,
            priority,
            depth,
        } => handle_submit(&config, &urls, source.as_deref(), origin, priority, depth),
        Command::Poll { source } => handle_poll(&config, source.as_deref()).await,
        Command::Stats => handle_stats(&config),
        Command::Enable { source } => handle_enable(&config, &source, true),
        Command::Disable { source } => handle_enable(&config, &source, false),
        Command::SetDelay { host, delay_ms } => handle_set_delay(&config, &host, delay_ms),
        Command::Reap => handle_reap(&config),
        Command::Validate => {
            handle_validate(&config);
            Ok(())
        }
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
///
/// `RUST_LOG` takes precedence when set.
fn setup_logging(verbose: u8, quiet: bool) {
    let default = if quiet {
        "error"
    } else {
        match verbose {
            0 => "frontier_scheduler=info,warn",
            1 => "frontier_scheduler=debug,info",
            2 => "frontier_scheduler=trace,debug",
            _ => "trace",
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn open(config: &Config) -> Result<SqliteStorage, CrawlError> {
    open_storage(Path::new(&config.output.database_path), config.store_settings())
}

async fn handle_run(config: &Config) -> anyhow::Result<()> {
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown requested, finishing in-flight fetches"),
            Err(e) => tracing::error!("Failed to listen for Ctrl-C: {}", e),
        }
        let _ = shutdown_tx.send(true);
    });

    let summary = run_scheduler(config, Arc::new(LogSink), shutdown_rx).await?;
    println!(
        "Completed {} entries, requeued {} expired leases",
        summary.completed, summary.reaped
    );
    Ok(())
}

fn handle_submit(
    config: &Config,
    urls: &[String],
    source: Option<&str>,
    origin: Origin,
    priority: u8,
    depth: u32,
) -> anyhow::Result<()> {
    let mut storage = open(config)?;
    let options = config.normalize_options();
    let now = Utc::now();

    if let Some(id) = source {
        sync_sources(&mut storage, config, now)?;
        if storage.get_source(id)?.is_none() {
            bail!("unknown source '{}'", id);
        }
    }

    let mut inserted = 0;
    for raw in urls {
        let url = match normalize_url(raw, None, &options) {
            Ok(url) => url,
            Err(e) => {
                eprintln!("Skipping {}: {}", raw, e);
                continue;
            }
        };
        let entry = NewEntry::new(&url, source, origin, None, depth, priority)?;
        let result = storage.submit(&entry, now)?;
        if result.inserted {
            inserted += 1;
        }
        println!(
            "{} {} (id {}, priority {})",
            if result.inserted { "added " } else { "merged" },
            url,
            result.id,
            entry.priority
        );
    }

    println!("{} new of {} submitted", inserted, urls.len());
    Ok(())
}

async fn handle_poll(config: &Config, source: Option<&str>) -> anyhow::Result<()> {
    let mut storage = open(config)?;
    let now = Utc::now();
    sync_sources(&mut storage, config, now)?;

    let client = frontier_scheduler::crawler::build_http_client(&config.user_agent, &config.worker)?;
    let politeness = Arc::new(build_politeness(config, client.clone()));
    let fetcher = frontier_scheduler::crawler::HttpFetcher::new(client, config.worker.max_body_bytes);

    let mut poller = FeedPoller::new(
        storage,
        Arc::new(fetcher),
        Arc::new(frontier_scheduler::crawler::LinkExtractor),
        politeness,
        config.normalize_options(),
        config.adaptive_cap(),
    )
    .with_discovery_retry(config.discovery_retry());

    if source.is_none() {
        for (id, feed_url) in poller.discover_feeds(now).await? {
            println!("{}: discovered {}", id, feed_url);
        }
    }

    let results = match source {
        Some(id) => {
            let Some(record) = poller.storage().get_source(id)? else {
                bail!("unknown source '{}'", id);
            };
            vec![(record.id.clone(), poller.poll_source(&record, now).await?)]
        }
        None => poller.poll_due(now).await?,
    };

    if results.is_empty() {
        println!("No sources due");
    }
    for (id, result) in results {
        match result {
            PollResult::Fetched { items, submitted } => {
                println!("{}: {} items, {} new", id, items, submitted)
            }
            PollResult::NotModified => println!("{}: not modified", id),
            PollResult::Failed { error, decision } => {
                println!("{}: {} ({:?})", id, error, decision)
            }
            PollResult::Undiscovered => println!("{}: no feed URL yet", id),
        }
    }
    Ok(())
}

fn handle_stats(config: &Config) -> anyhow::Result<()> {
    let mut storage = open(config)?;
    sync_sources(&mut storage, config, Utc::now())?;

    let report = build_report(&mut storage, Utc::now())?;
    print_report(&report);

    if let Some(path) = &config.output.summary_path {
        write_markdown_report(&report, Path::new(path))
            .with_context(|| format!("failed to write {}", path))?;
        println!("Summary written to: {}", path);
    }
    Ok(())
}

fn handle_enable(config: &Config, source: &str, enable: bool) -> anyhow::Result<()> {
    let mut storage = open(config)?;
    sync_sources(&mut storage, config, Utc::now())?;
    if storage.get_source(source)?.is_none() {
        bail!("unknown source '{}'", source);
    }

    if enable {
        storage.enable_feed(source)?;
        println!("Enabled {}", source);
    } else {
        storage.disable_feed(source, DisableReason::Manual, Utc::now())?;
        println!("Disabled {} (until enabled)", source);
    }
    Ok(())
}

fn handle_set_delay(config: &Config, host: &str, delay_ms: u64) -> anyhow::Result<()> {
    let mut storage = open(config)?;
    let client = frontier_scheduler::crawler::build_http_client(&config.user_agent, &config.worker)?;
    let politeness = build_politeness(config, client);

    let delay = Duration::milliseconds(i64::try_from(delay_ms).context("delay too large")?);
    politeness.set_min_delay(&mut storage, &host.to_lowercase(), delay)?;
    println!("{}: minimum delay set to {}ms", host, delay_ms);
    Ok(())
}

fn handle_reap(config: &Config) -> anyhow::Result<()> {
    let mut storage = open(config)?;
    let reaped = storage.reap_expired_leases(
        Utc::now(),
        config.frontier.max_retries,
        &config.backoff_policy(),
    )?;
    println!("Requeued {} entries with expired leases", reaped);
    Ok(())
}

/// Shows the effective configuration without touching the database
fn handle_validate(config: &Config) {
    println!("=== Configuration ===\n");

    println!("Frontier:");
    println!("  Lease: {}s", config.frontier.lease_secs);
    println!("  Max retries: {}", config.frontier.max_retries);
    println!(
        "  Backoff: {}s doubling, capped at {}s",
        config.frontier.backoff_base_secs, config.frontier.backoff_cap_secs
    );

    println!("\nPoliteness:");
    println!("  Host floor: {}ms", config.politeness.floor_ms);
    println!("  robots.txt TTL: {}s", config.politeness.robots_ttl_secs);

    println!("\nWorkers:");
    println!("  Count: {}", config.worker.count);
    println!("  Timeout: {}s", config.worker.timeout_secs);
    println!("  Max redirects: {}", config.worker.max_redirects);

    println!(
        "\nUser Agent: {}",
        frontier_scheduler::crawler::user_agent_string(&config.user_agent)
    );
    println!("Database: {}", config.output.database_path);

    println!("\nSources ({}):", config.source.len());
    for source in &config.source {
        println!(
            "  - {} every {}s{} -> {}",
            source.id,
            source.poll_interval_secs,
            if source.adaptive { " (adaptive)" } else { "" },
            match (&source.feed_url, &source.base_url) {
                (Some(feed_url), _) => feed_url.clone(),
                (None, Some(base_url)) => format!("feed discovered from {}", base_url),
                (None, None) => String::new(),
            }
        );
    }

    println!("\n✓ Configuration is valid");
}
