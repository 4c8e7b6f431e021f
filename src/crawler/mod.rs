//! Crawler runtime: fetching, politeness and the worker pool
//!
//! This module contains:
//! - HTTP fetching with conditional GET and bounded bodies
//! - Per-host politeness and robots.txt decisions
//! - The worker claim loop and the lease reaper
//! - Link extraction for producers
//! - The pool runner that ties them to one database

mod extract;
mod fetcher;
mod politeness;
mod reaper;
mod sink;
mod worker;

pub use extract::{
    extract_feed_links, extract_html_links, extract_sitemap_locs, sniff_kind, DocumentKind,
    LinkExtractor,
};
pub use fetcher::{
    build_http_client, read_body_limited, user_agent_string, Conditional, FetchResponse,
    HttpFetcher, DEFAULT_MAX_BODY_BYTES,
};
pub use politeness::PolitenessTracker;
pub use reaper::reaper_task;
pub use sink::{ContentSink, FetchedDocument, LogSink};
pub use worker::{Step, Worker, WorkerSettings};

pub(crate) use worker::wait_for_shutdown;

use crate::config::Config;
use crate::poll::FeedPoller;
use crate::robots::HttpRobotsSource;
use crate::storage::{open_storage, SourceStore, SqliteStorage};
use crate::CrawlError;
use chrono::{DateTime, Utc};
use reqwest::Client;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;

/// Totals reported when the pool shuts down
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Entries completed by all workers
    pub completed: u64,
    /// Expired leases requeued by the reaper
    pub reaped: usize,
}

/// Builds the politeness tracker shared by workers and the poller
pub fn build_politeness(config: &Config, client: Client) -> PolitenessTracker {
    let settings = config.store_settings();
    PolitenessTracker::new(
        settings.host_floor,
        settings.robots_ttl,
        user_agent_string(&config.user_agent),
        Arc::new(HttpRobotsSource::new(client)),
    )
}

/// Writes the configured sources into the database
///
/// Disable state and poll bookkeeping of existing sources are kept.
///
/// # Returns
///
/// The number of sources synced.
pub fn sync_sources(
    storage: &mut SqliteStorage,
    config: &Config,
    now: DateTime<Utc>,
) -> Result<usize, CrawlError> {
    for source in &config.source {
        storage.upsert_source(&source.to_record(), now)?;
    }
    tracing::debug!(count = config.source.len(), "Sources synced from configuration");
    Ok(config.source.len())
}

/// Runs the worker pool, the lease reaper and the feed poller
///
/// Every task opens its own connection to the database. Returns once the
/// shutdown signal is raised and every task has stopped.
pub async fn run_scheduler(
    config: &Config,
    sink: Arc<dyn ContentSink>,
    shutdown: watch::Receiver<bool>,
) -> Result<RunSummary, CrawlError> {
    let db_path = Path::new(&config.output.database_path);
    let settings = config.store_settings();

    let mut storage = open_storage(db_path, settings)?;
    sync_sources(&mut storage, config, Utc::now())?;

    let client = build_http_client(&config.user_agent, &config.worker)?;
    let politeness = Arc::new(build_politeness(config, client.clone()));
    let fetcher = HttpFetcher::new(client, config.worker.max_body_bytes);

    tracing::info!(
        workers = config.worker.count,
        sources = config.source.len(),
        database = %config.output.database_path,
        "Starting scheduler"
    );

    let mut workers = Vec::with_capacity(config.worker.count);
    for i in 0..config.worker.count {
        let worker = Worker::new(
            format!("worker-{}", i),
            open_storage(db_path, settings)?,
            fetcher.clone(),
            politeness.clone(),
            sink.clone(),
            config.worker_settings(),
        );
        workers.push(tokio::spawn(worker.run(shutdown.clone())));
    }

    let reaper = tokio::spawn(reaper_task(
        open_storage(db_path, settings)?,
        std::time::Duration::from_secs(config.frontier.reap_interval_secs),
        config.frontier.max_retries,
        config.backoff_policy(),
        shutdown.clone(),
    ));

    let poller = FeedPoller::new(
        storage,
        Arc::new(fetcher),
        Arc::new(LinkExtractor),
        politeness,
        config.normalize_options(),
        config.adaptive_cap(),
    )
    .with_discovery_retry(config.discovery_retry());
    let poller = tokio::spawn(poller.run(
        std::time::Duration::from_secs(config.worker.poll_every_secs),
        shutdown,
    ));

    let mut summary = RunSummary::default();
    for handle in workers {
        summary.completed += handle.await?;
    }
    summary.reaped = reaper.await?;
    poller.await?;

    tracing::info!(
        completed = summary.completed,
        reaped = summary.reaped,
        "Scheduler stopped"
    );
    Ok(summary)
}

