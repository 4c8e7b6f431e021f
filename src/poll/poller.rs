//! Feed polling: the producer side of the frontier
//!
//! Each due source's anchor URL is fetched conditionally. Failures go
//! through the classifier and the disable controller; successes submit the
//! discovered item links and feed the adaptive interval calculator. Both
//! controllers only ever run from this completion path.

use crate::crawler::{Conditional, FetchResponse, PolitenessTracker};
use crate::frontier::NewEntry;
use crate::poll::{
    classify, on_poll_failure, on_poll_success, record_anchor_fetch, record_not_modified,
    DisableDecision, ErrorKind, FeedDiscoverer, RawOutcome, SourceRegistry, TypedError,
    DEFAULT_DISCOVERY_RETRY_SECS,
};
use crate::state::Origin;
use crate::storage::{FeedStateStore, FrontierStore, SourceRecord, SqliteStorage};
use crate::url::{extract_host, normalize_url, NormalizeOptions};
use crate::CrawlError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::watch;
use url::Url;

/// Fetches a source's anchor URL
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch_feed(
        &self,
        url: &Url,
        conditional: &Conditional,
        now: DateTime<Utc>,
    ) -> FetchResponse;
}

/// Turns an anchor body into candidate links
pub trait FeedParser: Send + Sync {
    /// Links found in `body`, possibly relative to `base`
    ///
    /// An `Err` means the body could not be parsed at all.
    fn extract_links(&self, body: &[u8], base: &Url) -> Result<Vec<String>, String>;
}

/// What happened when a source was polled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollResult {
    /// New content; `submitted` counts links that were new to the frontier
    Fetched { items: u32, submitted: u32 },
    /// The anchor answered 304
    NotModified,
    /// The poll failed
    Failed {
        error: TypedError,
        decision: DisableDecision,
    },
    /// The source has no feed URL yet
    Undiscovered,
}

/// Polls sources and submits what they link to
pub struct FeedPoller {
    storage: SqliteStorage,
    fetcher: Arc<dyn FeedFetcher>,
    parser: Arc<dyn FeedParser>,
    politeness: Arc<PolitenessTracker>,
    normalize: NormalizeOptions,
    adaptive_cap: Duration,
    discoverer: FeedDiscoverer,
}

impl FeedPoller {
    pub fn new(
        storage: SqliteStorage,
        fetcher: Arc<dyn FeedFetcher>,
        parser: Arc<dyn FeedParser>,
        politeness: Arc<PolitenessTracker>,
        normalize: NormalizeOptions,
        adaptive_cap: Duration,
    ) -> Self {
        let discoverer = FeedDiscoverer::new(
            fetcher.clone(),
            Duration::seconds(DEFAULT_DISCOVERY_RETRY_SECS),
        );
        Self {
            storage,
            fetcher,
            parser,
            politeness,
            normalize,
            adaptive_cap,
            discoverer,
        }
    }

    pub fn storage(&self) -> &SqliteStorage {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut SqliteStorage {
        &mut self.storage
    }

    /// Sets how long a source without a discovered feed waits between attempts
    pub fn with_discovery_retry(mut self, retry_after: Duration) -> Self {
        self.discoverer = FeedDiscoverer::new(self.fetcher.clone(), retry_after);
        self
    }

    /// Searches for feeds of sources that only have a base URL
    pub async fn discover_feeds(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<Vec<(String, Url)>, CrawlError> {
        self.discoverer.discover_pending(&mut self.storage, now).await
    }

    /// Polls every source that is due at `now`
    ///
    /// A source that fails with an internal error is logged and skipped; the
    /// rest of the tick still runs.
    pub async fn poll_due(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<Vec<(String, PollResult)>, CrawlError> {
        let due = self.storage.list_due_sources(now)?;
        if !due.is_empty() {
            tracing::debug!(count = due.len(), "Polling due sources");
        }

        let mut results = Vec::with_capacity(due.len());
        for source in due {
            match self.poll_source(&source, now).await {
                Ok(result) => results.push((source.id, result)),
                Err(e) => TypedError::internal(e.to_string()).log("Source poll failed", &source.id),
            }
        }
        Ok(results)
    }

    /// Polls one source regardless of whether it is due
    pub async fn poll_source(
        &mut self,
        source: &SourceRecord,
        now: DateTime<Utc>,
    ) -> Result<PollResult, CrawlError> {
        let Some(raw_feed_url) = source.feed_url.as_deref() else {
            tracing::debug!(source = %source.id, "No feed URL yet");
            return Ok(PollResult::Undiscovered);
        };
        let state = self
            .storage
            .get_or_create_feed_state(&source.id, raw_feed_url)?;

        let feed_url = match Url::parse(raw_feed_url) {
            Ok(url) => url,
            Err(e) => {
                let raw = RawOutcome::Parse(format!("invalid feed URL: {}", e));
                return self.handle_failure(source, &raw, None, now);
            }
        };
        let feed_host = extract_host(&feed_url);

        if let Some(host) = &feed_host {
            self.politeness
                .register_host(&mut self.storage, host, source.rate_limit)?;
            self.politeness.record_fetch(&mut self.storage, host, now)?;
        }

        let conditional = Conditional::new(state.last_etag.as_deref(), state.last_modified.as_deref());
        let response = self
            .fetcher
            .fetch_feed(&feed_url, &conditional, now)
            .await;

        match response {
            FetchResponse::Ok {
                final_url,
                body,
                etag,
                last_modified,
                ..
            } => {
                let links = match self.parser.extract_links(&body, &final_url) {
                    Ok(links) => links,
                    Err(e) => {
                        return self.handle_failure(
                            source,
                            &RawOutcome::Parse(e),
                            feed_host.as_deref(),
                            now,
                        )
                    }
                };

                let (items, submitted) = self.submit_links(source, &final_url, &links, now)?;

                self.storage.record_poll_success(
                    &source.id,
                    now,
                    etag.as_deref(),
                    last_modified.as_deref(),
                    Some(items),
                )?;
                on_poll_success(&mut self.storage, &source.id)?;

                if source.adaptive {
                    record_anchor_fetch(
                        &mut self.storage,
                        &source.id,
                        &body,
                        source.poll_interval,
                        self.adaptive_cap,
                        now,
                    )?;
                }

                tracing::info!(source = %source.id, items, submitted, "Feed polled");
                Ok(PollResult::Fetched { items, submitted })
            }
            FetchResponse::NotModified { .. } => {
                self.storage
                    .record_poll_success(&source.id, now, None, None, None)?;
                on_poll_success(&mut self.storage, &source.id)?;

                if source.adaptive {
                    record_not_modified(
                        &mut self.storage,
                        &source.id,
                        source.poll_interval,
                        self.adaptive_cap,
                        now,
                    )?;
                }

                tracing::debug!(source = %source.id, "Feed not modified");
                Ok(PollResult::NotModified)
            }
            FetchResponse::Failed(raw) => {
                self.handle_failure(source, &raw, feed_host.as_deref(), now)
            }
        }
    }

    /// Normalizes and submits item links
    ///
    /// # Returns
    ///
    /// `(items, submitted)`: links that normalized, and links new to the frontier.
    fn submit_links(
        &mut self,
        source: &SourceRecord,
        base: &Url,
        links: &[String],
        now: DateTime<Utc>,
    ) -> Result<(u32, u32), CrawlError> {
        let options = NormalizeOptions {
            strip_trailing_slash: source.strip_trailing_slash,
            ..self.normalize.clone()
        };

        let mut items = 0u32;
        let mut submitted = 0u32;
        let mut hosts = BTreeSet::new();

        for link in links {
            let url = match normalize_url(link, Some(base), &options) {
                Ok(url) => url,
                Err(e) => {
                    tracing::debug!(source = %source.id, link = %link, error = %e, "Skipping link");
                    continue;
                }
            };
            let entry = NewEntry::new(
                &url,
                Some(&source.id),
                Origin::Feed,
                Some(base),
                0,
                source.base_priority,
            )?;
            items += 1;
            hosts.insert(entry.host.clone());

            if self.storage.submit(&entry, now)?.inserted {
                submitted += 1;
            }
        }

        if source.rate_limit.is_some() {
            for host in &hosts {
                self.politeness
                    .register_host(&mut self.storage, host, source.rate_limit)?;
            }
        }

        Ok((items, submitted))
    }

    fn handle_failure(
        &mut self,
        source: &SourceRecord,
        raw: &RawOutcome,
        feed_host: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<PollResult, CrawlError> {
        let error = classify(raw)
            .unwrap_or_else(|| TypedError::new(ErrorKind::Unexpected, "success reported as failure"));
        error.log("Feed poll failed", &source.id);

        if error.kind == ErrorKind::RateLimited {
            if let Some(host) = feed_host {
                self.politeness
                    .apply_rate_limit_penalty(&mut self.storage, host, error.retry_after)?;
            }
        }

        let counts = error.kind != ErrorKind::RateLimited;
        let consecutive = self
            .storage
            .record_poll_failure(&source.id, now, &error, counts)?;
        let decision = on_poll_failure(&mut self.storage, &source.id, &error, consecutive, now)?;

        Ok(PollResult::Failed { error, decision })
    }

    /// Polls due sources every `every` until shutdown
    pub async fn run(mut self, every: std::time::Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!("Feed poller started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = crate::crawler::wait_for_shutdown(&mut shutdown) => break,
            }

            if let Err(e) = self.discover_feeds(Utc::now()).await {
                TypedError::internal(e.to_string()).log("Feed discovery failed", "poller");
            }
            if let Err(e) = self.poll_due(Utc::now()).await {
                TypedError::internal(e.to_string()).log("Feed polling failed", "poller");
            }
        }

        tracing::info!("Feed poller stopped");
    }
}
