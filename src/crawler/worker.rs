//! The fetch claim loop
//!
//! Each worker owns its own database connection and loops
//! claim → robots check → fetch → classify → complete until shutdown.
//! The claim transaction is the only point where workers synchronize.

use crate::crawler::fetcher::{Conditional, FetchResponse, HttpFetcher};
use crate::crawler::politeness::PolitenessTracker;
use crate::crawler::sink::{ContentSink, FetchedDocument};
use crate::frontier::{dead_reason, BackoffPolicy, ClaimedEntry, FrontierEntry, Outcome};
use crate::poll::{classify, hash_body, ErrorKind, RawOutcome, TransportFailure, TypedError};
use crate::state::FrontierStatus;
use crate::storage::{FrontierStore, SqliteStorage, StorageError};
use crate::CrawlError;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use url::Url;

/// Timing knobs of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    /// How long a claim stays valid before the reaper may requeue it
    pub lease: Duration,

    /// Pause when nothing is claimable
    pub idle_sleep: std::time::Duration,

    /// Retry backoff for failed fetches
    pub backoff: BackoffPolicy,

    /// Delay before an entry interrupted by shutdown is retried
    pub shutdown_backoff: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            lease: Duration::minutes(5),
            idle_sleep: std::time::Duration::from_millis(500),
            backoff: BackoffPolicy::default(),
            shutdown_backoff: Duration::seconds(30),
        }
    }
}

/// What one iteration of the loop did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Nothing was claimable
    Idle,
    /// An entry was claimed and completed
    Completed(FrontierStatus),
    /// The lease was lost before completion (reaped or completed elsewhere)
    LeaseLost,
}

/// A single fetch worker
pub struct Worker {
    id: String,
    storage: SqliteStorage,
    fetcher: HttpFetcher,
    politeness: Arc<PolitenessTracker>,
    sink: Arc<dyn ContentSink>,
    settings: WorkerSettings,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        storage: SqliteStorage,
        fetcher: HttpFetcher,
        politeness: Arc<PolitenessTracker>,
        sink: Arc<dyn ContentSink>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            id: id.into(),
            storage,
            fetcher,
            politeness,
            sink,
            settings,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Runs until the shutdown signal is raised
    ///
    /// # Returns
    ///
    /// The number of entries completed by this worker.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> u64 {
        tracing::info!(worker = %self.id, "Worker started");
        let mut completed = 0u64;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let idle = match self.step(Utc::now(), &mut shutdown).await {
                Ok(Step::Completed(_)) => {
                    completed += 1;
                    false
                }
                Ok(Step::LeaseLost) => false,
                Ok(Step::Idle) => true,
                Err(e) => {
                    TypedError::internal(e.to_string()).log("Worker step failed", &self.id);
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = tokio::time::sleep(self.settings.idle_sleep) => {}
                    _ = wait_for_shutdown(&mut shutdown) => {}
                }
            }
        }

        tracing::info!(worker = %self.id, completed, "Worker stopped");
        completed
    }

    /// Claims and processes at most one entry
    ///
    /// `now` is the claim time; the completion time advances from it by the
    /// time spent fetching.
    pub async fn step(
        &mut self,
        now: DateTime<Utc>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Step, CrawlError> {
        let Some(claimed) = self.storage.claim(&self.id, self.settings.lease, now)? else {
            return Ok(Step::Idle);
        };
        let started = Instant::now();
        let ClaimedEntry { entry, .. } = claimed;

        let url = match Url::parse(&entry.url) {
            Ok(url) => url,
            Err(e) => {
                let error = TypedError::internal(format!("stored URL does not parse: {}", e));
                error.log("Malformed frontier entry", &entry.url);
                let outcome = Outcome::dead(dead_reason::MALFORMED_URL, Some(error));
                return self.finish(&entry, outcome, now);
            }
        };

        let allowed = match self
            .politeness
            .robots_decision(&mut self.storage, &url, now)
            .await
        {
            Ok(allowed) => allowed,
            Err(e) => return self.abandon(&entry, e.into(), now),
        };
        if !allowed {
            tracing::info!(url = %url, "Disallowed by robots.txt");
            let outcome = Outcome::dead(dead_reason::ROBOTS_BLOCKED, None);
            return self.finish(&entry, outcome, now);
        }

        let conditional = Conditional::new(entry.etag.as_deref(), entry.last_modified.as_deref());
        let response = tokio::select! {
            response = self.fetcher.fetch(&url, &conditional, now) => Some(response),
            _ = wait_for_shutdown(shutdown) => None,
        };
        let done_at = now + elapsed_since(started);

        let Some(response) = response else {
            let error = classify(&RawOutcome::Transport {
                failure: TransportFailure::Cancelled,
                message: "fetch interrupted by shutdown".to_string(),
            })
            .unwrap_or_else(|| TypedError::new(ErrorKind::Network, "fetch interrupted"));
            let outcome = Outcome::Retry {
                backoff_until: done_at + self.settings.shutdown_backoff,
                error,
            };
            return self.finish(&entry, outcome, done_at);
        };

        match response {
            FetchResponse::Ok {
                final_url,
                body,
                etag,
                last_modified,
                ..
            } => {
                let content_hash = hash_body(&body);
                let outcome = Outcome::Fetched {
                    content_hash: Some(content_hash.clone()),
                    etag,
                    last_modified,
                };
                let step = self.finish(&entry, outcome, done_at)?;
                if step == Step::Completed(FrontierStatus::Fetched) {
                    self.deliver(entry, final_url, body, content_hash, done_at)
                        .await;
                }
                Ok(step)
            }
            FetchResponse::NotModified { .. } => {
                tracing::debug!(url = %url, "Not modified");
                let outcome = Outcome::Fetched {
                    content_hash: None,
                    etag: None,
                    last_modified: None,
                };
                self.finish(&entry, outcome, done_at)
            }
            FetchResponse::Failed(raw) => match self.failure_outcome(&entry, &raw, done_at) {
                Ok(outcome) => self.finish(&entry, outcome, done_at),
                Err(e) => self.abandon(&entry, e, done_at),
            },
        }
    }

    /// Maps a failed fetch onto a completion
    fn failure_outcome(
        &mut self,
        entry: &FrontierEntry,
        raw: &RawOutcome,
        now: DateTime<Utc>,
    ) -> Result<Outcome, CrawlError> {
        let error = classify(raw).unwrap_or_else(|| {
            TypedError::new(ErrorKind::Unexpected, "success reported as failure")
        });
        error.log("Fetch failed", &entry.url);

        if let RawOutcome::Transport {
            failure: TransportFailure::TooManyRedirects,
            ..
        } = raw
        {
            return Ok(Outcome::dead(dead_reason::TOO_MANY_REDIRECTS, Some(error)));
        }

        let backoff = self.settings.backoff.delay(entry.retry_count);
        let outcome = match error.kind {
            ErrorKind::NotFound => Outcome::dead(dead_reason::NOT_FOUND, Some(error)),
            ErrorKind::Gone => Outcome::dead(dead_reason::GONE, Some(error)),
            ErrorKind::RateLimited => {
                self.politeness.apply_rate_limit_penalty(
                    &mut self.storage,
                    &entry.host,
                    error.retry_after,
                )?;
                let wait = error.retry_after.map_or(backoff, |r| r.max(backoff));
                Outcome::Retry {
                    backoff_until: now + wait,
                    error,
                }
            }
            _ => Outcome::Retry {
                backoff_until: now + backoff,
                error,
            },
        };
        Ok(outcome)
    }

    /// Completes the claimed entry, tolerating a lost lease
    fn finish(
        &mut self,
        entry: &FrontierEntry,
        outcome: Outcome,
        now: DateTime<Utc>,
    ) -> Result<Step, CrawlError> {
        match self.storage.complete(entry.id, &self.id, outcome, now) {
            Ok(status) => Ok(Step::Completed(status)),
            Err(StorageError::NotClaimed { id, .. }) => {
                tracing::warn!(worker = %self.id, id, url = %entry.url, "Lease lost before completion");
                Ok(Step::LeaseLost)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Requeues the claimed entry as an internal failure, then returns `err`
    ///
    /// Keeps the entry from sitting in `fetching` until its lease expires.
    fn abandon(
        &mut self,
        entry: &FrontierEntry,
        err: CrawlError,
        now: DateTime<Utc>,
    ) -> Result<Step, CrawlError> {
        let outcome = Outcome::Retry {
            backoff_until: now + self.settings.backoff.delay(entry.retry_count),
            error: TypedError::internal(err.to_string()),
        };
        if let Err(e) = self.finish(entry, outcome, now) {
            TypedError::internal(e.to_string()).log("Requeue after failure failed", &entry.url);
        }
        Err(err)
    }

    async fn deliver(
        &mut self,
        entry: FrontierEntry,
        final_url: Url,
        body: Vec<u8>,
        content_hash: String,
        fetched_at: DateTime<Utc>,
    ) {
        let duplicates = match self
            .storage
            .entries_with_content_hash(&content_hash, Some(entry.id))
        {
            Ok(entries) => entries.into_iter().map(|e| e.id).collect(),
            Err(e) => {
                TypedError::internal(e.to_string()).log("Duplicate lookup failed", &entry.url);
                Vec::new()
            }
        };

        let url = entry.url.clone();
        let document = FetchedDocument {
            entry,
            final_url,
            body,
            content_hash,
            fetched_at,
            duplicates,
        };
        if let Err(e) = self.sink.deliver(document).await {
            tracing::warn!(url = %url, error = %e, "Content sink rejected document");
        }
    }
}

/// Resolves once the shutdown flag is raised
///
/// A dropped sender never resolves; the owner of the loop decides when to
/// stop in that case.
pub(crate) async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn elapsed_since(started: Instant) -> Duration {
    Duration::from_std(started.elapsed()).unwrap_or_else(|_| Duration::zero())
}
