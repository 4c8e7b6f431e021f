//! Storage traits and error types
//!
//! Each trait covers one owner's slice of the durable state: the frontier
//! store owns entries, the politeness tracker owns host rows, the feed
//! poller owns poll state and the adaptive calculator owns adaptive rows.

use crate::frontier::{
    BackoffPolicy, ClaimedEntry, FrontierEntry, FrontierStats, NewEntry, Outcome, SubmitResult,
};
use crate::poll::TypedError;
use crate::state::{AdaptiveState, FeedPollState, FrontierStatus, HostState};
use crate::storage::SourceRecord;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Entry {id} is not claimed by worker {worker_id}")]
    NotClaimed { id: i64, worker_id: String },

    #[error("Entry not found: {0}")]
    EntryNotFound(i64),

    #[error("Unknown source: {0}")]
    UnknownSource(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// The durable, deduplicated URL frontier
pub trait FrontierStore {
    // ===== Producers =====

    /// Inserts a new entry or merges into the existing one
    ///
    /// A pending duplicate keeps the higher priority, the smaller depth, the
    /// earlier `next_fetch_at` and the origin with the larger bonus. Entries
    /// in any other status are left untouched.
    fn submit(&mut self, entry: &NewEntry, now: DateTime<Utc>) -> StorageResult<SubmitResult>;

    // ===== Workers =====

    /// Atomically claims the best eligible entry
    ///
    /// Eligible means pending, due, and on a host whose politeness delay has
    /// elapsed. The host fetch is recorded in the same transaction. Returns
    /// `None` without blocking when nothing is eligible.
    fn claim(
        &mut self,
        worker_id: &str,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> StorageResult<Option<ClaimedEntry>>;

    /// Records how a worker finished with a claimed entry
    ///
    /// # Returns
    ///
    /// The status the entry ended up in.
    ///
    /// # Errors
    ///
    /// `StorageError::NotClaimed` if the entry is no longer claimed by
    /// `worker_id` (lease reaped, completed twice).
    fn complete(
        &mut self,
        id: i64,
        worker_id: &str,
        outcome: Outcome,
        now: DateTime<Utc>,
    ) -> StorageResult<FrontierStatus>;

    /// Requeues every entry whose lease expired before `now`
    ///
    /// Each expired claim counts as a failed attempt; returns the number of
    /// entries reaped.
    fn reap_expired_leases(
        &mut self,
        now: DateTime<Utc>,
        max_retries: u32,
        backoff: &BackoffPolicy,
    ) -> StorageResult<usize>;

    // ===== Queries =====

    /// Other entries sharing a content hash
    fn entries_with_content_hash(
        &self,
        content_hash: &str,
        exclude_id: Option<i64>,
    ) -> StorageResult<Vec<FrontierEntry>>;

    fn get_entry(&self, id: i64) -> StorageResult<Option<FrontierEntry>>;

    fn get_entry_by_hash(&self, url_hash: &str) -> StorageResult<Option<FrontierEntry>>;

    fn frontier_stats(&self, now: DateTime<Utc>) -> StorageResult<FrontierStats>;
}

/// Persistence for per-host politeness state
pub trait HostStore {
    fn get_host_state(&self, host: &str) -> StorageResult<Option<HostState>>;

    /// Inserts or updates the host row
    ///
    /// Never lowers the stored `min_delay` or rewinds `last_fetch_at`; the
    /// caller's copy may be stale by the time it is written.
    fn save_host_state(&mut self, state: &HostState) -> StorageResult<()>;

    /// Atomically raises the delay to `max(min_delay * 2, retry_after)`
    ///
    /// A host without a row starts from the store's floor. Returns the new
    /// delay.
    fn penalize_host(
        &mut self,
        host: &str,
        retry_after: Option<Duration>,
    ) -> StorageResult<Duration>;

    /// Sets the delay unconditionally, creating the row if needed
    ///
    /// The only way to lower a delay. Reserved for the operator override and
    /// a refreshed robots.txt with a smaller Crawl-delay.
    fn set_host_min_delay(&mut self, host: &str, delay: Duration) -> StorageResult<()>;

    /// Sets `last_fetch_at`, creating the row with default delay if needed
    fn record_host_fetch(&mut self, host: &str, now: DateTime<Utc>) -> StorageResult<()>;
}

/// Persistence for per-source poll bookkeeping
pub trait FeedStateStore {
    fn get_or_create_feed_state(
        &mut self,
        source_id: &str,
        feed_url: &str,
    ) -> StorageResult<FeedPollState>;

    /// Records a successful poll and resets the error streak
    fn record_poll_success(
        &mut self,
        source_id: &str,
        now: DateTime<Utc>,
        etag: Option<&str>,
        last_modified: Option<&str>,
        item_count: Option<u32>,
    ) -> StorageResult<()>;

    /// Records a failed poll
    ///
    /// The error streak grows only when `counts_toward_disable` is set.
    ///
    /// # Returns
    ///
    /// The consecutive error count after this failure.
    fn record_poll_failure(
        &mut self,
        source_id: &str,
        now: DateTime<Utc>,
        error: &TypedError,
        counts_toward_disable: bool,
    ) -> StorageResult<u32>;
}

/// Persistence for adaptive interval state
pub trait AdaptiveStore {
    fn get_adaptive_state(&self, source_id: &str) -> StorageResult<Option<AdaptiveState>>;

    fn save_adaptive_state(
        &mut self,
        state: &AdaptiveState,
        now: DateTime<Utc>,
    ) -> StorageResult<()>;
}

/// Source configuration rows
pub trait SourceStore {
    /// Inserts or updates a source from configuration
    ///
    /// Disable state is preserved across updates.
    fn upsert_source(&mut self, source: &SourceRecord, now: DateTime<Utc>) -> StorageResult<()>;

    fn get_source(&self, source_id: &str) -> StorageResult<Option<SourceRecord>>;

    fn list_sources(&self) -> StorageResult<Vec<SourceRecord>>;

    /// Sources with a base URL but no feed URL, not attempted since
    /// `now - retry_after`
    fn list_undiscovered_sources(
        &self,
        now: DateTime<Utc>,
        retry_after: Duration,
    ) -> StorageResult<Vec<SourceRecord>>;

    fn record_discovery_attempt(&mut self, source_id: &str, now: DateTime<Utc>)
        -> StorageResult<()>;

    /// Stores a discovered feed URL
    fn update_feed_url(&mut self, source_id: &str, feed_url: &str) -> StorageResult<()>;
}
