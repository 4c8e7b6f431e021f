//! Frontier entry types, priority scoring and retry backoff
//!
//! The frontier itself lives in the durable store (see
//! [`crate::storage::FrontierStore`]); this module holds the value types that
//! cross its boundary.

use crate::poll::TypedError;
use crate::state::{FrontierStatus, Origin};
use crate::url::{extract_host, url_hash};
use crate::{UrlError, UrlResult};
use chrono::{DateTime, Duration, Utc};
use url::Url;

/// Lowest and highest priority an entry can carry
pub const MIN_PRIORITY: u8 = 1;
pub const MAX_PRIORITY: u8 = 10;

/// Base priority used when a source does not configure one
pub const DEFAULT_BASE_PRIORITY: u8 = 5;

/// Dead-entry reasons recorded in `last_error`
pub mod dead_reason {
    pub const ROBOTS_BLOCKED: &str = "robots_blocked";
    pub const NOT_FOUND: &str = "not_found";
    pub const GONE: &str = "gone";
    pub const TOO_MANY_REDIRECTS: &str = "too_many_redirects";
    pub const MAX_RETRIES: &str = "max_retries";
    pub const MALFORMED_URL: &str = "malformed_url";
}

/// A persisted frontier entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontierEntry {
    pub id: i64,
    pub url_hash: String,
    pub url: String,
    pub host: String,
    pub source_id: Option<String>,
    pub origin: Origin,
    pub parent_url: Option<String>,
    pub depth: u32,
    pub priority: u8,
    pub status: FrontierStatus,
    pub next_fetch_at: DateTime<Utc>,
    pub last_fetched_at: Option<DateTime<Utc>>,
    pub fetch_count: u32,
    pub content_hash: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub last_error_type: Option<String>,
    pub claimed_by: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub discovered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A URL proposed by a producer
///
/// Producers normalize the URL first; `url_hash` and `host` are derived from
/// the canonical form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    pub url: String,
    pub url_hash: String,
    pub host: String,
    pub source_id: Option<String>,
    pub origin: Origin,
    pub parent_url: Option<String>,
    pub depth: u32,
    pub priority: u8,

    /// Earliest fetch time; `None` means immediately
    pub next_fetch_at: Option<DateTime<Utc>>,
}

impl NewEntry {
    /// Builds a submission from an already normalized URL
    ///
    /// The priority is scored from `base_priority`, the origin and the depth.
    ///
    /// # Errors
    ///
    /// Returns `UrlError::MissingHost` if the URL has no host.
    pub fn new(
        url: &Url,
        source_id: Option<&str>,
        origin: Origin,
        parent_url: Option<&Url>,
        depth: u32,
        base_priority: u8,
    ) -> UrlResult<Self> {
        let host = extract_host(url).ok_or(UrlError::MissingHost)?;
        Ok(Self {
            url: url.to_string(),
            url_hash: url_hash(url),
            host,
            source_id: source_id.map(str::to_string),
            origin,
            parent_url: parent_url.map(|p| p.to_string()),
            depth,
            priority: compute_priority(base_priority, origin, depth),
            next_fetch_at: None,
        })
    }

    /// Delays the first fetch until `at`
    pub fn not_before(mut self, at: DateTime<Utc>) -> Self {
        self.next_fetch_at = Some(at);
        self
    }
}

/// Result of a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitResult {
    pub id: i64,
    /// `false` when the URL was already known
    pub inserted: bool,
}

/// An entry handed to a worker under a lease
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedEntry {
    pub entry: FrontierEntry,
    pub worker_id: String,
    pub lease_expires_at: DateTime<Utc>,
}

/// How a worker finished with a claimed entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Fetched; `None` fields keep the stored values (304 Not Modified)
    Fetched {
        content_hash: Option<String>,
        etag: Option<String>,
        last_modified: Option<String>,
    },

    /// Put the entry back to `pending` until `backoff_until`
    Retry {
        backoff_until: DateTime<Utc>,
        error: TypedError,
    },

    /// Give up on the entry for good
    Dead {
        reason: String,
        error: Option<TypedError>,
    },
}

impl Outcome {
    pub fn dead(reason: &str, error: Option<TypedError>) -> Self {
        Self::Dead {
            reason: reason.to_string(),
            error,
        }
    }
}

/// Entry counts per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrontierStats {
    pub pending: u64,
    pub fetching: u64,
    pub fetched: u64,
    pub failed: u64,
    pub dead: u64,
    /// Pending entries whose `next_fetch_at` has passed
    pub due: u64,
}

impl FrontierStats {
    pub fn total(&self) -> u64 {
        self.pending + self.fetching + self.fetched + self.failed + self.dead
    }

    pub(crate) fn add(&mut self, status: FrontierStatus, count: u64) {
        match status {
            FrontierStatus::Pending => self.pending += count,
            FrontierStatus::Fetching => self.fetching += count,
            FrontierStatus::Fetched => self.fetched += count,
            FrontierStatus::Failed => self.failed += count,
            FrontierStatus::Dead => self.dead += count,
        }
    }
}

/// Scores a submission
///
/// `clamp(base + bonus(origin) - penalty, 1, 10)` where the penalty is the
/// link depth for spider discoveries and zero otherwise.
///
/// # Examples
///
/// ```
/// use frontier_scheduler::compute_priority;
/// use frontier_scheduler::Origin;
///
/// assert_eq!(compute_priority(5, Origin::Feed, 0), 7);
/// assert_eq!(compute_priority(5, Origin::Spider, 3), 2);
/// assert_eq!(compute_priority(5, Origin::Spider, 9), 1);
/// ```
pub fn compute_priority(base: u8, origin: Origin, depth: u32) -> u8 {
    let penalty = if origin.penalizes_depth() {
        i64::from(depth)
    } else {
        0
    };
    let score = i64::from(base) + origin.priority_bonus() - penalty;
    score.clamp(i64::from(MIN_PRIORITY), i64::from(MAX_PRIORITY)) as u8
}

/// Exponential retry backoff: `base * 2^retry_count`, capped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::seconds(60),
            cap: Duration::hours(6),
        }
    }
}

impl BackoffPolicy {
    /// Delay before the next attempt of an entry that has failed `retry_count` times
    pub fn delay(&self, retry_count: u32) -> Duration {
        crate::poll::next_interval(self.base, retry_count, self.cap)
    }

    /// Instant of the next attempt
    pub fn until(&self, now: DateTime<Utc>, retry_count: u32) -> DateTime<Utc> {
        now + self.delay(retry_count)
    }
}
