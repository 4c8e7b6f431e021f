//! Storage module for the durable scheduling state
//!
//! All scheduling state lives in one SQLite database shared by every worker
//! and producer:
//! - the frontier (`frontier` table)
//! - per-host politeness (`host_state`)
//! - configured sources and their disable state (`sources`)
//! - per-source poll bookkeeping (`feed_state`) and change tracking (`adaptive_state`)

mod schema;
mod sqlite;
mod sqlite_state;
mod traits;

pub use schema::initialize_schema;
pub use sqlite::SqliteStorage;
pub use traits::{
    AdaptiveStore, FeedStateStore, FrontierStore, HostStore, SourceStore, StorageError,
    StorageResult,
};

use crate::state::{FeedDisableState, DEFAULT_HOST_FLOOR_SECS, DEFAULT_ROBOTS_TTL_SECS};
use crate::CrawlError;
use chrono::Duration;
use std::path::Path;

/// Store-wide settings applied inside transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreSettings {
    /// Retries allowed before a `Retry` completion becomes `Dead`
    pub max_retries: u32,

    /// Minimum delay given to hosts seen for the first time
    pub host_floor: Duration,

    /// Lifetime of a cached robots.txt decision
    pub robots_ttl: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            max_retries: 5,
            host_floor: Duration::seconds(DEFAULT_HOST_FLOOR_SECS),
            robots_ttl: Duration::seconds(DEFAULT_ROBOTS_TTL_SECS),
        }
    }
}

/// Opens (or creates) the database with the given settings
///
/// Every worker opens its own connection through this function; the claim
/// transaction is the only point where they synchronize.
pub fn open_storage(path: &Path, settings: StoreSettings) -> Result<SqliteStorage, CrawlError> {
    Ok(SqliteStorage::new(path)?.with_settings(settings))
}

/// A configured content source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRecord {
    pub id: String,
    pub name: String,

    /// The anchor URL polled for new items; `None` until discovered
    pub feed_url: Option<String>,

    /// Site searched for a feed when `feed_url` is missing
    pub base_url: Option<String>,

    /// Baseline polling interval
    pub poll_interval: Duration,

    /// Whether content changes stretch the polling interval
    pub adaptive: bool,

    /// Minimum spacing between fetches to this source's host
    pub rate_limit: Option<Duration>,

    pub base_priority: u8,
    pub strip_trailing_slash: bool,
    pub disable: FeedDisableState,
}
