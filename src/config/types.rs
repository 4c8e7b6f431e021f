use crate::crawler::{WorkerSettings, DEFAULT_MAX_BODY_BYTES};
use crate::frontier::{BackoffPolicy, DEFAULT_BASE_PRIORITY};
use crate::poll::DEFAULT_MAX_INTERVAL_SECS;
use crate::state::{FeedDisableState, DEFAULT_HOST_FLOOR_SECS, DEFAULT_ROBOTS_TTL_SECS};
use crate::storage::{SourceRecord, StoreSettings};
use crate::url::NormalizeOptions;
use chrono::Duration;
use serde::Deserialize;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub frontier: FrontierConfig,
    #[serde(default)]
    pub politeness: PolitenessConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    pub output: OutputConfig,
    #[serde(default)]
    pub normalizer: NormalizerConfig,
    #[serde(default)]
    pub adaptive: AdaptiveConfig,
    #[serde(default)]
    pub source: Vec<SourceConfig>,
}

/// Frontier store behavior
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct FrontierConfig {
    /// How long a worker's claim stays valid (seconds)
    pub lease_secs: u64,

    /// Failed attempts before an entry is marked dead
    pub max_retries: u32,

    /// First retry delay (seconds), doubled per attempt
    pub backoff_base_secs: u64,

    /// Largest retry delay (seconds)
    pub backoff_cap_secs: u64,

    /// How often expired leases are requeued (seconds)
    pub reap_interval_secs: u64,
}

impl Default for FrontierConfig {
    fn default() -> Self {
        Self {
            lease_secs: 300,
            max_retries: 5,
            backoff_base_secs: 60,
            backoff_cap_secs: 6 * 60 * 60,
            reap_interval_secs: 60,
        }
    }
}

/// Per-host politeness
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PolitenessConfig {
    /// Minimum time between requests to the same host (milliseconds)
    pub floor_ms: u64,

    /// Lifetime of a cached robots.txt (seconds)
    pub robots_ttl_secs: u64,
}

impl Default for PolitenessConfig {
    fn default() -> Self {
        Self {
            floor_ms: DEFAULT_HOST_FLOOR_SECS as u64 * 1000,
            robots_ttl_secs: DEFAULT_ROBOTS_TTL_SECS as u64,
        }
    }
}

/// Fetch worker pool
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct WorkerConfig {
    /// Number of concurrent workers
    pub count: usize,

    /// Pause when nothing is claimable (milliseconds)
    pub idle_ms: u64,

    /// Whole-request timeout (seconds)
    pub timeout_secs: u64,

    /// Connection timeout (seconds)
    pub connect_timeout_secs: u64,

    /// Redirect hops followed before an entry is marked dead
    pub max_redirects: usize,

    /// Largest response body read (bytes)
    pub max_body_bytes: usize,

    /// How often due sources are polled (seconds)
    pub poll_every_secs: u64,

    /// Wait before retrying feed discovery for a source (seconds)
    pub discovery_retry_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: 4,
            idle_ms: 500,
            timeout_secs: 30,
            connect_timeout_secs: 10,
            max_redirects: 10,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            poll_every_secs: 60,
            discovery_retry_secs: 24 * 60 * 60,
        }
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Where `stats` writes its markdown report, if anywhere
    #[serde(rename = "summary-path", default)]
    pub summary_path: Option<String>,
}

/// URL canonicalization options
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct NormalizerConfig {
    pub upgrade_to_https: bool,

    /// Query parameters stripped in addition to the built-in tracking list
    pub extra_tracking_params: Vec<String>,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            upgrade_to_https: true,
            extra_tracking_params: Vec::new(),
        }
    }
}

/// Adaptive re-poll scheduling
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct AdaptiveConfig {
    /// Upper bound of a stretched polling interval (seconds)
    pub max_interval_secs: u64,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            max_interval_secs: DEFAULT_MAX_INTERVAL_SECS as u64,
        }
    }
}

/// A content source polled for new URLs
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SourceConfig {
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    /// Anchor URL (feed, sitemap or listing page)
    #[serde(default)]
    pub feed_url: Option<String>,

    /// Site to search for an RSS/Atom feed when `feed_url` is not set
    #[serde(default)]
    pub base_url: Option<String>,

    /// Baseline polling interval (seconds)
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Stretch the interval while the anchor does not change
    #[serde(default)]
    pub adaptive: bool,

    /// Minimum time between requests to this source's hosts (milliseconds)
    #[serde(default)]
    pub rate_limit_ms: Option<u64>,

    #[serde(default = "default_base_priority")]
    pub base_priority: u8,

    #[serde(default = "default_strip_trailing_slash")]
    pub strip_trailing_slash: bool,
}

fn default_poll_interval_secs() -> u64 {
    30 * 60
}

fn default_base_priority() -> u8 {
    DEFAULT_BASE_PRIORITY
}

fn default_strip_trailing_slash() -> bool {
    true
}

fn secs(value: u64) -> Duration {
    Duration::seconds(i64::try_from(value).unwrap_or(i64::MAX / 1000))
}

fn millis(value: u64) -> Duration {
    Duration::milliseconds(i64::try_from(value).unwrap_or(i64::MAX / 1000))
}

impl Config {
    pub fn store_settings(&self) -> StoreSettings {
        StoreSettings {
            max_retries: self.frontier.max_retries,
            host_floor: millis(self.politeness.floor_ms),
            robots_ttl: secs(self.politeness.robots_ttl_secs),
        }
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            base: secs(self.frontier.backoff_base_secs),
            cap: secs(self.frontier.backoff_cap_secs),
        }
    }

    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            lease: secs(self.frontier.lease_secs),
            idle_sleep: std::time::Duration::from_millis(self.worker.idle_ms),
            backoff: self.backoff_policy(),
            ..WorkerSettings::default()
        }
    }

    pub fn normalize_options(&self) -> NormalizeOptions {
        NormalizeOptions {
            strip_trailing_slash: true,
            upgrade_to_https: self.normalizer.upgrade_to_https,
            extra_tracking_params: self.normalizer.extra_tracking_params.clone(),
        }
    }

    pub fn adaptive_cap(&self) -> Duration {
        secs(self.adaptive.max_interval_secs)
    }

    pub fn discovery_retry(&self) -> Duration {
        secs(self.worker.discovery_retry_secs)
    }
}

impl SourceConfig {
    /// The stored form of this source; disable state starts active
    pub fn to_record(&self) -> SourceRecord {
        SourceRecord {
            id: self.id.clone(),
            name: self.name.clone().unwrap_or_else(|| self.id.clone()),
            feed_url: self.feed_url.clone(),
            base_url: self.base_url.clone(),
            poll_interval: secs(self.poll_interval_secs),
            adaptive: self.adaptive,
            rate_limit: self.rate_limit_ms.map(millis),
            base_priority: self.base_priority,
            strip_trailing_slash: self.strip_trailing_slash,
            disable: FeedDisableState::active(),
        }
    }
}
