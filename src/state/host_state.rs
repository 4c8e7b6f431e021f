use chrono::{DateTime, Duration, Utc};

/// Default minimum spacing between two fetches to the same host
pub const DEFAULT_HOST_FLOOR_SECS: i64 = 1;

/// Default lifetime of a cached robots.txt
pub const DEFAULT_ROBOTS_TTL_SECS: i64 = 24 * 60 * 60;

/// Per-host politeness state
///
/// One row per host, shared by every worker through the durable store. The
/// claim transaction reads `last_fetch_at`/`min_delay` and writes
/// `last_fetch_at`, so the delay holds across processes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostState {
    /// Lowercase hostname without port
    pub host: String,

    /// When a worker last claimed a URL on this host
    pub last_fetch_at: Option<DateTime<Utc>>,

    /// Minimum spacing between two fetches to this host
    pub min_delay: Duration,

    /// Cached robots.txt body; `None` means allow all
    pub robots_txt: Option<String>,

    /// When robots.txt was last refreshed (successfully or not)
    pub robots_fetched_at: Option<DateTime<Utc>>,

    /// How long the cached robots decision stays valid
    pub robots_ttl: Duration,

    /// Crawl-delay advertised by the last robots.txt fetch
    pub crawl_delay: Option<Duration>,

    /// Largest rate limit configured by any source on this host
    pub source_rate_limit: Option<Duration>,
}

impl HostState {
    /// Creates the state for a host that has never been seen
    pub fn new(host: impl Into<String>, floor: Duration, robots_ttl: Duration) -> Self {
        Self {
            host: host.into(),
            last_fetch_at: None,
            min_delay: floor,
            robots_txt: None,
            robots_fetched_at: None,
            robots_ttl,
            crawl_delay: None,
            source_rate_limit: None,
        }
    }

    /// Earliest instant at which the host may be fetched again
    pub fn next_allowed_at(&self) -> Option<DateTime<Utc>> {
        self.last_fetch_at.map(|last| last + self.min_delay)
    }

    /// Checks whether a fetch to this host is allowed at `now`
    ///
    /// A host that was never fetched is always eligible.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        match self.next_allowed_at() {
            Some(allowed) => allowed <= now,
            None => true,
        }
    }

    /// Checks whether the cached robots decision is still valid at `now`
    pub fn robots_fresh(&self, now: DateTime<Utc>) -> bool {
        match self.robots_fetched_at {
            Some(fetched) => now - fetched < self.robots_ttl,
            None => false,
        }
    }

    /// Applies the Crawl-delay of a freshly parsed robots.txt
    ///
    /// The delay drops only when the new Crawl-delay is smaller than the one
    /// it replaces. Otherwise it is raised to the derived value if needed, so
    /// rate limit penalties survive the refresh. Returns true when
    /// `min_delay` was lowered.
    pub fn apply_crawl_delay(&mut self, crawl_delay: Option<Duration>, floor: Duration) -> bool {
        let previous = self.crawl_delay;
        self.crawl_delay = crawl_delay;
        let derived = derive_min_delay(crawl_delay, self.source_rate_limit, floor);

        let smaller = matches!((crawl_delay, previous), (Some(new), Some(old)) if new < old);
        if smaller && derived < self.min_delay {
            self.min_delay = derived;
            true
        } else {
            self.min_delay = self.min_delay.max(derived);
            false
        }
    }
}

/// Combines the politeness inputs into one delay
///
/// The robots Crawl-delay, the source rate limit and the floor are combined
/// as a max, so the strictest one wins.
pub fn derive_min_delay(
    crawl_delay: Option<Duration>,
    source_rate_limit: Option<Duration>,
    floor: Duration,
) -> Duration {
    [crawl_delay, source_rate_limit]
        .into_iter()
        .flatten()
        .fold(floor, |acc, d| acc.max(d))
}
