//! Per-host politeness
//!
//! Host rows live in the durable store so every worker and every process
//! sees the same spacing. The claim transaction enforces the delay; this
//! tracker maintains the delay itself and the cached robots.txt decision.

use crate::robots::{robots_url_for, RobotsRules, RobotsSource};
use crate::state::HostState;
use crate::storage::{HostStore, StorageResult};
use crate::url::extract_host;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use url::Url;

/// Maintains per-host delays and robots.txt decisions
#[derive(Clone)]
pub struct PolitenessTracker {
    floor: Duration,
    robots_ttl: Duration,
    user_agent: String,
    robots: Arc<dyn RobotsSource>,
}

impl PolitenessTracker {
    /// Creates a tracker
    ///
    /// `user_agent` is the full user agent string; its product token selects
    /// the robots.txt group.
    pub fn new(
        floor: Duration,
        robots_ttl: Duration,
        user_agent: impl Into<String>,
        robots: Arc<dyn RobotsSource>,
    ) -> Self {
        Self {
            floor,
            robots_ttl,
            user_agent: user_agent.into(),
            robots,
        }
    }

    pub fn floor(&self) -> Duration {
        self.floor
    }

    fn load<S: HostStore + ?Sized>(&self, store: &S, host: &str) -> StorageResult<HostState> {
        Ok(store
            .get_host_state(host)?
            .unwrap_or_else(|| HostState::new(host, self.floor, self.robots_ttl)))
    }

    /// Checks whether `host` may be fetched at `now`
    pub fn is_eligible<S: HostStore + ?Sized>(
        &self,
        store: &S,
        host: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<bool> {
        Ok(self.load(store, host)?.is_eligible(now))
    }

    /// Records a fetch to `host` at `now`
    ///
    /// Claims already do this inside their transaction; this is for fetches
    /// that bypass the frontier.
    pub fn record_fetch<S: HostStore + ?Sized>(
        &self,
        store: &mut S,
        host: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<()> {
        store.record_host_fetch(host, now)
    }

    /// Backs off a host after HTTP 429
    ///
    /// The delay becomes `max(min_delay * 2, retry_after)`.
    ///
    /// # Returns
    ///
    /// The new delay.
    pub fn apply_rate_limit_penalty<S: HostStore + ?Sized>(
        &self,
        store: &mut S,
        host: &str,
        retry_after: Option<Duration>,
    ) -> StorageResult<Duration> {
        let delay = store.penalize_host(host, retry_after)?;
        tracing::warn!(
            host = host,
            min_delay_ms = delay.num_milliseconds(),
            "Host rate limited, delay increased"
        );
        Ok(delay)
    }

    /// Applies a source's configured rate limit to its host
    ///
    /// Only ever raises the delay. A host seen for the first time gets a row
    /// with the floor delay.
    pub fn register_host<S: HostStore + ?Sized>(
        &self,
        store: &mut S,
        host: &str,
        rate_limit: Option<Duration>,
    ) -> StorageResult<()> {
        let existing = store.get_host_state(host)?;
        let is_new = existing.is_none();
        let mut state =
            existing.unwrap_or_else(|| HostState::new(host, self.floor, self.robots_ttl));

        let mut changed = is_new;
        if let Some(limit) = rate_limit {
            if state.source_rate_limit.map_or(true, |current| limit > current) {
                state.source_rate_limit = Some(limit);
                changed = true;
            }
            if limit > state.min_delay {
                state.min_delay = limit;
                changed = true;
            }
        }

        if changed {
            store.save_host_state(&state)?;
        }
        Ok(())
    }

    /// Operator override of a host's delay
    pub fn set_min_delay<S: HostStore + ?Sized>(
        &self,
        store: &mut S,
        host: &str,
        delay: Duration,
    ) -> StorageResult<()> {
        store.set_host_min_delay(host, delay)?;
        tracing::info!(host = host, min_delay_ms = delay.num_milliseconds(), "Host delay set");
        Ok(())
    }

    /// Decides whether robots.txt allows fetching `url`
    ///
    /// Uses the cached rules while they are younger than the TTL. Otherwise
    /// refreshes them through the robots source and stores the body and
    /// fetch time. A fetched Crawl-delay can raise the host delay, and lowers
    /// it only when smaller than the previous Crawl-delay. A failed refresh
    /// caches allow-all for the TTL and leaves the delay alone.
    pub async fn robots_decision<S: HostStore + ?Sized + Send>(
        &self,
        store: &mut S,
        url: &Url,
        now: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let Some(host) = extract_host(url) else {
            return Ok(true);
        };
        let state = self.load(store, &host)?;

        if state.robots_fresh(now) {
            let rules = state
                .robots_txt
                .as_deref()
                .map_or_else(RobotsRules::allow_all, RobotsRules::from_content);
            return Ok(rules.is_allowed(url.as_str(), &self.user_agent));
        }

        let fetched = self.fetch_rules(url).await;

        // Reload: other workers may have penalised the host during the fetch
        let mut state = self.load(store, &host)?;
        state.robots_fetched_at = Some(now);
        state.robots_ttl = self.robots_ttl;
        let lowered = match &fetched {
            Some(rules) => {
                state.robots_txt = Some(rules.content().to_string())
                    .filter(|content| !content.is_empty());
                state.apply_crawl_delay(rules.crawl_delay(&self.user_agent), self.floor)
            }
            None => {
                state.robots_txt = None;
                false
            }
        };
        store.save_host_state(&state)?;
        if lowered {
            store.set_host_min_delay(&host, state.min_delay)?;
        }
        let rules = fetched.unwrap_or_else(RobotsRules::allow_all);

        tracing::debug!(
            host = %host,
            min_delay_ms = state.min_delay.num_milliseconds(),
            "robots.txt refreshed"
        );

        Ok(rules.is_allowed(url.as_str(), &self.user_agent))
    }

    async fn fetch_rules(&self, url: &Url) -> Option<RobotsRules> {
        let robots_url = match robots_url_for(url) {
            Ok(robots_url) => robots_url,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Cannot build robots.txt URL");
                return None;
            }
        };

        match self.robots.fetch_robots(&robots_url).await {
            Ok(Some(body)) => Some(RobotsRules::from_content(&body)),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(url = %robots_url, error = %e, "robots.txt fetch failed, allowing all");
                None
            }
        }
    }
}

impl std::fmt::Debug for PolitenessTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolitenessTracker")
            .field("floor", &self.floor)
            .field("robots_ttl", &self.robots_ttl)
            .field("user_agent", &self.user_agent)
            .finish_non_exhaustive()
    }
}
