//! Feed discovery for sources configured with only a site URL
//!
//! The site's page is searched for `<link rel="alternate">` feed tags first,
//! then a handful of well-known feed paths are tried. A candidate counts only
//! when it fetches and parses as a feed with at least one item.

use crate::crawler::{extract_feed_links, sniff_kind, Conditional, DocumentKind, FetchResponse};
use crate::poll::FeedFetcher;
use crate::storage::SourceStore;
use crate::CrawlError;
use chrono::{DateTime, Duration, Utc};
use scraper::{Html, Selector};
use std::sync::Arc;
use url::Url;

/// Paths tried when the page does not advertise a feed
pub const COMMON_FEED_PATHS: &[&str] = &[
    "/feed",
    "/rss",
    "/feed.xml",
    "/rss.xml",
    "/atom.xml",
    "/index.xml",
];

/// Default wait before a failed discovery is tried again
pub const DEFAULT_DISCOVERY_RETRY_SECS: i64 = 24 * 60 * 60;

/// Finds and stores feed URLs for sources that lack one
#[derive(Clone)]
pub struct FeedDiscoverer {
    fetcher: Arc<dyn FeedFetcher>,
    retry_after: Duration,
}

impl FeedDiscoverer {
    pub fn new(fetcher: Arc<dyn FeedFetcher>, retry_after: Duration) -> Self {
        Self {
            fetcher,
            retry_after,
        }
    }

    pub fn retry_after(&self) -> Duration {
        self.retry_after
    }

    /// Looks for a feed belonging to the site at `base`
    ///
    /// Advertised feeds win over the common paths; within each group the
    /// first candidate that parses as a non-empty feed is returned.
    pub async fn discover(&self, base: &Url, now: DateTime<Utc>) -> Option<Url> {
        match self.fetcher.fetch_feed(base, &Conditional::default(), now).await {
            FetchResponse::Ok {
                final_url, body, ..
            } => {
                let html = String::from_utf8_lossy(&body);
                for candidate in feed_link_candidates(&html, &final_url) {
                    if self.is_feed(&candidate, now).await {
                        return Some(candidate);
                    }
                }
            }
            other => {
                tracing::debug!(url = %base, response = ?other, "Base URL not fetched for discovery");
            }
        }

        for path in COMMON_FEED_PATHS {
            let Ok(candidate) = base.join(path) else {
                continue;
            };
            if self.is_feed(&candidate, now).await {
                return Some(candidate);
            }
        }
        None
    }

    async fn is_feed(&self, url: &Url, now: DateTime<Utc>) -> bool {
        match self.fetcher.fetch_feed(url, &Conditional::default(), now).await {
            FetchResponse::Ok { body, .. } => {
                sniff_kind(&body) == DocumentKind::Feed
                    && extract_feed_links(&body).map_or(false, |links| !links.is_empty())
            }
            _ => false,
        }
    }

    /// Runs discovery for every source still waiting for a feed URL
    ///
    /// The attempt is recorded before fetching, so a site without a feed is
    /// left alone for the retry window.
    ///
    /// # Returns
    ///
    /// `(source_id, feed_url)` for each feed found and stored.
    pub async fn discover_pending<S: SourceStore + ?Sized + Send>(
        &self,
        store: &mut S,
        now: DateTime<Utc>,
    ) -> Result<Vec<(String, Url)>, CrawlError> {
        let pending = store.list_undiscovered_sources(now, self.retry_after)?;
        if !pending.is_empty() {
            tracing::info!(count = pending.len(), "Discovering feeds");
        }

        let mut found = Vec::new();
        for source in pending {
            store.record_discovery_attempt(&source.id, now)?;

            let base = match source.base_url.as_deref().map(Url::parse) {
                Some(Ok(base)) => base,
                Some(Err(e)) => {
                    tracing::warn!(source = %source.id, error = %e, "Invalid base URL");
                    continue;
                }
                None => continue,
            };

            match self.discover(&base, now).await {
                Some(feed_url) => {
                    store.update_feed_url(&source.id, feed_url.as_str())?;
                    tracing::info!(source = %source.id, feed_url = %feed_url, "Discovered feed");
                    found.push((source.id, feed_url));
                }
                None => {
                    tracing::info!(source = %source.id, base_url = %base, "No feed found");
                }
            }
        }
        Ok(found)
    }
}

impl std::fmt::Debug for FeedDiscoverer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedDiscoverer")
            .field("retry_after", &self.retry_after)
            .finish_non_exhaustive()
    }
}

/// Feed URLs advertised by an HTML page, resolved against `base`
pub fn feed_link_candidates(html: &str, base: &Url) -> Vec<Url> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("link[rel~='alternate'][href]") else {
        return Vec::new();
    };

    document
        .select(&selector)
        .filter(|element| element.value().attr("type").map_or(false, is_feed_type))
        .filter_map(|element| element.value().attr("href"))
        .filter_map(|href| base.join(href.trim()).ok())
        .collect()
}

fn is_feed_type(link_type: &str) -> bool {
    let link_type = link_type.to_lowercase();
    link_type.contains("rss+xml") || link_type.contains("atom+xml")
}
