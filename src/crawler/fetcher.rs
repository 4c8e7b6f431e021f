//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests made by workers and pollers:
//! - Building HTTP clients with proper user agent strings
//! - Conditional GET (`If-None-Match`, `If-Modified-Since`)
//! - Bounded body reads
//! - Mapping transport failures to classifier input

use crate::config::{UserAgentConfig, WorkerConfig};
use crate::poll::{parse_retry_after, FeedFetcher, RawOutcome, TransportFailure};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED, RETRY_AFTER};
use reqwest::{redirect::Policy, Client, Response, StatusCode};
use std::time::Duration;
use url::Url;

/// Largest page body read before the fetch is abandoned
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Validators from a previous fetch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conditional {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl Conditional {
    pub fn new(etag: Option<&str>, last_modified: Option<&str>) -> Self {
        Self {
            etag: etag.map(str::to_string),
            last_modified: last_modified.map(str::to_string),
        }
    }
}

/// Result of a fetch attempt
#[derive(Debug)]
pub enum FetchResponse {
    /// A 2xx response with its body
    Ok {
        /// Final URL after redirects
        final_url: Url,
        status: u16,
        body: Vec<u8>,
        etag: Option<String>,
        last_modified: Option<String>,
    },

    /// The validators matched (HTTP 304)
    NotModified { final_url: Url },

    /// Anything else, ready for the classifier
    Failed(RawOutcome),
}

/// Formats the crawler's user agent
///
/// Format: `CrawlerName/Version (+ContactURL; ContactEmail)`
pub fn user_agent_string(config: &UserAgentConfig) -> String {
    format!(
        "{}/{} (+{}; {})",
        config.crawler_name, config.crawler_version, config.contact_url, config.contact_email
    )
}

/// Builds an HTTP client with proper configuration
///
/// Redirects are followed up to `max_redirects` hops; exceeding the limit
/// surfaces as a redirect error.
///
/// # Example
///
/// ```no_run
/// use frontier_scheduler::config::{UserAgentConfig, WorkerConfig};
/// use frontier_scheduler::crawler::build_http_client;
///
/// let config = UserAgentConfig {
///     crawler_name: "FrontierBot".to_string(),
///     crawler_version: "1.0".to_string(),
///     contact_url: "https://example.com/about".to_string(),
///     contact_email: "admin@example.com".to_string(),
/// };
///
/// let client = build_http_client(&config, &WorkerConfig::default()).unwrap();
/// ```
pub fn build_http_client(
    user_agent: &UserAgentConfig,
    worker: &WorkerConfig,
) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(user_agent_string(user_agent))
        .timeout(Duration::from_secs(worker.timeout_secs))
        .connect_timeout(Duration::from_secs(worker.connect_timeout_secs))
        .redirect(Policy::limited(worker.max_redirects))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Reads a response body, giving up past `max_bytes`
///
/// Returns `Ok(None)` when the body is larger than the limit.
pub async fn read_body_limited(
    mut response: Response,
    max_bytes: usize,
) -> Result<Option<Vec<u8>>, reqwest::Error> {
    if let Some(len) = response.content_length() {
        if len > max_bytes as u64 {
            return Ok(None);
        }
    }

    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if body.len() + chunk.len() > max_bytes {
            return Ok(None);
        }
        body.extend_from_slice(&chunk);
    }
    Ok(Some(body))
}

/// Fetches pages and feeds with conditional GET
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    max_body_bytes: usize,
}

impl HttpFetcher {
    pub fn new(client: Client, max_body_bytes: usize) -> Self {
        Self {
            client,
            max_body_bytes,
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Fetches `url`, sending the validators from a previous fetch
    ///
    /// Never returns an error: failures come back as
    /// [`FetchResponse::Failed`] for the classifier.
    pub async fn fetch(
        &self,
        url: &Url,
        conditional: &Conditional,
        now: DateTime<Utc>,
    ) -> FetchResponse {
        let mut request = self.client.get(url.clone());
        if let Some(etag) = &conditional.etag {
            request = request.header(IF_NONE_MATCH, etag);
        }
        if let Some(last_modified) = &conditional.last_modified {
            request = request.header(IF_MODIFIED_SINCE, last_modified);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return FetchResponse::Failed(transport_outcome(&e)),
        };

        let status = response.status();
        let final_url = response.url().clone();

        if status == StatusCode::NOT_MODIFIED {
            return FetchResponse::NotModified { final_url };
        }

        if !status.is_success() {
            let retry_after = header_str(&response, RETRY_AFTER.as_str())
                .and_then(|value| parse_retry_after(&value, now));
            return FetchResponse::Failed(RawOutcome::Response {
                status: status.as_u16(),
                retry_after,
            });
        }

        let etag = header_str(&response, ETAG.as_str());
        let last_modified = header_str(&response, LAST_MODIFIED.as_str());

        match read_body_limited(response, self.max_body_bytes).await {
            Ok(Some(body)) => FetchResponse::Ok {
                final_url,
                status: status.as_u16(),
                body,
                etag,
                last_modified,
            },
            Ok(None) => FetchResponse::Failed(RawOutcome::Transport {
                failure: TransportFailure::Other,
                message: format!("response body exceeds {} bytes", self.max_body_bytes),
            }),
            Err(e) => FetchResponse::Failed(transport_outcome(&e)),
        }
    }
}

#[async_trait]
impl FeedFetcher for HttpFetcher {
    async fn fetch_feed(
        &self,
        url: &Url,
        conditional: &Conditional,
        now: DateTime<Utc>,
    ) -> FetchResponse {
        self.fetch(url, conditional, now).await
    }
}

fn header_str(response: &Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Maps a reqwest error onto a transport failure category
fn transport_outcome(error: &reqwest::Error) -> RawOutcome {
    let failure = if error.is_timeout() {
        TransportFailure::Timeout
    } else if error.is_redirect() {
        TransportFailure::TooManyRedirects
    } else if error.is_connect() {
        if format!("{:?}", error).to_lowercase().contains("dns") {
            TransportFailure::Dns
        } else {
            TransportFailure::Connect
        }
    } else if error.is_request() || error.is_body() || error.is_decode() {
        TransportFailure::Reset
    } else {
        TransportFailure::Other
    };

    RawOutcome::Transport {
        failure,
        message: error.to_string(),
    }
}
