use crate::crawler::read_body_limited;
use crate::CrawlError;
use async_trait::async_trait;
use reqwest::Client;
use url::Url;

/// Largest robots.txt body read before giving up
pub const MAX_ROBOTS_BYTES: usize = 512 * 1024;

/// Where robots.txt bodies come from
#[async_trait]
pub trait RobotsSource: Send + Sync {
    /// Fetches the robots.txt at `robots_url`
    ///
    /// # Returns
    ///
    /// * `Ok(Some(body))` - The server returned the file
    /// * `Ok(None)` - The server answered with a non-success status (allow all)
    /// * `Err(_)` - The file could not be obtained
    async fn fetch_robots(&self, robots_url: &Url) -> Result<Option<String>, CrawlError>;
}

/// The robots.txt location for the origin of `url`
pub fn robots_url_for(url: &Url) -> Result<Url, CrawlError> {
    Ok(url.join("/robots.txt")?)
}

/// Fetches robots.txt over HTTP with the crawler's client
#[derive(Debug, Clone)]
pub struct HttpRobotsSource {
    client: Client,
    max_bytes: usize,
}

impl HttpRobotsSource {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            max_bytes: MAX_ROBOTS_BYTES,
        }
    }
}

#[async_trait]
impl RobotsSource for HttpRobotsSource {
    async fn fetch_robots(&self, robots_url: &Url) -> Result<Option<String>, CrawlError> {
        let response = self
            .client
            .get(robots_url.clone())
            .send()
            .await
            .map_err(|e| CrawlError::Http {
                url: robots_url.to_string(),
                source: e,
            })?;

        if !response.status().is_success() {
            tracing::debug!(
                url = %robots_url,
                status = response.status().as_u16(),
                "robots.txt not available, allowing all"
            );
            return Ok(None);
        }

        let body = read_body_limited(response, self.max_bytes)
            .await
            .map_err(|e| CrawlError::Http {
                url: robots_url.to_string(),
                source: e,
            })?;

        match body {
            Some(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            None => {
                tracing::warn!(url = %robots_url, "robots.txt exceeds size limit, allowing all");
                Ok(None)
            }
        }
    }
}
