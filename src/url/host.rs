use url::Url;

/// Extracts the politeness key (host) from a URL
///
/// The host is lowercased and never includes the port, so `example.com:8080`
/// and `example.com` share one politeness budget.
///
/// # Arguments
///
/// * `url` - The URL to extract the host from
///
/// # Returns
///
/// * `Some(String)` - The lowercase host
/// * `None` - If the URL has no host
///
/// # Examples
///
/// ```
/// use url::Url;
/// use frontier_scheduler::url::extract_host;
///
/// let url = Url::parse("https://News.Example.com:8443/path").unwrap();
/// assert_eq!(extract_host(&url), Some("news.example.com".to_string()));
/// ```
pub fn extract_host(url: &Url) -> Option<String> {
    url.host_str()
        .filter(|h| !h.is_empty())
        .map(|h| h.to_lowercase())
}
