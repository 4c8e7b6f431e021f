use crate::UrlError;
use sha2::{Digest, Sha256};
use url::Url;

/// Tracking query parameters removed during normalization
///
/// Any parameter starting with `utm_` is removed as well.
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "gclsrc", "dclid", "msclkid"];

/// Options controlling URL canonicalization
///
/// The defaults match what producers use for frontier submissions. Sources
/// may override `strip_trailing_slash`, and the extra denylist extends the
/// built-in tracking parameter list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizeOptions {
    /// Remove a trailing slash from non-root paths
    pub strip_trailing_slash: bool,

    /// Rewrite `http` to `https` so both spellings share one key
    pub upgrade_to_https: bool,

    /// Additional query parameters to strip (exact key match)
    pub extra_tracking_params: Vec<String>,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            strip_trailing_slash: true,
            upgrade_to_https: true,
            extra_tracking_params: Vec::new(),
        }
    }
}

/// Normalizes a URL into its canonical frontier form
///
/// # Normalization Steps
///
/// 1. Resolve against `base` when given, otherwise parse as absolute
/// 2. Reject anything that is not HTTP(S) or has no host
/// 3. Lowercase scheme and host, optionally upgrade http to https unless an
///    explicit port is 443
/// 4. Drop default ports (80 for http, 443 for https)
/// 5. Resolve `.`/`..` segments and collapse empty segments
/// 6. Optionally remove the trailing slash (root `/` is kept)
/// 7. Remove the fragment
/// 8. Strip tracking parameters and sort the rest by key
/// 9. Remove an empty query string
///
/// The result is idempotent: normalizing a normalized URL returns it unchanged.
///
/// # Examples
///
/// ```
/// use frontier_scheduler::url::{normalize_url, NormalizeOptions};
///
/// let url = normalize_url("http://EXAMPLE.com:80/a/?b=2&a=1#top", None, &NormalizeOptions::default()).unwrap();
/// assert_eq!(url.as_str(), "https://example.com/a?a=1&b=2");
/// ```
pub fn normalize_url(
    raw: &str,
    base: Option<&Url>,
    options: &NormalizeOptions,
) -> Result<Url, UrlError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(UrlError::Malformed("empty input".to_string()));
    }

    // Step 1: Parse, resolving relative references against the base
    let mut url = match base {
        Some(base) => base.join(raw),
        None => Url::parse(raw),
    }
    .map_err(|e| UrlError::Malformed(format!("{}: {}", raw, e)))?;

    // Step 2: Validate scheme and host
    let original_scheme = url.scheme().to_string();
    if original_scheme != "http" && original_scheme != "https" {
        return Err(UrlError::InvalidScheme(original_scheme));
    }
    let host = match url.host_str() {
        Some(h) if !h.is_empty() => h.to_lowercase(),
        _ => return Err(UrlError::MissingHost),
    };

    // Step 3: Lowercase host (the url crate already lowercases the scheme)
    url.set_host(Some(&host))
        .map_err(|e| UrlError::Malformed(format!("failed to set host: {}", e)))?;

    // An explicit port that https treats as its default would be lost by the
    // upgrade, turning http on 443 into plain https
    let keeps_port = url.port().map_or(true, |port| !is_default_port("https", port));
    if options.upgrade_to_https && original_scheme == "http" && keeps_port {
        url.set_scheme("https")
            .map_err(|_| UrlError::Malformed(format!("cannot upgrade scheme of {}", raw)))?;
    }

    // Step 4: Default ports, judged against the scheme the URL was written with
    if let Some(port) = url.port() {
        if is_default_port(&original_scheme, port) {
            url.set_port(None)
                .map_err(|_| UrlError::Malformed(format!("cannot drop port of {}", raw)))?;
        }
    }

    // Steps 5 & 6: Path
    let normalized_path = normalize_path(url.path(), options.strip_trailing_slash);
    url.set_path(&normalized_path);

    // Step 7: Fragment
    url.set_fragment(None);

    // Steps 8 & 9: Query
    if url.query().is_some() {
        let params = filter_and_sort_query_params(&url, options);
        if params.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(params);
        }
    }

    Ok(url)
}

/// Computes the content-addressable frontier key of a canonical URL
///
/// The key is the hex-encoded SHA-256 of the URL string, always 64 characters.
pub fn url_hash(url: &Url) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_str().as_bytes());
    hex::encode(hasher.finalize())
}

fn is_default_port(scheme: &str, port: u16) -> bool {
    matches!((scheme, port), ("http", 80) | ("https", 443))
}

/// Normalizes a URL path by removing dot segments, empty segments and
/// (optionally) the trailing slash
fn normalize_path(path: &str, strip_trailing_slash: bool) -> String {
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                segments.pop();
            }
            _ => segments.push(segment),
        }
    }

    if segments.is_empty() {
        return "/".to_string();
    }

    let mut result = format!("/{}", segments.join("/"));
    if !strip_trailing_slash && path.ends_with('/') {
        result.push('/');
    }
    result
}

/// Filters out tracking parameters and sorts the remaining ones by key
///
/// The sort is stable so repeated keys keep their relative order.
fn filter_and_sort_query_params(url: &Url, options: &NormalizeOptions) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key, options))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    params.sort_by(|a, b| a.0.cmp(&b.0));
    params
}

fn is_tracking_param(key: &str, options: &NormalizeOptions) -> bool {
    key.starts_with("utm_")
        || TRACKING_PARAMS.contains(&key)
        || options.extra_tracking_params.iter().any(|p| p == key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalize(raw: &str) -> String {
        normalize_url(raw, None, &NormalizeOptions::default())
            .unwrap()
            .to_string()
    }

    #[test]
    fn test_http_upgraded_to_https() {
        assert_eq!(normalize("http://example.com/page"), "https://example.com/page");
    }

    #[test]
    fn test_upgrade_can_be_disabled() {
        let options = NormalizeOptions {
            upgrade_to_https: false,
            ..NormalizeOptions::default()
        };
        let url = normalize_url("http://example.com/page", None, &options).unwrap();
        assert_eq!(url.as_str(), "http://example.com/page");
    }

    #[test]
    fn test_lowercase_scheme_and_host() {
        assert_eq!(normalize("HTTPS://EXAMPLE.COM/Page"), "https://example.com/Page");
    }

    #[test]
    fn test_default_ports_removed() {
        assert_eq!(normalize("http://example.com:80/a"), "https://example.com/a");
        assert_eq!(normalize("https://example.com:443/a"), "https://example.com/a");
    }

    #[test]
    fn test_upgrade_keeps_explicit_port() {
        assert_eq!(normalize("http://example.com:443/a"), "http://example.com:443/a");
        assert_eq!(normalize("http://example.com:8080/a"), "https://example.com:8080/a");
        assert_ne!(normalize("http://example.com:443/a"), normalize("https://example.com/a"));
    }

    #[test]
    fn test_non_default_port_kept() {
        assert_eq!(normalize("https://example.com:8443/a"), "https://example.com:8443/a");
    }

    #[test]
    fn test_dot_segments_resolved() {
        assert_eq!(normalize("https://example.com/a/../b/./c"), "https://example.com/b/c");
        assert_eq!(normalize("https://example.com/../page"), "https://example.com/page");
    }

    #[test]
    fn test_trailing_slash() {
        assert_eq!(normalize("https://example.com/page/"), "https://example.com/page");
        assert_eq!(normalize("https://example.com/"), "https://example.com/");
        assert_eq!(normalize("https://example.com"), "https://example.com/");

        let keep = NormalizeOptions {
            strip_trailing_slash: false,
            ..NormalizeOptions::default()
        };
        let url = normalize_url("https://example.com/page/", None, &keep).unwrap();
        assert_eq!(url.as_str(), "https://example.com/page/");
    }

    #[test]
    fn test_multiple_slashes_collapsed() {
        assert_eq!(
            normalize("https://example.com///path//to///page"),
            "https://example.com/path/to/page"
        );
    }

    #[test]
    fn test_fragment_removed() {
        assert_eq!(normalize("https://example.com/page#section"), "https://example.com/page");
    }

    #[test]
    fn test_query_sorted_and_tracking_stripped() {
        assert_eq!(
            normalize("https://example.com/p?keep=yes&utm_medium=email&another=value&fbclid=123"),
            "https://example.com/p?another=value&keep=yes"
        );
        assert_eq!(
            normalize("https://example.com/p?utm_source=a&gclid=b&msclkid=c"),
            "https://example.com/p"
        );
    }

    #[test]
    fn test_extra_tracking_params() {
        let options = NormalizeOptions {
            extra_tracking_params: vec!["ref".to_string()],
            ..NormalizeOptions::default()
        };
        let url = normalize_url("https://example.com/p?ref=home&id=4", None, &options).unwrap();
        assert_eq!(url.as_str(), "https://example.com/p?id=4");
    }

    #[test]
    fn test_relative_resolved_against_base() {
        let base = Url::parse("https://example.com/news/today/").unwrap();
        let url = normalize_url("../archive?page=2", Some(&base), &NormalizeOptions::default())
            .unwrap();
        assert_eq!(url.as_str(), "https://example.com/news/archive?page=2");
    }

    #[test]
    fn test_malformed_and_unsupported() {
        let options = NormalizeOptions::default();
        assert!(matches!(
            normalize_url("not a url", None, &options),
            Err(UrlError::Malformed(_))
        ));
        assert!(matches!(
            normalize_url("", None, &options),
            Err(UrlError::Malformed(_))
        ));
        assert!(matches!(
            normalize_url("ftp://example.com/file", None, &options),
            Err(UrlError::InvalidScheme(_))
        ));
    }

    #[test]
    fn test_idempotent() {
        let inputs = [
            "http://WWW.Example.com:80/a/./b/../c/?z=1&a=2&utm_campaign=x#frag",
            "https://example.com/search?q=rust+lang&q=async&empty=",
            "https://example.com/%7Euser/file%20name.html",
            "https://example.com/a?x=a%26b&y=%3D",
            "https://example.com:8080//double//slash/",
        ];
        let options = NormalizeOptions::default();
        for raw in inputs {
            let once = normalize_url(raw, None, &options).unwrap();
            let twice = normalize_url(once.as_str(), None, &options).unwrap();
            assert_eq!(once, twice, "not idempotent for {}", raw);
        }
    }

    #[test]
    fn test_equivalent_urls_share_hash() {
        let options = NormalizeOptions::default();
        let a = normalize_url("https://EXAMPLE.com/a?b=2&a=1#frag", None, &options).unwrap();
        let b = normalize_url("http://example.com/a?a=1&b=2", None, &options).unwrap();
        assert_eq!(url_hash(&a), url_hash(&b));
        assert_eq!(url_hash(&a).len(), 64);
    }
}
