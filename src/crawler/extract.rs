//! Minimal link extraction for producers
//!
//! Recognizes three document shapes:
//! - RSS/Atom feeds (item links, falling back to permalink guids)
//! - XML sitemaps and sitemap indexes (`<loc>` elements)
//! - HTML (`<a href>` and canonical links)
//!
//! Links are returned as found; producers resolve and normalize them.

use crate::poll::FeedParser;
use scraper::{Html, Selector};
use url::Url;

/// Shape of a fetched document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Feed,
    Sitemap,
    Html,
}

/// Guesses the document shape from the first bytes of the body
pub fn sniff_kind(body: &[u8]) -> DocumentKind {
    let head_len = body.len().min(1024);
    let head = String::from_utf8_lossy(&body[..head_len]).to_lowercase();

    if head.contains("<urlset") || head.contains("<sitemapindex") {
        DocumentKind::Sitemap
    } else if head.contains("<rss") || head.contains("<feed") || head.contains("<rdf:rdf") {
        DocumentKind::Feed
    } else {
        DocumentKind::Html
    }
}

/// The default feed parser
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkExtractor;

impl FeedParser for LinkExtractor {
    fn extract_links(&self, body: &[u8], _base: &Url) -> Result<Vec<String>, String> {
        match sniff_kind(body) {
            DocumentKind::Feed => extract_feed_links(body),
            DocumentKind::Sitemap => Ok(extract_sitemap_locs(&String::from_utf8_lossy(body))),
            DocumentKind::Html => Ok(extract_html_links(&String::from_utf8_lossy(body))),
        }
    }
}

/// Item links of an RSS or Atom feed
///
/// Entries without a link contribute their id when it is an absolute
/// HTTP(S) URL (RSS `guid isPermaLink`, Atom `id`).
pub fn extract_feed_links(body: &[u8]) -> Result<Vec<String>, String> {
    let feed = feed_rs::parser::parse(body).map_err(|e| format!("feed parse error: {e}"))?;

    let links = feed
        .entries
        .into_iter()
        .filter_map(|entry| {
            let link = entry
                .links
                .iter()
                .find(|l| l.rel.as_deref().map_or(true, |rel| rel == "alternate"))
                .or_else(|| entry.links.first())
                .map(|l| l.href.clone());
            link.or_else(|| is_http_url(&entry.id).then(|| entry.id.clone()))
        })
        .collect();

    Ok(links)
}

/// `<loc>` values of a sitemap or sitemap index
pub fn extract_sitemap_locs(xml: &str) -> Vec<String> {
    let document = Html::parse_document(xml);
    let Ok(selector) = Selector::parse("loc") else {
        return Vec::new();
    };

    document
        .select(&selector)
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|loc| !loc.is_empty())
        .collect()
}

/// Anchor and canonical hrefs of an HTML page
///
/// Skips download links and non-navigational schemes (`javascript:`,
/// `mailto:`, `tel:`, `data:`) as well as fragment-only references.
pub fn extract_html_links(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let mut links = Vec::new();

    if let Ok(a_selector) = Selector::parse("a[href]") {
        for element in document.select(&a_selector) {
            if element.value().attr("download").is_some() {
                continue;
            }
            if let Some(href) = element.value().attr("href").and_then(keep_href) {
                links.push(href);
            }
        }
    }

    if let Ok(canonical_selector) = Selector::parse("link[rel='canonical'][href]") {
        for element in document.select(&canonical_selector) {
            if let Some(href) = element.value().attr("href").and_then(keep_href) {
                links.push(href);
            }
        }
    }

    links
}

fn keep_href(href: &str) -> Option<String> {
    let href = href.trim();
    let lower = href.to_lowercase();
    if href.is_empty()
        || href.starts_with('#')
        || ["javascript:", "mailto:", "tel:", "data:"]
            .iter()
            .any(|scheme| lower.starts_with(scheme))
    {
        return None;
    }
    Some(href.to_string())
}

fn is_http_url(candidate: &str) -> bool {
    Url::parse(candidate)
        .map(|u| matches!(u.scheme(), "http" | "https"))
        .unwrap_or(false)
}
