//! Hand-off of fetched content to the downstream pipeline

use crate::frontier::FrontierEntry;
use crate::CrawlError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use url::Url;

/// A successfully fetched document
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub entry: FrontierEntry,
    pub final_url: Url,
    pub body: Vec<u8>,
    pub content_hash: String,
    pub fetched_at: DateTime<Utc>,

    /// Other frontier entries already fetched with the same content hash
    pub duplicates: Vec<i64>,
}

/// Receives fetched documents
///
/// Delivery happens after the entry is completed, so a failing sink never
/// causes a refetch.
#[async_trait]
pub trait ContentSink: Send + Sync {
    async fn deliver(&self, document: FetchedDocument) -> Result<(), CrawlError>;
}

/// A sink that only logs what it receives
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl ContentSink for LogSink {
    async fn deliver(&self, document: FetchedDocument) -> Result<(), CrawlError> {
        tracing::info!(
            id = document.entry.id,
            url = %document.final_url,
            bytes = document.body.len(),
            content_hash = %document.content_hash,
            duplicates = document.duplicates.len(),
            "Document fetched"
        );
        Ok(())
    }
}
