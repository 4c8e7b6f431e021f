//! Shared fixtures for the integration tests

use chrono::{DateTime, Duration, TimeZone, Utc};
use frontier_scheduler::config::{UserAgentConfig, WorkerConfig};
use frontier_scheduler::crawler::{
    build_http_client, user_agent_string, ContentSink, FetchedDocument, HttpFetcher,
    PolitenessTracker, Worker, WorkerSettings, DEFAULT_MAX_BODY_BYTES,
};
use frontier_scheduler::frontier::NewEntry;
use frontier_scheduler::robots::HttpRobotsSource;
use frontier_scheduler::storage::{FrontierStore, SqliteStorage};
use frontier_scheduler::{normalize_url, CrawlError, NormalizeOptions, Origin};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// A fresh database file in its own temporary directory
///
/// The directory is removed when the returned guard is dropped.
pub fn temp_db() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("frontier.db");
    (dir, path)
}

pub fn open(path: &Path) -> SqliteStorage {
    SqliteStorage::new(path).expect("Failed to open database")
}

/// The current time at the millisecond precision the store keeps
pub fn now() -> DateTime<Utc> {
    Utc.timestamp_millis_opt(Utc::now().timestamp_millis())
        .single()
        .expect("valid timestamp")
}

/// Mock servers speak plain http, so the https upgrade stays off
pub fn plain_http() -> NormalizeOptions {
    NormalizeOptions {
        upgrade_to_https: false,
        ..NormalizeOptions::default()
    }
}

pub fn user_agent() -> UserAgentConfig {
    UserAgentConfig {
        crawler_name: "TestBot".to_string(),
        crawler_version: "1.0.0".to_string(),
        contact_url: "https://example.com/contact".to_string(),
        contact_email: "test@example.com".to_string(),
    }
}

pub fn worker_config() -> WorkerConfig {
    WorkerConfig {
        timeout_secs: 5,
        connect_timeout_secs: 2,
        max_redirects: 3,
        ..WorkerConfig::default()
    }
}

pub fn http_client() -> reqwest::Client {
    build_http_client(&user_agent(), &worker_config()).expect("Failed to build client")
}

pub fn politeness(client: reqwest::Client) -> Arc<PolitenessTracker> {
    Arc::new(PolitenessTracker::new(
        Duration::seconds(1),
        Duration::hours(24),
        user_agent_string(&user_agent()),
        Arc::new(HttpRobotsSource::new(client)),
    ))
}

pub fn http_fetcher(client: reqwest::Client) -> HttpFetcher {
    HttpFetcher::new(client, DEFAULT_MAX_BODY_BYTES)
}

/// Normalizes and submits one URL, returning the entry id
pub fn submit(storage: &mut SqliteStorage, raw: &str, origin: Origin, now: DateTime<Utc>) -> i64 {
    let url = normalize_url(raw, None, &plain_http()).expect("Failed to normalize");
    let entry = NewEntry::new(&url, None, origin, None, 0, 5).expect("Failed to build entry");
    storage.submit(&entry, now).expect("Failed to submit").id
}

/// Collects every delivered document
#[derive(Default)]
pub struct RecordingSink {
    pub documents: Mutex<Vec<FetchedDocument>>,
}

impl RecordingSink {
    pub fn urls(&self) -> Vec<String> {
        self.documents
            .lock()
            .unwrap()
            .iter()
            .map(|d| d.entry.url.clone())
            .collect()
    }
}

#[async_trait::async_trait]
impl ContentSink for RecordingSink {
    async fn deliver(&self, document: FetchedDocument) -> Result<(), CrawlError> {
        self.documents.lock().unwrap().push(document);
        Ok(())
    }
}

/// A worker on its own connection to `path`
pub fn worker(path: &Path, id: &str, sink: Arc<RecordingSink>) -> Worker {
    let client = http_client();
    Worker::new(
        id,
        open(path),
        http_fetcher(client.clone()),
        politeness(client),
        sink,
        WorkerSettings::default(),
    )
}
