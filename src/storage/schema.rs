//! Database schema definitions
//!
//! Timestamps are stored as Unix epoch milliseconds so that scheduling
//! predicates (`next_fetch_at <= now`, `last_fetch_at + min_delay_ms <= now`)
//! are plain integer comparisons inside the claim transaction.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- The URL frontier: one row per canonical URL, ever
CREATE TABLE IF NOT EXISTS frontier (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url_hash TEXT NOT NULL UNIQUE,
    url TEXT NOT NULL,
    host TEXT NOT NULL,
    source_id TEXT,
    origin TEXT NOT NULL,
    parent_url TEXT,
    depth INTEGER NOT NULL DEFAULT 0,
    priority INTEGER NOT NULL DEFAULT 5,
    status TEXT NOT NULL DEFAULT 'pending',
    next_fetch_at INTEGER NOT NULL,
    last_fetched_at INTEGER,
    fetch_count INTEGER NOT NULL DEFAULT 0,
    content_hash TEXT,
    etag TEXT,
    last_modified TEXT,
    retry_count INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    last_error_type TEXT,
    claimed_by TEXT,
    lease_expires_at INTEGER,
    discovered_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_frontier_claimable ON frontier(status, priority DESC, next_fetch_at);
CREATE INDEX IF NOT EXISTS idx_frontier_host ON frontier(host);
CREATE INDEX IF NOT EXISTS idx_frontier_content_hash ON frontier(content_hash);
CREATE INDEX IF NOT EXISTS idx_frontier_lease ON frontier(status, lease_expires_at);

-- Per-host politeness and cached robots.txt
CREATE TABLE IF NOT EXISTS host_state (
    host TEXT PRIMARY KEY,
    last_fetch_at INTEGER,
    min_delay_ms INTEGER NOT NULL,
    robots_txt TEXT,
    robots_fetched_at INTEGER,
    robots_ttl_secs INTEGER NOT NULL,
    crawl_delay_ms INTEGER,
    source_rate_limit_ms INTEGER
);

-- Configured sources and their disable state
CREATE TABLE IF NOT EXISTS sources (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    feed_url TEXT,
    base_url TEXT,
    discovery_attempted_at INTEGER,
    poll_interval_secs INTEGER NOT NULL,
    adaptive INTEGER NOT NULL DEFAULT 0,
    rate_limit_ms INTEGER,
    base_priority INTEGER NOT NULL DEFAULT 5,
    strip_trailing_slash INTEGER NOT NULL DEFAULT 1,
    disabled_at INTEGER,
    disable_reason TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

-- Per-source poll bookkeeping
CREATE TABLE IF NOT EXISTS feed_state (
    source_id TEXT PRIMARY KEY,
    feed_url TEXT NOT NULL,
    last_polled_at INTEGER,
    last_success_at INTEGER,
    last_etag TEXT,
    last_modified TEXT,
    last_item_count INTEGER,
    consecutive_errors INTEGER NOT NULL DEFAULT 0,
    last_error_type TEXT,
    last_error TEXT
);

-- Per-source change tracking for adaptive polling
CREATE TABLE IF NOT EXISTS adaptive_state (
    source_id TEXT PRIMARY KEY,
    last_hash TEXT NOT NULL,
    last_change_at INTEGER NOT NULL,
    unchanged_count INTEGER NOT NULL DEFAULT 0,
    current_interval_secs INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
