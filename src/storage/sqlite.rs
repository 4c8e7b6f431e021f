//! SQLite storage implementation
//!
//! This module provides the SQLite-backed frontier store. Host, feed,
//! adaptive and source persistence live in `sqlite_state`.

use crate::frontier::{
    dead_reason, BackoffPolicy, ClaimedEntry, FrontierEntry, FrontierStats, NewEntry, Outcome,
    SubmitResult,
};
use crate::poll::{ErrorKind, TypedError};
use crate::state::{FrontierStatus, Origin};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{FrontierStore, StorageError, StorageResult};
use crate::storage::StoreSettings;
use crate::CrawlError;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;

/// How long a writer waits for a competing transaction before giving up
const BUSY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

const FRONTIER_COLUMNS: &str = "id, url_hash, url, host, source_id, origin, parent_url, depth,
     priority, status, next_fetch_at, last_fetched_at, fetch_count, content_hash, etag,
     last_modified, retry_count, last_error, last_error_type, claimed_by, lease_expires_at,
     discovered_at, updated_at";

/// SQLite storage backend
pub struct SqliteStorage {
    pub(super) conn: Connection,
    pub(super) settings: StoreSettings,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(CrawlError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, CrawlError> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
            PRAGMA mmap_size = 268435456;
        ",
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn,
            settings: StoreSettings::default(),
        })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> Result<Self, CrawlError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn,
            settings: StoreSettings::default(),
        })
    }

    /// Replaces the store settings
    pub fn with_settings(mut self, settings: StoreSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }
}

// ===== Row conversion helpers =====

pub(super) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(super) fn from_millis(ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(0, ms))
}

pub(super) fn opt_from_millis(ms: Option<i64>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    ms.map(from_millis).transpose()
}

pub(super) fn corrupt(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, message.into())
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<FrontierEntry> {
    let origin: String = row.get(5)?;
    let status: String = row.get(9)?;

    Ok(FrontierEntry {
        id: row.get(0)?,
        url_hash: row.get(1)?,
        url: row.get(2)?,
        host: row.get(3)?,
        source_id: row.get(4)?,
        origin: Origin::from_db_string(&origin)
            .ok_or_else(|| corrupt(5, format!("unknown origin '{}'", origin)))?,
        parent_url: row.get(6)?,
        depth: row.get(7)?,
        priority: row.get(8)?,
        status: FrontierStatus::from_db_string(&status)
            .ok_or_else(|| corrupt(9, format!("unknown status '{}'", status)))?,
        next_fetch_at: from_millis(row.get(10)?)?,
        last_fetched_at: opt_from_millis(row.get(11)?)?,
        fetch_count: row.get(12)?,
        content_hash: row.get(13)?,
        etag: row.get(14)?,
        last_modified: row.get(15)?,
        retry_count: row.get(16)?,
        last_error: row.get(17)?,
        last_error_type: row.get(18)?,
        claimed_by: row.get(19)?,
        lease_expires_at: opt_from_millis(row.get(20)?)?,
        discovered_at: from_millis(row.get(21)?)?,
        updated_at: from_millis(row.get(22)?)?,
    })
}

fn select_entry(conn: &Connection, id: i64) -> StorageResult<Option<FrontierEntry>> {
    let entry = conn
        .query_row(
            &format!("SELECT {} FROM frontier WHERE id = ?1", FRONTIER_COLUMNS),
            params![id],
            row_to_entry,
        )
        .optional()?;
    Ok(entry)
}

/// Applies a completion to a row already verified to be claimed
///
/// Shared by worker completions and the lease reaper so that both honour the
/// retry budget in the same way.
fn apply_outcome(
    conn: &Connection,
    id: i64,
    retry_count: u32,
    outcome: Outcome,
    max_retries: u32,
    now: DateTime<Utc>,
) -> StorageResult<FrontierStatus> {
    let now_ms = to_millis(now);

    match outcome {
        Outcome::Fetched {
            content_hash,
            etag,
            last_modified,
        } => {
            conn.execute(
                "UPDATE frontier SET status = 'fetched',
                    content_hash = COALESCE(?1, content_hash),
                    etag = COALESCE(?2, etag),
                    last_modified = COALESCE(?3, last_modified),
                    fetch_count = fetch_count + 1,
                    last_fetched_at = ?4,
                    retry_count = 0,
                    last_error = NULL,
                    last_error_type = NULL,
                    claimed_by = NULL,
                    lease_expires_at = NULL,
                    updated_at = ?4
                 WHERE id = ?5 AND status = 'fetching'",
                params![content_hash, etag, last_modified, now_ms, id],
            )?;
            Ok(FrontierStatus::Fetched)
        }
        Outcome::Retry { error, .. } if retry_count >= max_retries => {
            mark_dead(conn, id, dead_reason::MAX_RETRIES, Some(&error), now_ms)?;
            Ok(FrontierStatus::Dead)
        }
        Outcome::Retry {
            backoff_until,
            error,
        } => {
            conn.execute(
                "UPDATE frontier SET status = 'pending',
                    next_fetch_at = ?1,
                    retry_count = retry_count + 1,
                    last_error = ?2,
                    last_error_type = ?3,
                    claimed_by = NULL,
                    lease_expires_at = NULL,
                    updated_at = ?4
                 WHERE id = ?5 AND status = 'fetching'",
                params![
                    to_millis(backoff_until),
                    error.cause,
                    error.kind.to_db_string(),
                    now_ms,
                    id
                ],
            )?;
            Ok(FrontierStatus::Pending)
        }
        Outcome::Dead { reason, error } => {
            mark_dead(conn, id, &reason, error.as_ref(), now_ms)?;
            Ok(FrontierStatus::Dead)
        }
    }
}

fn mark_dead(
    conn: &Connection,
    id: i64,
    reason: &str,
    error: Option<&TypedError>,
    now_ms: i64,
) -> StorageResult<()> {
    let (message, error_type) = match error {
        Some(err) => (
            format!("{}: {}", reason, err.cause),
            err.kind.to_db_string().to_string(),
        ),
        None => (reason.to_string(), reason.to_string()),
    };
    conn.execute(
        "UPDATE frontier SET status = 'dead',
            last_error = ?1,
            last_error_type = ?2,
            claimed_by = NULL,
            lease_expires_at = NULL,
            updated_at = ?3
         WHERE id = ?4 AND status = 'fetching'",
        params![message, error_type, now_ms, id],
    )?;
    Ok(())
}

impl FrontierStore for SqliteStorage {
    // ===== Producers =====

    fn submit(&mut self, entry: &NewEntry, now: DateTime<Utc>) -> StorageResult<SubmitResult> {
        let now_ms = to_millis(now);
        let next_fetch_at = to_millis(entry.next_fetch_at.unwrap_or(now));

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let inserted = tx.execute(
            "INSERT INTO frontier (url_hash, url, host, source_id, origin, parent_url, depth,
                priority, status, next_fetch_at, discovered_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'pending', ?9, ?10, ?10)
             ON CONFLICT(url_hash) DO NOTHING",
            params![
                entry.url_hash,
                entry.url,
                entry.host,
                entry.source_id,
                entry.origin.to_db_string(),
                entry.parent_url,
                entry.depth,
                entry.priority,
                next_fetch_at,
                now_ms
            ],
        )?;

        let result = if inserted == 1 {
            SubmitResult {
                id: tx.last_insert_rowid(),
                inserted: true,
            }
        } else {
            let (id, status, origin): (i64, String, String) = tx.query_row(
                "SELECT id, status, origin FROM frontier WHERE url_hash = ?1",
                params![entry.url_hash],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;

            if FrontierStatus::from_db_string(&status) == Some(FrontierStatus::Pending) {
                let current = Origin::from_db_string(&origin)
                    .ok_or_else(|| StorageError::Corrupt(format!("entry {} origin '{}'", id, origin)))?;
                let merged_origin = if entry.origin.priority_bonus() > current.priority_bonus() {
                    entry.origin
                } else {
                    current
                };

                tx.execute(
                    "UPDATE frontier SET priority = MAX(priority, ?1),
                        depth = MIN(depth, ?2),
                        next_fetch_at = MIN(next_fetch_at, ?3),
                        origin = ?4,
                        parent_url = COALESCE(parent_url, ?5),
                        source_id = COALESCE(source_id, ?6),
                        updated_at = ?7
                     WHERE id = ?8 AND status = 'pending'",
                    params![
                        entry.priority,
                        entry.depth,
                        next_fetch_at,
                        merged_origin.to_db_string(),
                        entry.parent_url,
                        entry.source_id,
                        now_ms,
                        id
                    ],
                )?;
                tracing::trace!(id, url = %entry.url, "Merged duplicate submission");
            }

            SubmitResult {
                id,
                inserted: false,
            }
        };

        tx.commit()?;
        Ok(result)
    }

    // ===== Workers =====

    fn claim(
        &mut self,
        worker_id: &str,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> StorageResult<Option<ClaimedEntry>> {
        let now_ms = to_millis(now);
        let lease_expires_at = now + lease;
        let floor_ms = self.settings.host_floor.num_milliseconds();
        let ttl_secs = self.settings.robots_ttl.num_seconds();

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let candidate: Option<(i64, String)> = tx
            .query_row(
                "SELECT f.id, f.host FROM frontier f
                 LEFT JOIN host_state h ON h.host = f.host
                 WHERE f.status = 'pending'
                   AND f.next_fetch_at <= ?1
                   AND (h.last_fetch_at IS NULL OR h.last_fetch_at + h.min_delay_ms <= ?1)
                 ORDER BY f.priority DESC, f.next_fetch_at ASC, f.id ASC
                 LIMIT 1",
                params![now_ms],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((id, host)) = candidate else {
            return Ok(None);
        };

        let updated = tx.execute(
            "UPDATE frontier SET status = 'fetching', claimed_by = ?1, lease_expires_at = ?2,
                updated_at = ?3
             WHERE id = ?4 AND status = 'pending'",
            params![worker_id, to_millis(lease_expires_at), now_ms, id],
        )?;
        if updated == 0 {
            return Ok(None);
        }

        tx.execute(
            "INSERT INTO host_state (host, last_fetch_at, min_delay_ms, robots_ttl_secs)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(host) DO UPDATE SET last_fetch_at = excluded.last_fetch_at",
            params![host, now_ms, floor_ms, ttl_secs],
        )?;

        let entry = select_entry(&tx, id)?.ok_or(StorageError::EntryNotFound(id))?;
        tx.commit()?;

        tracing::debug!(id, worker = worker_id, url = %entry.url, "Claimed entry");

        Ok(Some(ClaimedEntry {
            entry,
            worker_id: worker_id.to_string(),
            lease_expires_at,
        }))
    }

    fn complete(
        &mut self,
        id: i64,
        worker_id: &str,
        outcome: Outcome,
        now: DateTime<Utc>,
    ) -> StorageResult<FrontierStatus> {
        let max_retries = self.settings.max_retries;
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current: Option<(String, Option<String>, u32)> = tx
            .query_row(
                "SELECT status, claimed_by, retry_count FROM frontier WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((status, claimed_by, retry_count)) = current else {
            return Err(StorageError::EntryNotFound(id));
        };

        let claimed = FrontierStatus::from_db_string(&status) == Some(FrontierStatus::Fetching)
            && claimed_by.as_deref() == Some(worker_id);
        if !claimed {
            return Err(StorageError::NotClaimed {
                id,
                worker_id: worker_id.to_string(),
            });
        }

        let final_status = apply_outcome(&tx, id, retry_count, outcome, max_retries, now)?;
        tx.commit()?;

        tracing::debug!(id, worker = worker_id, status = %final_status, "Completed entry");
        Ok(final_status)
    }

    fn reap_expired_leases(
        &mut self,
        now: DateTime<Utc>,
        max_retries: u32,
        backoff: &BackoffPolicy,
    ) -> StorageResult<usize> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let expired: Vec<(i64, u32, Option<String>)> = {
            let mut stmt = tx.prepare(
                "SELECT id, retry_count, claimed_by FROM frontier
                 WHERE status = 'fetching' AND lease_expires_at <= ?1",
            )?;
            let rows = stmt
                .query_map(params![to_millis(now)], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        for (id, retry_count, claimed_by) in &expired {
            let outcome = Outcome::Retry {
                backoff_until: backoff.until(now, *retry_count),
                error: TypedError::new(ErrorKind::Network, "claim lease expired"),
            };
            let status = apply_outcome(&tx, *id, *retry_count, outcome, max_retries, now)?;
            tracing::warn!(
                id,
                worker = claimed_by.as_deref().unwrap_or("unknown"),
                status = %status,
                "Reaped expired lease"
            );
        }

        tx.commit()?;
        Ok(expired.len())
    }

    // ===== Queries =====

    fn entries_with_content_hash(
        &self,
        content_hash: &str,
        exclude_id: Option<i64>,
    ) -> StorageResult<Vec<FrontierEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM frontier
             WHERE content_hash = ?1 AND (?2 IS NULL OR id != ?2)
             ORDER BY id",
            FRONTIER_COLUMNS
        ))?;

        let entries = stmt
            .query_map(params![content_hash, exclude_id], row_to_entry)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(entries)
    }

    fn get_entry(&self, id: i64) -> StorageResult<Option<FrontierEntry>> {
        select_entry(&self.conn, id)
    }

    fn get_entry_by_hash(&self, url_hash: &str) -> StorageResult<Option<FrontierEntry>> {
        let entry = self
            .conn
            .query_row(
                &format!("SELECT {} FROM frontier WHERE url_hash = ?1", FRONTIER_COLUMNS),
                params![url_hash],
                row_to_entry,
            )
            .optional()?;
        Ok(entry)
    }

    fn frontier_stats(&self, now: DateTime<Utc>) -> StorageResult<FrontierStats> {
        let mut stats = FrontierStats::default();

        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM frontier GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (status, count) = row?;
            let status = FrontierStatus::from_db_string(&status)
                .ok_or_else(|| StorageError::Corrupt(format!("unknown status '{}'", status)))?;
            stats.add(status, count as u64);
        }

        let due: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM frontier WHERE status = 'pending' AND next_fetch_at <= ?1",
            params![to_millis(now)],
            |row| row.get(0),
        )?;
        stats.due = due as u64;

        Ok(stats)
    }
}
