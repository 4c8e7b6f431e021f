//! SQLite persistence for host, feed, adaptive and source state

use crate::poll::{ErrorKind, SourceRegistry, TypedError};
use crate::state::{AdaptiveState, DisableReason, FeedDisableState, FeedPollState, HostState};
use crate::storage::sqlite::{corrupt, from_millis, opt_from_millis, to_millis};
use crate::storage::traits::{
    AdaptiveStore, FeedStateStore, HostStore, SourceStore, StorageError, StorageResult,
};
use crate::storage::{SourceRecord, SqliteStorage};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};

const SOURCE_COLUMNS: &str = "s.id, s.name, s.feed_url, s.poll_interval_secs, s.adaptive,
     s.rate_limit_ms, s.base_priority, s.strip_trailing_slash, s.disabled_at, s.disable_reason,
     s.base_url";

fn row_to_host(row: &Row<'_>) -> rusqlite::Result<HostState> {
    Ok(HostState {
        host: row.get(0)?,
        last_fetch_at: opt_from_millis(row.get(1)?)?,
        min_delay: Duration::milliseconds(row.get(2)?),
        robots_txt: row.get(3)?,
        robots_fetched_at: opt_from_millis(row.get(4)?)?,
        robots_ttl: Duration::seconds(row.get(5)?),
        crawl_delay: row.get::<_, Option<i64>>(6)?.map(Duration::milliseconds),
        source_rate_limit: row.get::<_, Option<i64>>(7)?.map(Duration::milliseconds),
    })
}

fn row_to_source(row: &Row<'_>) -> rusqlite::Result<SourceRecord> {
    let disabled_at = opt_from_millis(row.get(8)?)?;
    let reason = match row.get::<_, Option<String>>(9)? {
        Some(s) => Some(
            DisableReason::from_db_string(&s)
                .ok_or_else(|| corrupt(9, format!("unknown disable reason '{}'", s)))?,
        ),
        None => None,
    };

    Ok(SourceRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        feed_url: row.get(2)?,
        base_url: row.get(10)?,
        poll_interval: Duration::seconds(row.get(3)?),
        adaptive: row.get(4)?,
        rate_limit: row.get::<_, Option<i64>>(5)?.map(Duration::milliseconds),
        base_priority: row.get(6)?,
        strip_trailing_slash: row.get(7)?,
        disable: FeedDisableState {
            disabled_at,
            reason,
        },
    })
}

fn row_to_feed_state(row: &Row<'_>) -> rusqlite::Result<FeedPollState> {
    let last_error_type = match row.get::<_, Option<String>>(8)? {
        Some(s) => Some(
            ErrorKind::from_db_string(&s)
                .ok_or_else(|| corrupt(8, format!("unknown error kind '{}'", s)))?,
        ),
        None => None,
    };

    Ok(FeedPollState {
        source_id: row.get(0)?,
        feed_url: row.get(1)?,
        last_polled_at: opt_from_millis(row.get(2)?)?,
        last_success_at: opt_from_millis(row.get(3)?)?,
        last_etag: row.get(4)?,
        last_modified: row.get(5)?,
        last_item_count: row.get(6)?,
        consecutive_errors: row.get(7)?,
        last_error_type,
        last_error: row.get(9)?,
    })
}

impl HostStore for SqliteStorage {
    fn get_host_state(&self, host: &str) -> StorageResult<Option<HostState>> {
        let state = self
            .conn
            .query_row(
                "SELECT host, last_fetch_at, min_delay_ms, robots_txt, robots_fetched_at,
                        robots_ttl_secs, crawl_delay_ms, source_rate_limit_ms
                 FROM host_state WHERE host = ?1",
                params![host],
                row_to_host,
            )
            .optional()?;
        Ok(state)
    }

    fn save_host_state(&mut self, state: &HostState) -> StorageResult<()> {
        // last_fetch_at and min_delay_ms only move forward; claims and
        // penalties may have advanced them since the caller read the row.
        self.conn.execute(
            "INSERT INTO host_state (host, last_fetch_at, min_delay_ms, robots_txt,
                robots_fetched_at, robots_ttl_secs, crawl_delay_ms, source_rate_limit_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(host) DO UPDATE SET
                last_fetch_at = CASE
                    WHEN excluded.last_fetch_at IS NULL THEN host_state.last_fetch_at
                    WHEN host_state.last_fetch_at IS NULL THEN excluded.last_fetch_at
                    ELSE MAX(host_state.last_fetch_at, excluded.last_fetch_at)
                END,
                min_delay_ms = MAX(host_state.min_delay_ms, excluded.min_delay_ms),
                robots_txt = excluded.robots_txt,
                robots_fetched_at = excluded.robots_fetched_at,
                robots_ttl_secs = excluded.robots_ttl_secs,
                crawl_delay_ms = excluded.crawl_delay_ms,
                source_rate_limit_ms = excluded.source_rate_limit_ms",
            params![
                state.host,
                state.last_fetch_at.map(to_millis),
                state.min_delay.num_milliseconds(),
                state.robots_txt,
                state.robots_fetched_at.map(to_millis),
                state.robots_ttl.num_seconds(),
                state.crawl_delay.map(|d| d.num_milliseconds()),
                state.source_rate_limit.map(|d| d.num_milliseconds()),
            ],
        )?;
        Ok(())
    }

    fn penalize_host(
        &mut self,
        host: &str,
        retry_after: Option<Duration>,
    ) -> StorageResult<Duration> {
        let floor_ms = self.settings.host_floor.num_milliseconds();
        let ttl_secs = self.settings.robots_ttl.num_seconds();
        let retry_ms = retry_after.map_or(0, |r| r.num_milliseconds());

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO host_state (host, min_delay_ms, robots_ttl_secs)
             VALUES (?1, MAX(?2 * 2, ?3), ?4)
             ON CONFLICT(host) DO UPDATE SET
                min_delay_ms = MAX(host_state.min_delay_ms * 2, ?3)",
            params![host, floor_ms, retry_ms, ttl_secs],
        )?;
        let delay_ms: i64 = tx.query_row(
            "SELECT min_delay_ms FROM host_state WHERE host = ?1",
            params![host],
            |row| row.get(0),
        )?;
        tx.commit()?;
        Ok(Duration::milliseconds(delay_ms))
    }

    fn set_host_min_delay(&mut self, host: &str, delay: Duration) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO host_state (host, min_delay_ms, robots_ttl_secs)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(host) DO UPDATE SET min_delay_ms = excluded.min_delay_ms",
            params![
                host,
                delay.num_milliseconds(),
                self.settings.robots_ttl.num_seconds()
            ],
        )?;
        Ok(())
    }

    fn record_host_fetch(&mut self, host: &str, now: DateTime<Utc>) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO host_state (host, last_fetch_at, min_delay_ms, robots_ttl_secs)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(host) DO UPDATE SET last_fetch_at = excluded.last_fetch_at",
            params![
                host,
                to_millis(now),
                self.settings.host_floor.num_milliseconds(),
                self.settings.robots_ttl.num_seconds()
            ],
        )?;
        Ok(())
    }
}

impl FeedStateStore for SqliteStorage {
    fn get_or_create_feed_state(
        &mut self,
        source_id: &str,
        feed_url: &str,
    ) -> StorageResult<FeedPollState> {
        self.conn.execute(
            "INSERT INTO feed_state (source_id, feed_url) VALUES (?1, ?2)
             ON CONFLICT(source_id) DO UPDATE SET feed_url = excluded.feed_url",
            params![source_id, feed_url],
        )?;

        let state = self.conn.query_row(
            "SELECT source_id, feed_url, last_polled_at, last_success_at, last_etag,
                    last_modified, last_item_count, consecutive_errors, last_error_type, last_error
             FROM feed_state WHERE source_id = ?1",
            params![source_id],
            row_to_feed_state,
        )?;
        Ok(state)
    }

    fn record_poll_success(
        &mut self,
        source_id: &str,
        now: DateTime<Utc>,
        etag: Option<&str>,
        last_modified: Option<&str>,
        item_count: Option<u32>,
    ) -> StorageResult<()> {
        let now_ms = to_millis(now);
        let updated = self.conn.execute(
            "UPDATE feed_state SET last_polled_at = ?1,
                last_success_at = ?1,
                last_etag = COALESCE(?2, last_etag),
                last_modified = COALESCE(?3, last_modified),
                last_item_count = COALESCE(?4, last_item_count),
                consecutive_errors = 0,
                last_error_type = NULL,
                last_error = NULL
             WHERE source_id = ?5",
            params![now_ms, etag, last_modified, item_count, source_id],
        )?;
        if updated == 0 {
            return Err(StorageError::UnknownSource(source_id.to_string()));
        }
        Ok(())
    }

    fn record_poll_failure(
        &mut self,
        source_id: &str,
        now: DateTime<Utc>,
        error: &TypedError,
        counts_toward_disable: bool,
    ) -> StorageResult<u32> {
        let increment: u32 = if counts_toward_disable { 1 } else { 0 };
        let updated = self.conn.execute(
            "UPDATE feed_state SET last_polled_at = ?1,
                consecutive_errors = consecutive_errors + ?2,
                last_error_type = ?3,
                last_error = ?4
             WHERE source_id = ?5",
            params![
                to_millis(now),
                increment,
                error.kind.to_db_string(),
                error.cause,
                source_id
            ],
        )?;
        if updated == 0 {
            return Err(StorageError::UnknownSource(source_id.to_string()));
        }

        let count: u32 = self.conn.query_row(
            "SELECT consecutive_errors FROM feed_state WHERE source_id = ?1",
            params![source_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

impl AdaptiveStore for SqliteStorage {
    fn get_adaptive_state(&self, source_id: &str) -> StorageResult<Option<AdaptiveState>> {
        let state = self
            .conn
            .query_row(
                "SELECT source_id, last_hash, last_change_at, unchanged_count, current_interval_secs
                 FROM adaptive_state WHERE source_id = ?1",
                params![source_id],
                |row| {
                    Ok(AdaptiveState {
                        source_id: row.get(0)?,
                        last_hash: row.get(1)?,
                        last_change_at: from_millis(row.get(2)?)?,
                        unchanged_count: row.get(3)?,
                        current_interval: Duration::seconds(row.get(4)?),
                    })
                },
            )
            .optional()?;
        Ok(state)
    }

    fn save_adaptive_state(
        &mut self,
        state: &AdaptiveState,
        now: DateTime<Utc>,
    ) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO adaptive_state (source_id, last_hash, last_change_at, unchanged_count,
                current_interval_secs, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(source_id) DO UPDATE SET
                last_hash = excluded.last_hash,
                last_change_at = excluded.last_change_at,
                unchanged_count = excluded.unchanged_count,
                current_interval_secs = excluded.current_interval_secs,
                updated_at = excluded.updated_at",
            params![
                state.source_id,
                state.last_hash,
                to_millis(state.last_change_at),
                state.unchanged_count,
                state.current_interval.num_seconds(),
                to_millis(now)
            ],
        )?;
        Ok(())
    }
}

impl SourceStore for SqliteStorage {
    fn upsert_source(&mut self, source: &SourceRecord, now: DateTime<Utc>) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO sources (id, name, feed_url, base_url, poll_interval_secs, adaptive,
                rate_limit_ms, base_priority, strip_trailing_slash, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?10, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                feed_url = COALESCE(excluded.feed_url, sources.feed_url),
                base_url = excluded.base_url,
                poll_interval_secs = excluded.poll_interval_secs,
                adaptive = excluded.adaptive,
                rate_limit_ms = excluded.rate_limit_ms,
                base_priority = excluded.base_priority,
                strip_trailing_slash = excluded.strip_trailing_slash,
                updated_at = excluded.updated_at",
            params![
                source.id,
                source.name,
                source.feed_url,
                source.poll_interval.num_seconds(),
                source.adaptive,
                source.rate_limit.map(|d| d.num_milliseconds()),
                source.base_priority,
                source.strip_trailing_slash,
                to_millis(now),
                source.base_url,
            ],
        )?;
        Ok(())
    }

    fn get_source(&self, source_id: &str) -> StorageResult<Option<SourceRecord>> {
        let source = self
            .conn
            .query_row(
                &format!("SELECT {} FROM sources s WHERE s.id = ?1", SOURCE_COLUMNS),
                params![source_id],
                row_to_source,
            )
            .optional()?;
        Ok(source)
    }

    fn list_sources(&self) -> StorageResult<Vec<SourceRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {} FROM sources s ORDER BY s.id", SOURCE_COLUMNS))?;
        let sources = stmt
            .query_map([], row_to_source)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sources)
    }

    fn list_undiscovered_sources(
        &self,
        now: DateTime<Utc>,
        retry_after: Duration,
    ) -> StorageResult<Vec<SourceRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM sources s
             WHERE s.feed_url IS NULL AND s.base_url IS NOT NULL AND s.disabled_at IS NULL
               AND (s.discovery_attempted_at IS NULL OR s.discovery_attempted_at <= ?1)
             ORDER BY s.id",
            SOURCE_COLUMNS
        ))?;
        let sources = stmt
            .query_map(params![to_millis(now - retry_after)], row_to_source)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sources)
    }

    fn record_discovery_attempt(
        &mut self,
        source_id: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<()> {
        let updated = self.conn.execute(
            "UPDATE sources SET discovery_attempted_at = ?1 WHERE id = ?2",
            params![to_millis(now), source_id],
        )?;
        if updated == 0 {
            return Err(StorageError::UnknownSource(source_id.to_string()));
        }
        Ok(())
    }

    fn update_feed_url(&mut self, source_id: &str, feed_url: &str) -> StorageResult<()> {
        let updated = self.conn.execute(
            "UPDATE sources SET feed_url = ?1 WHERE id = ?2",
            params![feed_url, source_id],
        )?;
        if updated == 0 {
            return Err(StorageError::UnknownSource(source_id.to_string()));
        }
        Ok(())
    }
}

impl SourceRegistry for SqliteStorage {
    fn disable_feed(
        &mut self,
        source_id: &str,
        reason: DisableReason,
        now: DateTime<Utc>,
    ) -> StorageResult<()> {
        let updated = self.conn.execute(
            "UPDATE sources SET disabled_at = ?1, disable_reason = ?2, updated_at = ?1
             WHERE id = ?3",
            params![to_millis(now), reason.to_db_string(), source_id],
        )?;
        if updated == 0 {
            return Err(StorageError::UnknownSource(source_id.to_string()));
        }
        Ok(())
    }

    fn enable_feed(&mut self, source_id: &str) -> StorageResult<()> {
        let updated = self.conn.execute(
            "UPDATE sources SET disabled_at = NULL, disable_reason = NULL WHERE id = ?1",
            params![source_id],
        )?;
        if updated == 0 {
            return Err(StorageError::UnknownSource(source_id.to_string()));
        }
        self.conn.execute(
            "UPDATE feed_state SET consecutive_errors = 0 WHERE source_id = ?1",
            params![source_id],
        )?;
        Ok(())
    }

    fn disable_state(&self, source_id: &str) -> StorageResult<FeedDisableState> {
        self.get_source(source_id)?
            .map(|source| source.disable)
            .ok_or_else(|| StorageError::UnknownSource(source_id.to_string()))
    }

    fn list_due_sources(&self, now: DateTime<Utc>) -> StorageResult<Vec<SourceRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {}, f.last_polled_at, a.current_interval_secs
             FROM sources s
             LEFT JOIN feed_state f ON f.source_id = s.id
             LEFT JOIN adaptive_state a ON a.source_id = s.id
             WHERE s.feed_url IS NOT NULL
             ORDER BY s.id",
            SOURCE_COLUMNS
        ))?;

        let rows = stmt
            .query_map([], |row| {
                let source = row_to_source(row)?;
                let last_polled_at = opt_from_millis(row.get(11)?)?;
                let adaptive_interval = row.get::<_, Option<i64>>(12)?.map(Duration::seconds);
                Ok((source, last_polled_at, adaptive_interval))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let due = rows
            .into_iter()
            .filter(|(source, last_polled_at, adaptive_interval)| {
                if !source.disable.allows_poll(now) {
                    return false;
                }
                let interval = match adaptive_interval {
                    Some(interval) if source.adaptive => *interval,
                    _ => source.poll_interval,
                };
                match last_polled_at {
                    Some(last) => *last + interval <= now,
                    None => true,
                }
            })
            .map(|(source, _, _)| source)
            .collect();

        Ok(due)
    }
}
