//! Content-change driven re-poll intervals
//!
//! Each successful fetch of a source's anchor page is hashed. An unchanged
//! body doubles the polling interval up to a cap; a changed body resets it to
//! the source's baseline.

use crate::state::AdaptiveState;
use crate::storage::{AdaptiveStore, StorageResult};
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};

/// Default upper bound for adaptive intervals
pub const DEFAULT_MAX_INTERVAL_SECS: i64 = 24 * 60 * 60;

/// Computes `min(baseline * 2^unchanged_count, cap)` without overflowing
pub fn next_interval(baseline: Duration, unchanged_count: u32, cap: Duration) -> Duration {
    let scaled = 2i64
        .checked_pow(unchanged_count)
        .and_then(|factor| baseline.num_milliseconds().checked_mul(factor))
        .map(Duration::milliseconds);

    match scaled {
        Some(interval) => interval.min(cap),
        None => cap,
    }
}

/// SHA-256 hex digest of a response body
pub fn hash_body(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

/// Computes the next adaptive state from the previous one and a fresh hash
pub fn advance(
    previous: Option<&AdaptiveState>,
    source_id: &str,
    body_hash: &str,
    baseline: Duration,
    cap: Duration,
    now: DateTime<Utc>,
) -> AdaptiveState {
    match previous {
        Some(prev) if prev.last_hash == body_hash => {
            let unchanged_count = prev.unchanged_count.saturating_add(1);
            AdaptiveState {
                source_id: source_id.to_string(),
                last_hash: prev.last_hash.clone(),
                last_change_at: prev.last_change_at,
                unchanged_count,
                current_interval: next_interval(baseline, unchanged_count, cap),
            }
        }
        _ => AdaptiveState {
            source_id: source_id.to_string(),
            last_hash: body_hash.to_string(),
            last_change_at: now,
            unchanged_count: 0,
            current_interval: next_interval(baseline, 0, cap),
        },
    }
}

/// Records a successful anchor fetch and persists the new state
pub fn record_anchor_fetch<S: AdaptiveStore + ?Sized>(
    store: &mut S,
    source_id: &str,
    body: &[u8],
    baseline: Duration,
    cap: Duration,
    now: DateTime<Utc>,
) -> StorageResult<AdaptiveState> {
    let previous = store.get_adaptive_state(source_id)?;
    let next = advance(previous.as_ref(), source_id, &hash_body(body), baseline, cap, now);

    if next.unchanged_count == 0 {
        tracing::debug!(source = source_id, "Anchor content changed");
    } else {
        tracing::debug!(
            source = source_id,
            unchanged = next.unchanged_count,
            interval_secs = next.current_interval.num_seconds(),
            "Anchor content unchanged, backing off"
        );
    }

    store.save_adaptive_state(&next, now)?;
    Ok(next)
}

/// Records a 304 Not Modified on the anchor as an unchanged fetch
///
/// Does nothing when no state exists yet.
pub fn record_not_modified<S: AdaptiveStore + ?Sized>(
    store: &mut S,
    source_id: &str,
    baseline: Duration,
    cap: Duration,
    now: DateTime<Utc>,
) -> StorageResult<Option<AdaptiveState>> {
    let Some(previous) = store.get_adaptive_state(source_id)? else {
        return Ok(None);
    };
    let next = advance(
        Some(&previous),
        source_id,
        &previous.last_hash,
        baseline,
        cap,
        now,
    );
    store.save_adaptive_state(&next, now)?;
    Ok(Some(next))
}
