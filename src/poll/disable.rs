//! Auto-disable and cooldown controller
//!
//! A source moves between `Active` and `Disabled(reason, since)`. Warn-level
//! failures of one kind accumulate until the kind's threshold disables the
//! source; once the kind's cooldown has elapsed the source gets one probe
//! poll. Error-level failures are logged and otherwise ignored here.

use crate::poll::{ErrorKind, Severity, TypedError};
use crate::state::{DisableReason, FeedDisableState};
use crate::storage::{SourceRecord, StorageResult};
use chrono::{DateTime, Duration, Utc};

/// Consecutive failures of a kind that disable a source
///
/// `None` means the kind never disables.
pub fn disable_threshold(kind: ErrorKind) -> Option<u32> {
    match kind {
        ErrorKind::NotFound => Some(3),
        ErrorKind::Gone => Some(1),
        ErrorKind::Forbidden => Some(5),
        ErrorKind::Upstream => Some(10),
        ErrorKind::Network => Some(10),
        ErrorKind::Parse => Some(5),
        ErrorKind::RateLimited | ErrorKind::Unexpected | ErrorKind::Internal => None,
    }
}

/// How long a source disabled for `kind` stays out of scheduling
pub fn cooldown_for(kind: ErrorKind) -> Option<Duration> {
    match kind {
        ErrorKind::NotFound => Some(Duration::hours(48)),
        ErrorKind::Gone => Some(Duration::hours(72)),
        ErrorKind::Forbidden => Some(Duration::hours(24)),
        ErrorKind::Upstream => Some(Duration::hours(6)),
        ErrorKind::Network => Some(Duration::hours(12)),
        ErrorKind::Parse => Some(Duration::hours(24)),
        ErrorKind::RateLimited | ErrorKind::Unexpected | ErrorKind::Internal => None,
    }
}

/// Source configuration as seen by the controller
///
/// Implementations persist the disable transitions; the controller never
/// touches source rows directly.
pub trait SourceRegistry {
    /// Marks the source disabled at `now`, replacing any earlier disable
    fn disable_feed(
        &mut self,
        source_id: &str,
        reason: DisableReason,
        now: DateTime<Utc>,
    ) -> StorageResult<()>;

    /// Clears the disable state of the source
    fn enable_feed(&mut self, source_id: &str) -> StorageResult<()>;

    /// Current disable state of the source
    fn disable_state(&self, source_id: &str) -> StorageResult<FeedDisableState>;

    /// Sources that should be polled at `now`
    ///
    /// Excludes sources still in cooldown, manually disabled sources and
    /// sources whose polling interval has not elapsed.
    fn list_due_sources(&self, now: DateTime<Utc>) -> StorageResult<Vec<SourceRecord>>;
}

/// What the controller did in response to a poll result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisableDecision {
    Unchanged,
    /// The failure pushed an active source over its threshold
    Disabled(DisableReason),
    /// A probe after cooldown failed
    Redisabled(DisableReason),
    /// A probe succeeded
    Enabled,
}

/// Feeds a classified poll failure into the controller
///
/// `consecutive_errors` is the count after this failure was recorded.
pub fn on_poll_failure<R: SourceRegistry + ?Sized>(
    registry: &mut R,
    source_id: &str,
    error: &TypedError,
    consecutive_errors: u32,
    now: DateTime<Utc>,
) -> StorageResult<DisableDecision> {
    if error.severity == Severity::Error {
        return Ok(DisableDecision::Unchanged);
    }

    let state = registry.disable_state(source_id)?;

    if state.is_disabled() {
        let previous = match state.reason {
            Some(DisableReason::Manual) | None => return Ok(DisableDecision::Unchanged),
            Some(reason) => reason,
        };
        let reason = match disable_threshold(error.kind) {
            Some(_) => DisableReason::Auto(error.kind),
            None => previous,
        };
        registry.disable_feed(source_id, reason, now)?;
        tracing::warn!(
            source = source_id,
            reason = %reason,
            "Probe after cooldown failed, source disabled again"
        );
        return Ok(DisableDecision::Redisabled(reason));
    }

    match disable_threshold(error.kind) {
        Some(threshold) if consecutive_errors >= threshold => {
            let reason = DisableReason::Auto(error.kind);
            registry.disable_feed(source_id, reason, now)?;
            tracing::warn!(
                source = source_id,
                reason = %reason,
                consecutive_errors,
                "Source auto-disabled"
            );
            Ok(DisableDecision::Disabled(reason))
        }
        _ => Ok(DisableDecision::Unchanged),
    }
}

/// Feeds a successful poll into the controller
///
/// A success on an automatically disabled source is a passed probe and
/// re-enables it.
pub fn on_poll_success<R: SourceRegistry + ?Sized>(
    registry: &mut R,
    source_id: &str,
) -> StorageResult<DisableDecision> {
    let state = registry.disable_state(source_id)?;
    match state.reason {
        Some(DisableReason::Auto(kind)) if state.is_disabled() => {
            registry.enable_feed(source_id)?;
            tracing::info!(source = source_id, previous = %kind, "Probe succeeded, source re-enabled");
            Ok(DisableDecision::Enabled)
        }
        _ => Ok(DisableDecision::Unchanged),
    }
}
