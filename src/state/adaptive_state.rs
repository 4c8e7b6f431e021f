use chrono::{DateTime, Duration, Utc};

/// Change-tracking state for an adaptive source
///
/// Created on the first successful anchor fetch of a source with adaptive
/// scheduling enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdaptiveState {
    pub source_id: String,

    /// SHA-256 hex of the last anchor body
    pub last_hash: String,
    pub last_change_at: DateTime<Utc>,

    /// Consecutive fetches that returned an identical body
    pub unchanged_count: u32,

    /// Interval the due-sources query applies to this source
    pub current_interval: Duration,
}
