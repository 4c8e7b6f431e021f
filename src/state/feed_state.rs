use crate::poll::{cooldown_for, ErrorKind};
use chrono::{DateTime, Utc};
use std::fmt;

/// Poll bookkeeping for one feed source
///
/// Created on the first poll attempt and owned by the feed poller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedPollState {
    pub source_id: String,
    pub feed_url: String,
    pub last_polled_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_etag: Option<String>,
    pub last_modified: Option<String>,
    pub last_item_count: Option<u32>,

    /// Classified failures since the last success (RateLimited excluded)
    pub consecutive_errors: u32,
    pub last_error_type: Option<ErrorKind>,
    pub last_error: Option<String>,
}

impl FeedPollState {
    pub fn new(source_id: impl Into<String>, feed_url: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            feed_url: feed_url.into(),
            last_polled_at: None,
            last_success_at: None,
            last_etag: None,
            last_modified: None,
            last_item_count: None,
            consecutive_errors: 0,
            last_error_type: None,
            last_error: None,
        }
    }
}

/// Why a source was disabled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisableReason {
    /// Disabled by the controller after repeated failures of one kind
    Auto(ErrorKind),

    /// Disabled by an operator; never expires on its own
    Manual,
}

impl DisableReason {
    /// Converts the reason to its database representation
    ///
    /// Automatic reasons are stored as the error kind, manual ones as `manual`.
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Auto(kind) => kind.to_db_string(),
            Self::Manual => "manual",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "manual" => Some(Self::Manual),
            other => ErrorKind::from_db_string(other).map(Self::Auto),
        }
    }

    pub fn is_manual(&self) -> bool {
        matches!(self, Self::Manual)
    }
}

impl fmt::Display for DisableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}

/// Disable bookkeeping for one source
///
/// A source with `disabled_at` set is excluded from scheduling until its
/// cooldown elapses, after which it gets exactly one probe poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeedDisableState {
    pub disabled_at: Option<DateTime<Utc>>,
    pub reason: Option<DisableReason>,
}

impl FeedDisableState {
    pub fn active() -> Self {
        Self::default()
    }

    pub fn disabled(reason: DisableReason, at: DateTime<Utc>) -> Self {
        Self {
            disabled_at: Some(at),
            reason: Some(reason),
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled_at.is_some()
    }

    /// When the source becomes due for a probe, if ever
    ///
    /// Returns `None` for active sources, manual disables and reasons
    /// without a cooldown.
    pub fn cooldown_until(&self) -> Option<DateTime<Utc>> {
        match (self.disabled_at, self.reason) {
            (Some(at), Some(DisableReason::Auto(kind))) => cooldown_for(kind).map(|c| at + c),
            _ => None,
        }
    }

    /// Checks whether the source may be scheduled at `now`
    ///
    /// Active sources always may; disabled ones only once their cooldown has
    /// elapsed (the probe).
    pub fn allows_poll(&self, now: DateTime<Utc>) -> bool {
        if !self.is_disabled() {
            return true;
        }
        match self.cooldown_until() {
            Some(until) => until <= now,
            None => false,
        }
    }
}
