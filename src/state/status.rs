//! Frontier entry status and discovery origin
use std::fmt;

/// Lifecycle status of a frontier entry
///
/// `pending → fetching → fetched | failed → pending (retry) | dead`.
/// `Failed` is only a transient label inside a completion; persisted rows go
/// straight back to `Pending` or on to `Dead`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrontierStatus {
    /// Waiting to be claimed once `next_fetch_at` has passed
    Pending,

    /// Claimed by a worker under a lease
    Fetching,

    /// Fetched successfully (terminal)
    Fetched,

    /// Fetch failed, about to be retried or declared dead
    Failed,

    /// Permanently given up on (terminal)
    Dead,
}

impl FrontierStatus {
    /// Returns true if the entry will never be fetched again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Fetched | Self::Dead)
    }

    /// Converts the status to its database representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Fetching => "fetching",
            Self::Fetched => "fetched",
            Self::Failed => "failed",
            Self::Dead => "dead",
        }
    }

    /// Parses a status from its database representation
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "fetching" => Some(Self::Fetching),
            "fetched" => Some(Self::Fetched),
            "failed" => Some(Self::Failed),
            "dead" => Some(Self::Dead),
            _ => None,
        }
    }

    /// All statuses, in lifecycle order
    pub fn all() -> [Self; 5] {
        [
            Self::Pending,
            Self::Fetching,
            Self::Fetched,
            Self::Failed,
            Self::Dead,
        ]
    }
}

impl fmt::Display for FrontierStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}

/// How a URL entered the frontier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    Feed,
    Sitemap,
    Spider,
    Manual,
}

impl Origin {
    /// Priority bonus granted to entries discovered through this origin
    pub fn priority_bonus(&self) -> i64 {
        match self {
            Self::Feed => 2,
            Self::Sitemap => 1,
            Self::Spider | Self::Manual => 0,
        }
    }

    /// Whether link depth counts against the priority of this origin
    pub fn penalizes_depth(&self) -> bool {
        matches!(self, Self::Spider)
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Feed => "feed",
            Self::Sitemap => "sitemap",
            Self::Spider => "spider",
            Self::Manual => "manual",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "feed" => Some(Self::Feed),
            "sitemap" => Some(Self::Sitemap),
            "spider" => Some(Self::Spider),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}
