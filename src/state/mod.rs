//! Durable scheduling state
//!
//! # Components
//!
//! - `FrontierStatus` / `Origin`: lifecycle and provenance of frontier entries
//! - `HostState`: per-host politeness and cached robots.txt
//! - `FeedPollState` / `FeedDisableState`: per-source poll bookkeeping and disable state
//! - `AdaptiveState`: per-source change tracking for adaptive re-polling

mod adaptive_state;
mod feed_state;
mod host_state;
mod status;

pub use adaptive_state::AdaptiveState;
pub use feed_state::{DisableReason, FeedDisableState, FeedPollState};
pub use host_state::{
    derive_min_delay, HostState, DEFAULT_HOST_FLOOR_SECS, DEFAULT_ROBOTS_TTL_SECS,
};
pub use status::{FrontierStatus, Origin};
