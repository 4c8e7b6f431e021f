//! Source polling: error classification, auto-disable and adaptive intervals
//!
//! A poll's completion path runs, in order: the classifier on failures,
//! the disable controller, and on success the adaptive interval calculator.
//! Sources configured with only a site URL get their feed found first.

mod adaptive;
mod classify;
mod disable;
mod discovery;
mod poller;

pub use adaptive::{
    advance, hash_body, next_interval, record_anchor_fetch, record_not_modified,
    DEFAULT_MAX_INTERVAL_SECS,
};
pub use classify::{
    classify, parse_retry_after, ErrorKind, RawOutcome, Severity, TransportFailure, TypedError,
};
pub use disable::{
    cooldown_for, disable_threshold, on_poll_failure, on_poll_success, DisableDecision,
    SourceRegistry,
};
pub use discovery::{
    feed_link_candidates, FeedDiscoverer, COMMON_FEED_PATHS, DEFAULT_DISCOVERY_RETRY_SECS,
};
pub use poller::{FeedFetcher, FeedParser, FeedPoller, PollResult};
