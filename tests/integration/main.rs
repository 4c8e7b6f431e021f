//! Integration tests for the frontier scheduler
//!
//! These tests run against file-backed SQLite databases and wiremock
//! servers, exercising the claim protocol, the fetch workers and the feed
//! poller end-to-end.

mod common;
mod frontier_tests;
mod poller_tests;
mod scheduler_tests;
mod worker_tests;
