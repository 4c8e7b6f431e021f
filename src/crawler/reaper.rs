//! Periodic requeueing of expired claim leases

use crate::crawler::worker::wait_for_shutdown;
use crate::frontier::BackoffPolicy;
use crate::poll::TypedError;
use crate::storage::{FrontierStore, SqliteStorage};
use chrono::Utc;
use std::time::Duration;
use tokio::sync::watch;

/// Runs `reap_expired_leases` every `every` until shutdown
///
/// # Returns
///
/// The total number of entries reaped.
#[tracing::instrument(skip(storage, backoff, shutdown))]
pub async fn reaper_task(
    mut storage: SqliteStorage,
    every: Duration,
    max_retries: u32,
    backoff: BackoffPolicy,
    mut shutdown: watch::Receiver<bool>,
) -> usize {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut total = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = wait_for_shutdown(&mut shutdown) => break,
        }

        match storage.reap_expired_leases(Utc::now(), max_retries, &backoff) {
            Ok(0) => {}
            Ok(reaped) => {
                total += reaped;
                tracing::warn!(reaped, "Requeued entries with expired leases");
            }
            Err(e) => TypedError::internal(e.to_string()).log("Lease reaping failed", "frontier"),
        }
    }

    total
}
