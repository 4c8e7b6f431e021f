//! Status reports for operators
//!
//! This module handles:
//! - Collecting frontier counts and per-source poll health
//! - Printing the report to stdout
//! - Writing it as a markdown summary

mod markdown;

pub use markdown::{format_markdown_report, write_markdown_report};

use crate::frontier::FrontierStats;
use crate::poll::ErrorKind;
use crate::state::DisableReason;
use crate::storage::{AdaptiveStore, FeedStateStore, FrontierStore, SourceStore, SqliteStorage};
use crate::CrawlError;
use chrono::{DateTime, Duration, Utc};

/// Poll health of one source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSummary {
    pub id: String,
    pub name: String,
    pub disabled_reason: Option<DisableReason>,
    pub disabled_at: Option<DateTime<Utc>>,

    /// When an automatic disable allows the next probe
    pub cooldown_until: Option<DateTime<Utc>>,
    pub consecutive_errors: u32,
    pub last_error_type: Option<ErrorKind>,
    pub last_polled_at: Option<DateTime<Utc>>,

    /// Interval the scheduler currently uses for this source
    pub effective_interval: Duration,

    /// No feed URL has been configured or discovered yet
    pub awaiting_feed: bool,
}

/// Everything the `stats` command shows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub generated_at: DateTime<Utc>,
    pub frontier: FrontierStats,
    pub sources: Vec<SourceSummary>,
}

impl StatusReport {
    pub fn disabled_sources(&self) -> usize {
        self.sources
            .iter()
            .filter(|s| s.disabled_reason.is_some())
            .count()
    }
}

/// Collects a report from the database
pub fn build_report(
    storage: &mut SqliteStorage,
    now: DateTime<Utc>,
) -> Result<StatusReport, CrawlError> {
    let frontier = storage.frontier_stats(now)?;

    let mut sources = Vec::new();
    for source in storage.list_sources()? {
        let poll = match &source.feed_url {
            Some(feed_url) => Some(storage.get_or_create_feed_state(&source.id, feed_url)?),
            None => None,
        };
        let adaptive = if source.adaptive {
            storage.get_adaptive_state(&source.id)?
        } else {
            None
        };
        let disabled = source.disable.is_disabled();

        sources.push(SourceSummary {
            effective_interval: adaptive.map_or(source.poll_interval, |a| a.current_interval),
            disabled_reason: if disabled { source.disable.reason } else { None },
            disabled_at: source.disable.disabled_at,
            cooldown_until: source.disable.cooldown_until(),
            consecutive_errors: poll.as_ref().map_or(0, |p| p.consecutive_errors),
            last_error_type: poll.as_ref().and_then(|p| p.last_error_type),
            last_polled_at: poll.and_then(|p| p.last_polled_at),
            awaiting_feed: source.feed_url.is_none(),
            id: source.id,
            name: source.name,
        });
    }

    Ok(StatusReport {
        generated_at: now,
        frontier,
        sources,
    })
}

/// Prints a report to stdout in a formatted manner
pub fn print_report(report: &StatusReport) {
    let stats = &report.frontier;
    println!("=== Frontier Status ({}) ===\n", report.generated_at.to_rfc3339());

    println!("Entries by status:");
    println!("  pending:  {} ({} due)", stats.pending, stats.due);
    println!("  fetching: {}", stats.fetching);
    println!("  fetched:  {}", stats.fetched);
    println!("  failed:   {}", stats.failed);
    println!("  dead:     {}", stats.dead);
    println!("  total:    {}", stats.total());
    println!();

    if report.sources.is_empty() {
        return;
    }

    println!(
        "Sources ({} configured, {} disabled):",
        report.sources.len(),
        report.disabled_sources()
    );
    for source in &report.sources {
        let state = match (&source.disabled_reason, source.cooldown_until) {
            (Some(reason), Some(until)) => {
                format!("disabled ({}) until {}", reason, until.to_rfc3339())
            }
            (Some(reason), None) => format!("disabled ({})", reason),
            (None, _) if source.awaiting_feed => "awaiting feed discovery".to_string(),
            (None, _) => "active".to_string(),
        };
        println!(
            "  {}: {}, every {}m, {} consecutive errors",
            source.id,
            state,
            source.effective_interval.num_minutes(),
            source.consecutive_errors
        );
    }
}
