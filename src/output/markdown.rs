//! Markdown summary generation

use crate::output::StatusReport;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Writes a report as markdown to `output_path`
pub fn write_markdown_report(report: &StatusReport, output_path: &Path) -> std::io::Result<()> {
    let markdown = format_markdown_report(report);

    let mut file = File::create(output_path)?;
    file.write_all(markdown.as_bytes())?;

    Ok(())
}

/// Formats a report as markdown
pub fn format_markdown_report(report: &StatusReport) -> String {
    let stats = &report.frontier;
    let mut md = String::new();

    md.push_str("# Frontier Status\n\n");
    md.push_str(&format!(
        "- **Generated**: {}\n\n",
        report.generated_at.to_rfc3339()
    ));

    md.push_str("## Frontier\n\n");
    md.push_str("| Status | Count |\n");
    md.push_str("|--------|-------|\n");
    md.push_str(&format!("| Pending | {} |\n", stats.pending));
    md.push_str(&format!("| Pending (due) | {} |\n", stats.due));
    md.push_str(&format!("| Fetching | {} |\n", stats.fetching));
    md.push_str(&format!("| Fetched | {} |\n", stats.fetched));
    md.push_str(&format!("| Failed | {} |\n", stats.failed));
    md.push_str(&format!("| Dead | {} |\n", stats.dead));
    md.push_str(&format!("| **Total** | {} |\n\n", stats.total()));

    if report.sources.is_empty() {
        return md;
    }

    md.push_str("## Sources\n\n");
    md.push_str(&format!(
        "{} configured, {} disabled\n\n",
        report.sources.len(),
        report.disabled_sources()
    ));
    md.push_str("| Source | State | Interval (min) | Errors | Last Error | Last Polled |\n");
    md.push_str("|--------|-------|----------------|--------|------------|-------------|\n");

    for source in &report.sources {
        let state = match (&source.disabled_reason, source.cooldown_until) {
            (Some(reason), Some(until)) => {
                format!("disabled: {} until {}", reason, until.to_rfc3339())
            }
            (Some(reason), None) => format!("disabled: {}", reason),
            (None, _) => "active".to_string(),
        };
        md.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} |\n",
            source.name,
            state,
            source.effective_interval.num_minutes(),
            source.consecutive_errors,
            source
                .last_error_type
                .map(|k| k.to_string())
                .unwrap_or_else(|| "-".to_string()),
            source
                .last_polled_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "never".to_string()),
        ));
    }
    md.push('\n');

    md
}
