//! Session status overview.
//!
//! Shows where the persisted run stands: dataset size and position, outcome
//! counters, column selection, message lock, previous item and the most
//! recent log lines. Used by `wbatch status`.

use anyhow::Result;

use crate::config::Config;
use crate::session::Session;
use crate::store::SqliteStore;
use crate::traits::ProgressStore;

const RECENT_ENTRIES: usize = 5;

/// Run the status command: load the session and print a summary.
pub async fn run_status(config: &Config) -> Result<()> {
    let store = SqliteStore::open(&config.state.path).await?;
    let session = store.load().await?;
    store.close().await;

    print!("{}", render_status(config, &session));
    Ok(())
}

fn render_status(config: &Config, session: &Session) -> String {
    let summary = session.summary();
    let mut out = String::new();

    out.push_str("Wiki Batch Session Status\n");
    out.push_str("=========================\n\n");
    out.push_str(&format!("  State file:  {}\n", config.state.path.display()));
    out.push_str(&format!("  Mode:        {}\n", config.batch.mode));
    out.push_str(&format!(
        "  Progress:    {} / {} ({}%)\n",
        session.index.min(summary.total),
        summary.total,
        if summary.total > 0 {
            (session.index.min(summary.total) * 100) / summary.total
        } else {
            0
        }
    ));
    out.push_str(&format!(
        "  Results:     {} success, {} failed, {} skipped\n",
        summary.success, summary.failed, summary.skipped
    ));

    let selected = if session.selected_columns.is_empty() {
        "all".to_string()
    } else {
        session.selected_columns.join(", ")
    };
    out.push_str(&format!("  Columns:     {} (selected: {})\n", session.columns.join(", "), selected));

    let lock = &session.message_lock;
    if lock.locked {
        out.push_str(&format!("  Message:     locked to {:?}\n", lock.message));
    } else {
        out.push_str("  Message:     not locked\n");
    }
    out.push_str(&format!(
        "  Previous:    {}\n",
        session.previous_item.as_deref().unwrap_or("none")
    ));

    let recent = session.results.recent(RECENT_ENTRIES);
    if !recent.is_empty() {
        out.push_str("\n  Recent:\n");
        for entry in recent {
            out.push_str(&format!(
                "  {:<14} [{}] {} ({}): {}\n",
                format_ts_relative(entry.timestamp.timestamp()),
                entry.status,
                entry.name,
                entry.id,
                entry.message
            ));
        }
    }
    out.push('\n');
    out
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
