//! Run progress reporting.
//!
//! Reports where a `wbatch run` is: which item is being fetched, how each item
//! was resolved, retries, pauses and the final counts. Progress is emitted on
//! **stderr** so stdout remains parseable for scripts, and is independent of
//! the `tracing` log stream.

use std::io::Write;

use crate::models::{LogStatus, Summary};

/// A single progress event for a batch run.
#[derive(Clone, Debug, PartialEq)]
pub enum BatchProgressEvent {
    /// Item `n` (1-based) of `total` is being fetched.
    ItemStarted { id: String, n: usize, total: usize },
    ItemResolved {
        id: String,
        name: String,
        status: LogStatus,
        message: String,
    },
    /// An automatic retry is scheduled.
    Retrying { id: String, attempt: u32, cap: u32 },
    /// The run is held and waiting for a human.
    Paused { id: Option<String>, reason: String },
    Completed(Summary),
}

/// Reports run progress. Implementations write to stderr (human or JSON).
pub trait BatchProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the controller loop.
    fn report(&self, event: BatchProgressEvent);
}

/// Human-friendly progress on stderr: "run  item 12 / 1,500  (id 3456)".
pub struct StderrProgress;

impl BatchProgressReporter for StderrProgress {
    fn report(&self, event: BatchProgressEvent) {
        let line = human_line(&event);
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

fn human_line(event: &BatchProgressEvent) -> String {
    match event {
        BatchProgressEvent::ItemStarted { id, n, total } => format!(
            "run  item {} / {}  (id {})\n",
            format_number(*n as u64),
            format_number(*total as u64),
            id
        ),
        BatchProgressEvent::ItemResolved {
            id,
            name,
            status,
            message,
        } => format!("run  [{}] {} ({}): {}\n", status, name, id, message),
        BatchProgressEvent::Retrying { id, attempt, cap } => {
            format!("run  retrying {}  attempt {} of {}\n", id, attempt + 1, cap)
        }
        BatchProgressEvent::Paused { id, reason } => match id {
            Some(id) => format!("run  paused at {}: {}\n", id, reason),
            None => format!("run  paused: {}\n", reason),
        },
        BatchProgressEvent::Completed(summary) => format!(
            "run  done  {} items: {} success, {} failed, {} skipped\n",
            format_number(summary.total as u64),
            format_number(summary.success as u64),
            format_number(summary.failed as u64),
            format_number(summary.skipped as u64)
        ),
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl BatchProgressReporter for JsonProgress {
    fn report(&self, event: BatchProgressEvent) {
        let obj = json_event(&event);
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

fn json_event(event: &BatchProgressEvent) -> serde_json::Value {
    match event {
        BatchProgressEvent::ItemStarted { id, n, total } => serde_json::json!({
            "event": "progress",
            "phase": "fetching",
            "id": id,
            "n": n,
            "total": total
        }),
        BatchProgressEvent::ItemResolved {
            id,
            name,
            status,
            message,
        } => serde_json::json!({
            "event": "resolved",
            "id": id,
            "name": name,
            "status": status,
            "message": message
        }),
        BatchProgressEvent::Retrying { id, attempt, cap } => serde_json::json!({
            "event": "retrying",
            "id": id,
            "attempt": attempt,
            "cap": cap
        }),
        BatchProgressEvent::Paused { id, reason } => serde_json::json!({
            "event": "paused",
            "id": id,
            "reason": reason
        }),
        BatchProgressEvent::Completed(summary) => serde_json::json!({
            "event": "completed",
            "total": summary.total,
            "success": summary.success,
            "failed": summary.failed,
            "skipped": summary.skipped
        }),
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl BatchProgressReporter for NoProgress {
    fn report(&self, _event: BatchProgressEvent) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn BatchProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
