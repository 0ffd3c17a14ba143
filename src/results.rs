//! Append-only result log.
//!
//! Every resolved item leaves exactly one [`LogEntry`]. Counters shown to the
//! user are derived from the log rather than tracked separately, so the two
//! can never disagree.

use serde::{Deserialize, Serialize};

use crate::models::{LogEntry, LogStatus, Summary};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultLog {
    entries: Vec<LogEntry>,
}

impl ResultLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, entry: LogEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Only ever called on explicit user request.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn count(&self, status: LogStatus) -> usize {
        self.entries.iter().filter(|e| e.status == status).count()
    }

    /// The last `n` entries, oldest first.
    pub fn recent(&self, n: usize) -> &[LogEntry] {
        let start = self.entries.len().saturating_sub(n);
        &self.entries[start..]
    }

    pub fn summary(&self, total: usize) -> Summary {
        Summary {
            total,
            success: self.count(LogStatus::Success),
            failed: self.count(LogStatus::Failed),
            skipped: self.count(LogStatus::Skip),
        }
    }

    /// Plain-text export, one line per entry.
    pub fn export_text(&self) -> String {
        self.entries
            .iter()
            .map(LogEntry::to_line)
            .collect::<Vec<_>>()
            .join("\n")
    }
}
