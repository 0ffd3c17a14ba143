//! Core data models used throughout the batch engine.
//!
//! These types represent the rows read from the input dataset, the server
//! snapshot of an item, the changes derived between the two, and the outcome
//! records written as the run progresses.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// One input row, keyed by item identifier.
///
/// `fields` holds only the cells that were present in the row, in column
/// order. The identifier column is never part of `fields`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowRecord {
    pub id: String,
    pub fields: Vec<(String, String)>,
}

impl RowRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: Vec::new(),
        }
    }

    /// Builder-style helper used by tests and fixtures.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((column.into(), value.into()));
        self
    }

    /// Value of `column`, compared case-insensitively.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(column))
            .map(|(_, value)| value.as_str())
    }
}

/// Authoritative server copy of an item at fetch time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemState {
    pub id: String,
    pub name: String,
    /// The key-value block (`|key= value` lines plus optional delimiters).
    pub text: String,
    /// Ordered, duplicate-free.
    pub tags: Vec<String>,
    pub flags: BTreeMap<String, bool>,
    pub fetched_at: DateTime<Utc>,
}

impl ItemState {
    /// Current value of a flag; unknown flags read as `false`.
    pub fn flag(&self, name: &str) -> bool {
        self.flags.get(name).copied().unwrap_or(false)
    }
}

/// One entry of an item's edit history, most recent first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub created_at: DateTime<Utc>,
    pub creator: String,
    pub commit_message: String,
}

/// Changes requested for one item, after no-op suppression.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateSet {
    /// Field name to new value, in column order.
    pub scalar: Vec<(String, String)>,
    pub tag_add: Vec<String>,
    pub tag_remove: Vec<String>,
    pub flags: BTreeMap<String, bool>,
}

impl UpdateSet {
    pub fn is_empty(&self) -> bool {
        self.scalar.is_empty()
            && self.tag_add.is_empty()
            && self.tag_remove.is_empty()
            && self.flags.is_empty()
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.scalar.iter().map(|(k, _)| k.as_str()).collect()
    }
}

/// Candidate new state of an item, before human review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeResult {
    pub text: String,
    pub tags: Vec<String>,
    pub flags: BTreeMap<String, bool>,
    pub default_message: String,
}

/// The final payload handed to a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    pub text: String,
    pub tags: Vec<String>,
    pub flags: BTreeMap<String, bool>,
    pub message: String,
}

impl Patch {
    /// Whether submitting this patch would leave `item` unchanged.
    pub fn is_noop_for(&self, item: &ItemState) -> bool {
        normalize_newlines(&self.text) == normalize_newlines(&item.text)
            && self.tags == item.tags
            && self
                .flags
                .iter()
                .all(|(name, value)| item.flag(name) == *value)
    }
}

fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n")
}

/// Outcome recorded for an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Success,
    Failed,
    Skip,
}

impl fmt::Display for LogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LogStatus::Success => "success",
            LogStatus::Failed => "failed",
            LogStatus::Skip => "skip",
        };
        f.write_str(label)
    }
}

/// Append-only record of a resolved item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub id: String,
    pub name: String,
    pub status: LogStatus,
    pub message: String,
}

impl LogEntry {
    /// Export line: `timestamp [status] name (id): message`.
    pub fn to_line(&self) -> String {
        format!(
            "{} [{}] {} ({}): {}",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.status,
            self.name,
            self.id,
            self.message
        )
    }
}

/// How the controller treats each item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Every item waits for a human decision.
    #[default]
    Interactive,
    /// Items advance on their own unless flagged by the recency guard.
    Unattended,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Interactive => f.write_str("interactive"),
            ExecutionMode::Unattended => f.write_str("unattended"),
        }
    }
}

/// Final counts reported when a run completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
}
