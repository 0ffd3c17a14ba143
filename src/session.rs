//! Session state that survives restarts.
//!
//! A [`Session`] is the snapshot a [`ProgressStore`](crate::traits::ProgressStore)
//! loads and saves: credential, dataset, column selection, position, result
//! log, commit-message lock, and the pointer to the last resolved item.
//! Per-item retry counters are deliberately absent; they live only in the
//! running state machine.

use crate::error::BatchError;
use crate::models::{RowRecord, Summary};
use crate::results::ResultLog;
use crate::tabular::Table;

/// A commit message pinned across items.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageLock {
    pub locked: bool,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub credential: String,
    pub rows: Vec<RowRecord>,
    pub columns: Vec<String>,
    pub selected_columns: Vec<String>,
    pub index: usize,
    pub results: ResultLog,
    pub message_lock: MessageLock,
    pub previous_item: Option<String>,
}

impl Session {
    pub fn total(&self) -> usize {
        self.rows.len()
    }

    pub fn current_row(&self) -> Option<&RowRecord> {
        self.rows.get(self.index)
    }

    pub fn summary(&self) -> Summary {
        self.results.summary(self.total())
    }

    /// Replace the dataset. Position, log and selection start over.
    pub fn load_dataset(&mut self, table: Table) {
        self.rows = table.rows;
        self.columns = table.columns;
        self.selected_columns.clear();
        self.reset_progress();
    }

    /// Start the current dataset over from the first row.
    pub fn reset_progress(&mut self) {
        self.index = 0;
        self.results.clear();
        self.previous_item = None;
    }

    /// Restrict derivation to `columns`. An empty list selects everything.
    /// Names match case-insensitively and are stored as spelled in the header.
    ///
    /// # Errors
    ///
    /// [`BatchError::Format`] when a name is not a column of the dataset.
    pub fn select_columns(&mut self, columns: Vec<String>) -> Result<(), BatchError> {
        let mut selected = Vec::with_capacity(columns.len());
        for column in &columns {
            let Some(known) = self
                .columns
                .iter()
                .find(|known| known.eq_ignore_ascii_case(column))
            else {
                return Err(BatchError::Format(format!(
                    "unknown column \"{}\" (available: {})",
                    column,
                    self.columns.join(", ")
                )));
            };
            if !selected.contains(known) {
                selected.push(known.clone());
            }
        }
        self.selected_columns = selected;
        Ok(())
    }

    pub fn lock_message(&mut self, message: impl Into<String>) {
        self.message_lock = MessageLock {
            locked: true,
            message: message.into(),
        };
    }

    pub fn unlock_message(&mut self) {
        self.message_lock.locked = false;
    }

    /// The message to propose for an item: the locked one when set,
    /// otherwise the synthesized summary.
    pub fn suggested_message(&self, default: &str) -> String {
        let lock = &self.message_lock;
        if lock.locked && !lock.message.trim().is_empty() {
            lock.message.clone()
        } else {
            default.to_string()
        }
    }
}
