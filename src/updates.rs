//! Update derivation.
//!
//! Computes the [`UpdateSet`] for one row against the live item: scalar field
//! updates for ordinary columns, tag additions/removals for the `tags` column,
//! and boolean flag updates for configured flag columns. Anything that already
//! matches the server state is dropped, so an item that is already up to date
//! yields an empty set.
//!
//! An empty cell means "no update requested" for every column kind.

use regex::Regex;

use crate::merge::{unescape_value, INLINE_SPACE};
use crate::models::{ItemState, RowRecord, UpdateSet};
use crate::tabular::ID_COLUMN;

/// Reserved column holding whitespace-separated tag tokens.
pub const TAGS_COLUMN: &str = "tags";

/// Column handling knobs that come from config and session state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeriveOptions {
    /// Columns interpreted as boolean flags (case-insensitive).
    pub flag_columns: Vec<String>,
    /// When non-empty, only these columns are considered.
    pub selected: Vec<String>,
}

impl DeriveOptions {
    /// Whether `column` is one of the configured flag columns.
    pub fn is_flag(&self, column: &str) -> bool {
        self.flag_columns
            .iter()
            .any(|c| c.eq_ignore_ascii_case(column))
    }

    fn is_selected(&self, column: &str) -> bool {
        self.selected.is_empty() || self.selected.iter().any(|c| c.eq_ignore_ascii_case(column))
    }
}

/// Derive the updates `row` asks for, relative to `item`.
pub fn derive(row: &RowRecord, item: &ItemState, opts: &DeriveOptions) -> UpdateSet {
    let mut updates = UpdateSet::default();
    let mut seen: Vec<&str> = Vec::new();

    for (column, raw) in &row.fields {
        if column.eq_ignore_ascii_case(ID_COLUMN) || !opts.is_selected(column) {
            continue;
        }
        let value = raw.trim();
        if value.is_empty() {
            continue;
        }

        if column.eq_ignore_ascii_case(TAGS_COLUMN) {
            derive_tags(value, &item.tags, &mut updates);
            continue;
        }
        // Keys match case-insensitively: the first spelling of a column
        // decides and later case variants are ignored.
        if seen.iter().any(|k| k.eq_ignore_ascii_case(column)) {
            continue;
        }
        seen.push(column);

        if opts.is_flag(column) {
            let name = column.to_lowercase();
            let wanted = parse_flag(value);
            if item.flag(&name) != wanted {
                updates.flags.insert(name, wanted);
            }
        } else if !field_matches(&item.text, column, value) {
            updates.scalar.push((column.clone(), value.to_string()));
        }
    }

    updates
}

fn derive_tags(value: &str, current: &[String], updates: &mut UpdateSet) {
    for token in value.split_whitespace() {
        if let Some(tag) = token.strip_prefix('-') {
            if tag.is_empty() {
                continue;
            }
            updates.tag_add.retain(|t| t != tag);
            if current.iter().any(|t| t == tag) && !updates.tag_remove.iter().any(|t| t == tag) {
                updates.tag_remove.push(tag.to_string());
            }
        } else {
            updates.tag_remove.retain(|t| t != token);
            if !current.iter().any(|t| t == token) && !updates.tag_add.iter().any(|t| t == token) {
                updates.tag_add.push(token.to_string());
            }
        }
    }
}

/// `true`, `1` and `yes` (any case) are true; everything else is false.
pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes"
    )
}

/// Whether `text` already carries `key = value` on its own line(s).
///
/// Case-insensitive and tolerant of surrounding whitespace. A value holding
/// escaped newlines is matched line by line.
pub fn field_matches(text: &str, key: &str, value: &str) -> bool {
    let value = unescape_value(value);
    let body = value
        .split('\n')
        .map(|line| regex::escape(line.trim_end_matches('\r')))
        .collect::<Vec<_>>()
        .join(format!(r"{sp}\r?\n{sp}", sp = INLINE_SPACE).as_str());
    let pattern = format!(
        r"(?im)^{sp}\|?{sp}{key}{sp}={sp}{body}{sp}\r?$",
        sp = INLINE_SPACE,
        key = regex::escape(key),
        body = body
    );
    match Regex::new(&pattern) {
        Ok(re) => re.is_match(text),
        Err(e) => {
            tracing::debug!(key, error = %e, "no-op pattern did not compile");
            false
        }
    }
}
