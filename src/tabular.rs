//! Tabular input parser.
//!
//! Turns delimited text into [`RowRecord`]s keyed by the identifier column.
//! The dialect is intentionally small: comma-delimited, one record per line,
//! fields optionally wrapped in `"` or `'`, with a backslash before the active
//! quote character producing a literal quote. An unterminated quote swallows
//! the rest of the line into the current field.

use crate::error::BatchError;
use crate::models::RowRecord;

const DELIMITER: char = ',';

/// Name of the required identifier column (matched case-insensitively).
pub const ID_COLUMN: &str = "id";

/// Parsed dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    /// Data columns in header order, identifier column excluded.
    pub columns: Vec<String>,
    pub rows: Vec<RowRecord>,
}

/// Parse a dataset.
///
/// # Errors
///
/// Returns [`BatchError::Format`] if fewer than two non-empty lines remain,
/// if no header cell is named `id`, or if every row has an empty identifier.
pub fn parse(text: &str) -> Result<Table, BatchError> {
    let lines: Vec<&str> = text
        .split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    if lines.len() < 2 {
        return Err(BatchError::Format(
            "dataset needs a header line and at least one data line".to_string(),
        ));
    }

    let headers: Vec<String> = split_fields(lines[0])
        .into_iter()
        .map(|h| h.trim().to_string())
        .collect();

    let id_index = headers
        .iter()
        .position(|h| h.eq_ignore_ascii_case(ID_COLUMN))
        .ok_or_else(|| BatchError::Format("dataset has no \"id\" column".to_string()))?;

    let columns: Vec<String> = headers
        .iter()
        .enumerate()
        .filter(|(i, h)| *i != id_index && !h.is_empty())
        .map(|(_, h)| h.clone())
        .collect();

    let mut rows = Vec::new();
    for line in &lines[1..] {
        let values = split_fields(line);
        let id = values.get(id_index).map(|v| v.trim()).unwrap_or_default();
        if id.is_empty() {
            continue;
        }

        let mut row = RowRecord::new(id);
        for (i, header) in headers.iter().enumerate() {
            if i == id_index || header.is_empty() {
                continue;
            }
            if let Some(value) = values.get(i) {
                row.fields.push((header.clone(), value.trim().to_string()));
            }
        }
        rows.push(row);
    }

    if rows.is_empty() {
        return Err(BatchError::Format("no rows with a non-empty id".to_string()));
    }

    Ok(Table { columns, rows })
}

/// Split one line into raw (untrimmed) fields, honoring quotes.
pub fn split_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                if c == '\\' && chars.peek() == Some(&q) {
                    current.push(q);
                    chars.next();
                } else if c == q {
                    quote = None;
                } else {
                    current.push(c);
                }
            }
            None => {
                if (c == '"' || c == '\'') && current.trim().is_empty() {
                    current.clear();
                    quote = Some(c);
                } else if c == DELIMITER {
                    fields.push(std::mem::take(&mut current));
                } else {
                    current.push(c);
                }
            }
        }
    }

    fields.push(current);
    fields
}
