//! Structured-text merger.
//!
//! Applies an [`UpdateSet`] to an item without disturbing unrelated content:
//! scalar updates rewrite the matching `|key= value` line in place (or insert
//! a new line), tag updates produce an ordered, duplicate-free sequence, and
//! a default change summary is synthesized from the three update kinds.
//!
//! Two text layouts are supported:
//!
//! | Layout | New fields go… |
//! |--------|----------------|
//! | [`TextLayout::Template`] | before the first `}}` line; `}}` is synthesized if missing |
//! | [`TextLayout::Plain`] | before the first blank line, otherwise at the end |

use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::{ItemState, MergeResult, UpdateSet};

/// Placeholder summary when nothing changed.
pub const NO_CHANGES: &str = "no changes";

const CLOSING_DELIMITER: &str = "}}";

/// Whitespace allowed around `|`, the key and `=` within one line.
/// Shared with the no-op check so both agree on what a field line is.
pub(crate) const INLINE_SPACE: &str = r"[\s&&[^\r\n]]*";

/// Where newly introduced fields are placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextLayout {
    #[default]
    Template,
    Plain,
}

/// Merge `updates` into a fresh copy of `item`'s text, tags and flags.
pub fn merge(item: &ItemState, updates: &UpdateSet, layout: TextLayout) -> MergeResult {
    MergeResult {
        text: apply_field_updates(&item.text, &updates.scalar, layout),
        tags: apply_tag_updates(&item.tags, &updates.tag_add, &updates.tag_remove),
        flags: apply_flag_updates(&item.flags, &updates.flags),
        default_message: default_message(updates),
    }
}

/// Turn the two-character `\n` escape into a real line break.
pub fn unescape_value(value: &str) -> String {
    value.replace("\\n", "\n")
}

/// Rewrite or insert `|key= value` lines. Untouched lines are kept verbatim.
pub fn apply_field_updates(text: &str, updates: &[(String, String)], layout: TextLayout) -> String {
    if updates.is_empty() {
        return text.to_string();
    }

    let mut lines: Vec<String> = if text.is_empty() {
        Vec::new()
    } else {
        text.split('\n').map(String::from).collect()
    };
    let mut pending: Vec<String> = Vec::new();

    for (key, value) in updates {
        let value = unescape_value(value);
        match find_field(&lines, key) {
            Some((start, end)) => {
                let line = &lines[start];
                let crlf = line.ends_with('\r');
                let prefix = match line.find('=') {
                    Some(pos) => line[..=pos].to_string(),
                    None => format!("|{}=", key),
                };
                let mut replacement = render_field(&prefix, &value);
                if crlf {
                    for l in &mut replacement {
                        l.push('\r');
                    }
                }
                lines.splice(start..end, replacement);
            }
            None => pending.extend(render_field(&format!("|{}=", key), &value)),
        }
    }

    if !pending.is_empty() {
        insert_fields(&mut lines, pending, layout);
    }

    lines.join("\n")
}

fn render_field(prefix: &str, value: &str) -> Vec<String> {
    let mut parts = value.split('\n');
    let first = parts.next().unwrap_or_default();
    let mut out = vec![format!("{} {}", prefix, first)];
    out.extend(parts.map(String::from));
    out
}

fn insert_fields(lines: &mut Vec<String>, fields: Vec<String>, layout: TextLayout) {
    match layout {
        TextLayout::Template => {
            if let Some(pos) = lines.iter().position(|l| l.trim() == CLOSING_DELIMITER) {
                lines.splice(pos..pos, fields);
                return;
            }
            let mut block = fields;
            block.push(CLOSING_DELIMITER.to_string());
            let pos = trailing_insert_position(lines);
            lines.splice(pos..pos, block);
        }
        TextLayout::Plain => {
            let pos = lines
                .iter()
                .position(|l| l.trim().is_empty())
                .unwrap_or(lines.len());
            lines.splice(pos..pos, fields);
        }
    }
}

/// End of the text, but ahead of a trailing newline.
fn trailing_insert_position(lines: &[String]) -> usize {
    match lines.last() {
        Some(last) if last.is_empty() && lines.len() > 1 => lines.len() - 1,
        _ => lines.len(),
    }
}

/// Line span `[start, end)` holding field `key`, if present.
///
/// A value opening with `{` that does not close on the same line extends to
/// the next line consisting of a lone `}`.
fn find_field(lines: &[String], key: &str) -> Option<(usize, usize)> {
    let re = Regex::new(&format!(
        r"(?i)^{sp}\|{sp}{key}{sp}=",
        sp = INLINE_SPACE,
        key = regex::escape(key)
    ))
    .ok()?;
    let start = lines.iter().position(|l| re.is_match(l))?;

    let value = lines[start]
        .split_once('=')
        .map(|(_, v)| v.trim())
        .unwrap_or_default();
    if value.starts_with('{') && !value.contains('}') {
        if let Some(offset) = lines[start + 1..].iter().position(|l| l.trim() == "}") {
            return Some((start, start + 1 + offset + 1));
        }
    }
    Some((start, start + 1))
}

/// `(tags ∪ add) \ remove`, keeping first-seen order.
pub fn apply_tag_updates(tags: &[String], add: &[String], remove: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len() + add.len());
    for tag in tags.iter().chain(add) {
        if !out.contains(tag) {
            out.push(tag.clone());
        }
    }
    out.retain(|t| !remove.contains(t));
    out
}

fn apply_flag_updates(
    flags: &BTreeMap<String, bool>,
    updates: &BTreeMap<String, bool>,
) -> BTreeMap<String, bool> {
    let mut out = flags.clone();
    for (name, value) in updates {
        out.insert(name.clone(), *value);
    }
    out
}

/// Human-readable summary of an update set.
pub fn default_message(updates: &UpdateSet) -> String {
    let mut segments = Vec::new();
    if !updates.scalar.is_empty() {
        segments.push(format!("updated: {}", updates.field_names().join(", ")));
    }
    if !updates.tag_add.is_empty() {
        segments.push(format!("added tags: {}", updates.tag_add.join(", ")));
    }
    if !updates.tag_remove.is_empty() {
        segments.push(format!("removed tags: {}", updates.tag_remove.join(", ")));
    }
    if !updates.flags.is_empty() {
        let flags = updates
            .flags
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join(", ");
        segments.push(format!("flag changed: {}", flags));
    }

    if segments.is_empty() {
        NO_CHANGES.to_string()
    } else {
        segments.join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn scalar(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_replace_in_place_preserves_other_lines() {
        let text = "{{Infobox animanga/TVAnime\n|中文名= 某\n|type= TV\n|episodes= 12\n}}\nfree text";
        let out = apply_field_updates(text, &scalar(&[("TYPE", "Movie")]), TextLayout::Template);
        let before: Vec<&str> = text.split('\n').collect();
        let after: Vec<&str> = out.split('\n').collect();
        assert_eq!(before.len(), after.len());
        for (i, (b, a)) in before.iter().zip(&after).enumerate() {
            if i == 2 {
                assert_eq!(*a, "|type= Movie");
            } else {
                assert_eq!(b, a);
            }
        }
    }

    #[test]
    fn test_replace_tolerates_spacing() {
        let out = apply_field_updates("  | type = TV", &scalar(&[("type", "OVA")]), TextLayout::Plain);
        assert_eq!(out, "  | type = OVA");
    }

    #[test]
    fn test_insert_before_closing_delimiter() {
        let text = "{{Infobox\n|type= TV\n}}";
        let out = apply_field_updates(
            text,
            &scalar(&[("episodes", "12"), ("studio", "X")]),
            TextLayout::Template,
        );
        assert_eq!(out, "{{Infobox\n|type= TV\n|episodes= 12\n|studio= X\n}}");
    }

    #[test]
    fn test_synthesizes_closing_delimiter() {
        let out = apply_field_updates("{{Infobox\n|type= TV\n", &scalar(&[("a", "1")]), TextLayout::Template);
        assert_eq!(out, "{{Infobox\n|type= TV\n|a= 1\n}}\n");

        let empty = apply_field_updates("", &scalar(&[("a", "1"), ("b", "2")]), TextLayout::Template);
        assert_eq!(empty, "|a= 1\n|b= 2\n}}");
    }

    #[test]
    fn test_plain_layout_inserts_before_blank_line() {
        let text = "|type= TV\n\nSummary paragraph.";
        let out = apply_field_updates(text, &scalar(&[("episodes", "12")]), TextLayout::Plain);
        assert_eq!(out, "|type= TV\n|episodes= 12\n\nSummary paragraph.");

        let no_blank = apply_field_updates("|type= TV", &scalar(&[("episodes", "12")]), TextLayout::Plain);
        assert_eq!(no_blank, "|type= TV\n|episodes= 12");
    }

    #[test]
    fn test_escaped_newline_becomes_line_break() {
        let out = apply_field_updates("{{X\n}}", &scalar(&[("aliases", "a\\nb")]), TextLayout::Template);
        assert_eq!(out, "{{X\n|aliases= a\nb\n}}");
    }

    #[test]
    fn test_multiline_braced_value_replaced_whole() {
        let text = "{{X\n|别名={\n[a]\n[b]\n}\n|type= TV\n}}";
        let out = apply_field_updates(text, &scalar(&[("别名", "c")]), TextLayout::Template);
        assert_eq!(out, "{{X\n|别名= c\n|type= TV\n}}");
    }

    #[test]
    fn test_crlf_line_endings_preserved() {
        let text = "{{X\r\n|type= TV\r\n}}";
        let out = apply_field_updates(text, &scalar(&[("type", "OVA")]), TextLayout::Template);
        assert_eq!(out, "{{X\r\n|type= OVA\r\n}}");
    }

    #[test]
    fn test_tag_algebra() {
        let out = apply_tag_updates(&strings(&["old", "keep"]), &strings(&["newtag"]), &strings(&["old"]));
        assert_eq!(out, strings(&["keep", "newtag"]));

        let idempotent = apply_tag_updates(&strings(&["a", "b"]), &strings(&["a", "c", "c"]), &[]);
        assert_eq!(idempotent, strings(&["a", "b", "c"]));

        let deduped = apply_tag_updates(&strings(&["a", "a", "b"]), &[], &strings(&["zzz"]));
        assert_eq!(deduped, strings(&["a", "b"]));
    }

    #[test]
    fn test_default_message_segments() {
        let updates = UpdateSet {
            scalar: scalar(&[("type", "TV"), ("episodes", "12")]),
            tag_add: strings(&["new"]),
            tag_remove: strings(&["old"]),
            flags: BTreeMap::from([("series".to_string(), true)]),
        };
        assert_eq!(
            default_message(&updates),
            "updated: type, episodes; added tags: new; removed tags: old; flag changed: series=true"
        );
        assert_eq!(default_message(&UpdateSet::default()), NO_CHANGES);

        let tags_only = UpdateSet {
            tag_add: strings(&["x"]),
            ..UpdateSet::default()
        };
        assert_eq!(default_message(&tags_only), "added tags: x");
    }

    #[test]
    fn test_merge_does_not_touch_input() {
        let item = ItemState {
            id: "1".into(),
            name: "One".into(),
            text: "|type= TV".into(),
            tags: strings(&["a"]),
            flags: BTreeMap::new(),
            fetched_at: Utc::now(),
        };
        let snapshot = item.clone();
        let updates = UpdateSet {
            scalar: scalar(&[("type", "OVA")]),
            tag_add: strings(&["b"]),
            tag_remove: Vec::new(),
            flags: BTreeMap::from([("series".to_string(), true)]),
        };
        let result = merge(&item, &updates, TextLayout::Plain);
        assert_eq!(item, snapshot);
        assert_eq!(result.text, "|type= OVA");
        assert_eq!(result.tags, strings(&["a", "b"]));
        assert_eq!(result.flags.get("series"), Some(&true));
        assert_eq!(result.default_message, "updated: type; added tags: b; flag changed: series=true");
    }
}
