//! Encoding of the manifest `datatype` column.
//!
//! Datatype lists are written as JSON arrays (`["anat","dwi"]`). Manifests
//! produced by older tooling store a single-quoted list literal
//! (`['anat', 'dwi']`); those are accepted on read and rewritten as JSON.

use std::sync::OnceLock;

use regex::Regex;

fn quoted_item_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"^(?:'([^']*)'|"([^"]*)")$"#).ok())
        .as_ref()
}

/// Parses a datatype list cell. An empty cell is an empty list.
///
/// Returns `None` if the value is neither a JSON array of strings nor a
/// quoted list literal.
pub fn parse_datatype_list(value: &str) -> Option<Vec<String>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Some(Vec::new());
    }

    if let Ok(list) = serde_json::from_str::<Vec<String>>(trimmed) {
        return Some(list);
    }

    let inner = trimmed.strip_prefix('[')?.strip_suffix(']')?.trim();
    if inner.is_empty() {
        return Some(Vec::new());
    }

    inner
        .split(',')
        .map(|item| {
            let caps = quoted_item_regex()?.captures(item.trim())?;
            caps.get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str().to_string())
        })
        .collect()
}

/// Formats a datatype list as a JSON array.
pub fn format_datatype_list(datatypes: &[String]) -> String {
    serde_json::to_string(datatypes).unwrap_or_else(|_| "[]".to_string())
}
