//! Shared tokenization and text extraction for the full-text and semantic
//! indexes.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\p{L}\p{N}]+").unwrap());

/// Lowercases and splits text into runs of alphanumeric characters.
pub fn tokenize(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    WORD.find_iter(&lower).map(|m| m.as_str().to_string()).collect()
}

/// Extracts searchable text from a JSON value: strings as-is, objects as
/// the whitespace-concatenation of their string-valued fields, everything
/// else via its JSON string form.
pub fn extract_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .values()
            .filter_map(|v| v.as_str())
            .collect::<Vec<_>>()
            .join(" "),
        other => other.to_string(),
    }
}
