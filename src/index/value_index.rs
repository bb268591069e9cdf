//! Exact-match secondary index on a named JSON field.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

/// A value that can serve as an index key. `serde_json::Value` isn't `Hash`,
/// so indexed values are keyed by their canonical JSON string form.
type IndexKey = String;

fn index_key(value: &Value) -> IndexKey {
    value.to_string()
}

/// Maps a field's value to the set of keys whose value carries it.
pub struct ValueIndex {
    field: String,
    index: HashMap<IndexKey, HashSet<String>>,
}

impl ValueIndex {
    pub fn new(field: impl Into<String>) -> Self {
        Self { field: field.into(), index: HashMap::new() }
    }

    /// The field value to index for `value`, or `None` if `value` doesn't
    /// carry this field (missing object field, or a non-object value when
    /// the field isn't the special `"_value"` sentinel).
    fn field_value<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        if self.field == "_value" {
            return Some(value);
        }
        value.as_object()?.get(&self.field)
    }

    pub fn add(&mut self, key: &str, value: &Value) {
        if let Some(field_value) = self.field_value(value) {
            self.index.entry(index_key(field_value)).or_default().insert(key.to_string());
        }
    }

    pub fn remove(&mut self, key: &str, value: &Value) {
        if let Some(field_value) = self.field_value(value) {
            let field_key = index_key(field_value);
            if let Some(keys) = self.index.get_mut(&field_key) {
                keys.remove(key);
                if keys.is_empty() {
                    self.index.remove(&field_key);
                }
            }
        }
    }

    pub fn query(&self, value: &Value) -> Vec<String> {
        self.index.get(&index_key(value)).map(|keys| keys.iter().cloned().collect()).unwrap_or_default()
    }
}
