//! Secondary indexes maintained in memory over the committed store.
//!
//! All indexes are rebuilt from the replayed map on startup and updated
//! inline on every `on_set`/`on_delete` call, which the store makes under
//! the same critical section as the map mutation they're derived from.

mod bm25;
mod tfidf;
mod tokenize;
mod value_index;

use std::collections::HashMap;

use serde_json::Value;

use crate::error::{Error, Result};
use bm25::InvertedIndex;
use tfidf::TfIdfIndex;
use value_index::ValueIndex;

pub struct IndexManager {
    value_indexes: HashMap<String, ValueIndex>,
    inverted: InvertedIndex,
    tfidf: TfIdfIndex,
}

impl IndexManager {
    pub fn new() -> Self {
        Self { value_indexes: HashMap::new(), inverted: InvertedIndex::new(), tfidf: TfIdfIndex::new() }
    }

    /// Creates a secondary index on `field`, backfilling it from `current`
    /// if it didn't already exist.
    pub fn create_value_index_from(&mut self, field: &str, current: &HashMap<String, Value>) {
        if self.value_indexes.contains_key(field) {
            return;
        }
        let mut index = ValueIndex::new(field);
        for (key, value) in current {
            index.add(key, value);
        }
        self.value_indexes.insert(field.to_string(), index);
    }

    pub fn on_set(&mut self, key: &str, value: &Value, old_value: Option<&Value>) {
        for index in self.value_indexes.values_mut() {
            if let Some(old) = old_value {
                index.remove(key, old);
            }
            index.add(key, value);
        }
        if old_value.is_some() {
            self.inverted.remove(key);
            self.tfidf.remove(key);
        }
        self.inverted.add(key, value);
        self.tfidf.add(key, value);
    }

    pub fn on_delete(&mut self, key: &str, value: &Value) {
        for index in self.value_indexes.values_mut() {
            index.remove(key, value);
        }
        self.inverted.remove(key);
        self.tfidf.remove(key);
    }

    pub fn query_value_index(&self, field: &str, value: &Value) -> Result<Vec<String>> {
        let index = self.value_indexes.get(field).ok_or_else(|| Error::NoSuchIndex(field.to_string()))?;
        Ok(index.query(value))
    }

    pub fn search(&self, query: &str, top_k: usize) -> Vec<(String, f64)> {
        self.inverted.search(query, top_k)
    }

    pub fn semantic_search(&self, query: &str, top_k: usize) -> Vec<(String, f64)> {
        self.tfidf.search(query, top_k)
    }
}
