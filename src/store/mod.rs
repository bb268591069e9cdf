//! In-memory key-value map backed by a durable write-ahead log.
//!
//! The map is the sole query target for reads; the log is write-only except
//! at startup. A single mutex guards the map and its co-located indexes so
//! they can never be observed out of sync with each other.

pub mod record;
pub mod wal;

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::index::IndexManager;
use record::Record;
use wal::Wal;

struct Inner {
    map: HashMap<String, Value>,
    indexes: IndexManager,
}

/// The durable store: an in-memory map, its secondary indexes, and the log
/// that makes every accepted mutation durable.
pub struct Store {
    inner: Mutex<Inner>,
    wal: Mutex<Wal>,
    /// Enables the simulated-failure diagnostic hook on writes. Defaults to
    /// false; the server binary never turns this on.
    pub allow_simulated_failures: bool,
}

impl Store {
    /// Opens the store at `path`, replaying the existing log (if any) into
    /// the in-memory map and rebuilding every index from the replayed state.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let wal = Wal::open(path)?;
        let mut map = HashMap::new();
        let mut indexes = IndexManager::new();
        for record in wal.replay()? {
            apply_record_to_map(&mut map, &record);
        }
        for (key, value) in &map {
            indexes.on_set(key, value, None);
        }
        Ok(Self {
            inner: Mutex::new(Inner { map, indexes }),
            wal: Mutex::new(wal),
            allow_simulated_failures: false,
        })
    }

    /// Looks up a key's current value.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.lock().unwrap().map.get(key).cloned()
    }

    /// Replaces (or creates) a key's value, returning the record to persist.
    pub fn set(&self, key: &str, value: Value) -> Record {
        let mut inner = self.inner.lock().unwrap();
        let old = inner.map.insert(key.to_string(), value.clone());
        inner.indexes.on_set(key, &value, old.as_ref());
        Record::Set { key: key.to_string(), value }
    }

    /// Removes a key, returning the record to persist, or `NotFound`.
    pub fn delete(&self, key: &str) -> Result<Record> {
        let mut inner = self.inner.lock().unwrap();
        let old = inner.map.remove(key).ok_or_else(|| Error::NotFound(key.to_string()))?;
        inner.indexes.on_delete(key, &old);
        Ok(Record::Delete { key: key.to_string() })
    }

    /// Adds `amount` to the integer stored at `key` (0 if absent), returning
    /// the new value and the record to persist. Fails if the existing value
    /// is not an integer.
    pub fn incr(&self, key: &str, amount: i64) -> Result<(i64, Record)> {
        let mut inner = self.inner.lock().unwrap();
        let current = match inner.map.get(key) {
            Some(v) => v.as_i64().ok_or_else(|| {
                Error::TypeError(format!(
                    "Key '{key}' cannot be incremented: value is not an integer."
                ))
            })?,
            None => 0,
        };
        let new_value = current + amount;
        let old = inner.map.insert(key.to_string(), Value::from(new_value));
        inner.indexes.on_set(key, &Value::from(new_value), old.as_ref());
        Ok((new_value, Record::Incr { key: key.to_string(), amount }))
    }

    /// Sets every `(key, value)` pair under a single critical section,
    /// returning the records to persist as one atomic group.
    pub fn bulk_set(&self, items: &[(String, Value)]) -> Vec<Record> {
        let mut inner = self.inner.lock().unwrap();
        let mut records = Vec::with_capacity(items.len());
        for (key, value) in items {
            let old = inner.map.insert(key.clone(), value.clone());
            inner.indexes.on_set(key, value, old.as_ref());
            records.push(Record::Set { key: key.clone(), value: value.clone() });
        }
        records
    }

    /// Persists `records` durably via a single batched write, optionally
    /// exercising the simulated-failure hook.
    pub fn write_batch(&self, records: &[Record], simulate_failure: bool) -> Result<()> {
        let simulate_failure = simulate_failure && self.allow_simulated_failures;
        self.wal.lock().unwrap().write_batch(records, simulate_failure)
    }

    /// Snapshots the live map and compacts the log to one SET per key.
    pub fn compact(&self) -> Result<()> {
        let live: Vec<(String, Value)> = {
            let inner = self.inner.lock().unwrap();
            inner.map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };
        self.wal.lock().unwrap().compact(&live)
    }

    /// Creates a secondary value index on `field` if it doesn't already
    /// exist, backfilling it from the current map.
    pub fn create_index(&self, field: &str) {
        let mut inner = self.inner.lock().unwrap();
        let Inner { map, indexes } = &mut *inner;
        indexes.create_value_index_from(field, map);
    }

    /// Queries a secondary value index for keys whose `field` equals `value`.
    pub fn query_index(&self, field: &str, value: &Value) -> Result<Vec<String>> {
        self.inner.lock().unwrap().indexes.query_value_index(field, value)
    }

    /// Full-text BM25 search over the store's values.
    pub fn search(&self, query: &str, top_k: usize) -> Vec<(String, f64)> {
        self.inner.lock().unwrap().indexes.search(query, top_k)
    }

    /// TF-IDF cosine similarity search over the store's values.
    pub fn semantic_search(&self, query: &str, top_k: usize) -> Vec<(String, f64)> {
        self.inner.lock().unwrap().indexes.semantic_search(query, top_k)
    }
}

fn apply_record_to_map(map: &mut HashMap<String, Value>, record: &Record) {
    match record {
        Record::Set { key, value } => {
            map.insert(key.clone(), value.clone());
        }
        Record::Delete { key } => {
            map.remove(key);
        }
        Record::Incr { key, amount } => {
            let current = map.get(key).and_then(Value::as_i64).unwrap_or(0);
            map.insert(key.clone(), Value::from(current + amount));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn set_get_delete_round_trip() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("s.wal")).unwrap();
        store.set("a", Value::from("1"));
        assert_eq!(store.get("a"), Some(Value::from("1")));
        store.delete("a").unwrap();
        assert_eq!(store.get("a"), None);
        assert!(matches!(store.delete("a"), Err(Error::NotFound(_))));
    }

    #[test]
    fn incr_missing_key_treated_as_zero() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("s.wal")).unwrap();
        let (value, _) = store.incr("n", 5).unwrap();
        assert_eq!(value, 5);
        let (value, _) = store.incr("n", 10).unwrap();
        assert_eq!(value, 15);
    }

    #[test]
    fn incr_on_non_integer_fails() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("s.wal")).unwrap();
        store.set("s", Value::from("hello"));
        assert!(matches!(store.incr("s", 1), Err(Error::TypeError(_))));
    }

    #[test]
    fn replay_reconstructs_state_after_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.wal");
        {
            let store = Store::open(&path).unwrap();
            let record = store.set("name", Value::from("Alice"));
            store.write_batch(&[record], false).unwrap();
        }
        let store = Store::open(&path).unwrap();
        assert_eq!(store.get("name"), Some(Value::from("Alice")));
    }

    #[test]
    fn bulk_set_is_all_or_nothing_in_memory() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("s.wal")).unwrap();
        let items = vec![("k1".to_string(), Value::from("v1")), ("k2".to_string(), Value::from("v2"))];
        let records = store.bulk_set(&items);
        store.write_batch(&records, false).unwrap();
        assert_eq!(store.get("k1"), Some(Value::from("v1")));
        assert_eq!(store.get("k2"), Some(Value::from("v2")));
    }

    /// `allow_simulated_failures` defaults to false and has no setter the
    /// server binary reaches; only a test constructing `Store` directly can
    /// opt in, by design.
    #[test]
    fn simulated_failure_can_drop_an_acknowledged_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.wal");
        let mut store = Store::open(&path).unwrap();
        store.allow_simulated_failures = true;

        let attempts = 2000;
        for i in 0..attempts {
            let record = store.set(&format!("k{i}"), Value::from(i));
            store.write_batch(&[record], true).unwrap();
        }
        drop(store);

        let reopened = Store::open(&path).unwrap();
        let persisted = (0..attempts).filter(|i| reopened.get(&format!("k{i}")).is_some()).count();
        assert!(persisted < attempts, "simulated failure never dropped a write in {attempts} attempts");
    }
}
