//! Bridges a committed Raft command to a store mutation and a durable
//! write, producing the value a waiting client should see.
//!
//! This is the only piece of glue between the consensus module and the
//! store: the consensus module only knows it must call some `ApplyFn` once
//! per committed entry, and the store only knows how to mutate its map and
//! produce a WAL record.

use std::sync::Arc;

use serde_json::Value;

use crate::batch;
use crate::error::Result;
use crate::raft::{ApplyFn, Command};
use crate::store::Store;

/// Builds the closure the consensus actor calls once per committed entry.
pub fn make_apply_fn(store: Arc<Store>, batcher: batch::Handle) -> ApplyFn {
    Arc::new(move |command: &Command| -> Result<Value> {
        match command {
            Command::Set { key, value, simulate_failure } => {
                let record = store.set(key, value.clone());
                batcher.submit(vec![record], *simulate_failure)?;
                Ok(Value::String("OK".into()))
            }
            Command::Delete { key } => {
                let record = store.delete(key)?;
                batcher.submit(vec![record], false)?;
                Ok(Value::String("OK".into()))
            }
            Command::Incr { key, amount } => {
                let (new_value, record) = store.incr(key, *amount)?;
                batcher.submit(vec![record], false)?;
                Ok(Value::from(new_value))
            }
            Command::BulkSet { items, simulate_failure } => {
                let records = store.bulk_set(items);
                batcher.submit(records, *simulate_failure)?;
                Ok(Value::String("OK".into()))
            }
        }
    })
}
