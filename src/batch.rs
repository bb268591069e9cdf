//! Batching writer: a single-writer queue between command handlers and the
//! store's log file.
//!
//! One worker thread pulls a submission, then drains whatever else is
//! already queued (non-blocking) up to a cap, writes every record from
//! every drained submission in one call, and wakes every waiter at once.
//! This turns N concurrent flushes into one fsync without any caller having
//! to know about the others.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::{self, Receiver, Sender};

use crate::error::{Error, Result};
use crate::store::Store;
use crate::store::record::Record;

const DEFAULT_CAP: usize = 2000;

enum WorkItem {
    Submit { records: Vec<Record>, simulate_failure: bool, reply: Sender<Result<()>> },
    Shutdown,
}

/// A cheaply cloneable reference to a running batcher.
#[derive(Clone)]
pub struct Handle {
    tx: Sender<WorkItem>,
}

impl Handle {
    /// Enqueues `records` as one atomic group and blocks until they are
    /// durable (or the batch they were folded into failed). After shutdown,
    /// every submission fails immediately.
    pub fn submit(&self, records: Vec<Record>, simulate_failure: bool) -> Result<()> {
        let (reply, reply_rx) = channel::bounded(1);
        if self.tx.send(WorkItem::Submit { records, simulate_failure, reply }).is_err() {
            return Err(Error::Durability("batching writer has shut down".into()));
        }
        reply_rx.recv().unwrap_or_else(|_| Err(Error::Durability("batching writer has shut down".into())))
    }

    /// Drains the queue, completes any in-flight items, then stops the
    /// worker thread. Submissions after this call fail.
    pub fn shutdown(&self) {
        let _ = self.tx.send(WorkItem::Shutdown);
    }
}

/// Spawns the batcher's worker thread with the default queue cap.
pub fn spawn(store: Arc<Store>) -> (Handle, JoinHandle<()>) {
    spawn_with_cap(store, DEFAULT_CAP)
}

pub fn spawn_with_cap(store: Arc<Store>, cap: usize) -> (Handle, JoinHandle<()>) {
    let (tx, rx) = channel::unbounded();
    let handle = Handle { tx };
    let join = std::thread::spawn(move || run(store, rx, cap));
    (handle, join)
}

fn run(store: Arc<Store>, rx: Receiver<WorkItem>, cap: usize) {
    loop {
        let first = match rx.recv() {
            Ok(WorkItem::Submit { records, simulate_failure, reply }) => (records, simulate_failure, reply),
            Ok(WorkItem::Shutdown) | Err(_) => {
                drain_and_fail(&rx);
                return;
            }
        };

        let mut group = vec![first];
        let mut shutting_down = false;
        while group.len() < cap {
            match rx.try_recv() {
                Ok(WorkItem::Submit { records, simulate_failure, reply }) => {
                    group.push((records, simulate_failure, reply))
                }
                Ok(WorkItem::Shutdown) => {
                    shutting_down = true;
                    break;
                }
                Err(_) => break,
            }
        }

        let mut all_records = Vec::new();
        let mut simulate_failure = false;
        for (records, simulate, _) in &group {
            all_records.extend(records.iter().cloned());
            simulate_failure |= *simulate;
        }
        let result = store.write_batch(&all_records, simulate_failure);
        for (_, _, reply) in group {
            let _ = reply.send(result.clone());
        }

        if shutting_down {
            drain_and_fail(&rx);
            return;
        }
    }
}

fn drain_and_fail(rx: &Receiver<WorkItem>) {
    while let Ok(item) = rx.try_recv() {
        if let WorkItem::Submit { reply, .. } = item {
            let _ = reply.send(Err(Error::Durability("batching writer has shut down".into())));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tempfile::tempdir;

    #[test]
    fn submit_persists_before_returning() {
        let dir = tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path().join("b.wal")).unwrap());
        let (handle, join) = spawn(store.clone());
        let record = store.set("a", Value::from(1));
        handle.submit(vec![record], false).unwrap();
        handle.shutdown();
        join.join().unwrap();

        let reopened = Store::open(dir.path().join("b.wal")).unwrap();
        assert_eq!(reopened.get("a"), Some(Value::from(1)));
    }

    #[test]
    fn submissions_after_shutdown_fail() {
        let dir = tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path().join("b.wal")).unwrap());
        let (handle, join) = spawn(store);
        handle.shutdown();
        join.join().unwrap();
        assert!(handle.submit(vec![], false).is_err());
    }

    #[test]
    fn concurrent_submits_all_observe_durable_records() {
        let dir = tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path().join("b.wal")).unwrap());
        let (handle, join) = spawn(store.clone());

        let threads: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                let handle = handle.clone();
                std::thread::spawn(move || {
                    let key = format!("k{i}");
                    let record = store.set(&key, Value::from(i));
                    handle.submit(vec![record], false).unwrap();
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        handle.shutdown();
        join.join().unwrap();

        let reopened = Store::open(dir.path().join("b.wal")).unwrap();
        for i in 0..8 {
            assert_eq!(reopened.get(&format!("k{i}")), Some(Value::from(i)));
        }
    }
}
