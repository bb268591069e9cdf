//! Append-only write-ahead log file.
//!
//! One JSON object per line, `\n`-terminated. The file is owned exclusively
//! by this process for as long as the [`Wal`] is open: opening acquires an
//! `fs4` advisory exclusive lock, turning "two processes writing the same
//! file" into a startup error instead of silent corruption.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use fs4::fs_std::FileExt;
use rand::Rng;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::store::record::Record;

pub struct Wal {
    path: PathBuf,
    file: File,
}

impl Wal {
    /// Opens (creating if absent) the log file at `path` and locks it
    /// exclusively for this process.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).read(true).append(true).open(&path)?;
        file.try_lock_exclusive().map_err(|_| {
            Error::Internal(format!("log file {} is locked by another process", path.display()))
        })?;
        Ok(Self { path, file })
    }

    /// Scans the log line by line, skipping malformed or torn trailing
    /// lines, and returns every well-formed record in file order.
    pub fn replay(&self) -> Result<Vec<Record>> {
        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);
        let mut records = Vec::new();
        for line in reader.lines() {
            let Ok(line) = line else { break };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<Record>(line) {
                Ok(record) => records.push(record),
                Err(_) => continue,
            }
        }
        Ok(records)
    }

    /// Writes every record in `records` in order and issues a single durable
    /// flush. If `simulate_failure` is set, the batch has a small chance of
    /// being silently dropped (the caller has already applied it to memory);
    /// this is a diagnostic hook, never enabled by the server binary.
    pub fn write_batch(&mut self, records: &[Record], simulate_failure: bool) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        if simulate_failure && rand::rng().random::<f64>() < 0.01 {
            return Ok(());
        }
        let mut buf = Vec::new();
        for record in records {
            serde_json::to_writer(&mut buf, record)
                .map_err(|e| Error::Durability(e.to_string()))?;
            buf.push(b'\n');
        }
        self.file.write_all(&buf).map_err(|e| Error::Durability(e.to_string()))?;
        self.file.sync_all().map_err(|e| Error::Durability(e.to_string()))?;
        Ok(())
    }

    /// Replaces the log with exactly one SET per entry in `live`, durably,
    /// then reopens the (now-compacted) file for further appends.
    pub fn compact(&mut self, live: &[(String, Value)]) -> Result<()> {
        let tmp_path = self.path.with_extension("tmp");
        let result = (|| -> Result<()> {
            let mut tmp = File::create(&tmp_path)?;
            for (key, value) in live {
                let record = Record::Set { key: key.clone(), value: value.clone() };
                serde_json::to_writer(&mut tmp, &record)?;
                tmp.write_all(b"\n")?;
            }
            tmp.sync_all()?;
            Ok(())
        })();

        if let Err(err) = result {
            let _ = fs::remove_file(&tmp_path);
            return Err(err);
        }

        // Drop the lock before rename so a reopen can reacquire it cleanly.
        FileExt::unlock(&self.file).ok();
        fs::rename(&tmp_path, &self.path)?;

        let file = OpenOptions::new().create(true).read(true).append(true).open(&self.path)?;
        file.try_lock_exclusive().map_err(|_| {
            Error::Internal(format!("log file {} is locked by another process", self.path.display()))
        })?;
        self.file = file;
        Ok(())
    }
}

impl Drop for Wal {
    fn drop(&mut self) {
        FileExt::unlock(&self.file).ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn replay_skips_malformed_and_empty_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.wal");
        fs::write(&path, "{\"op\":\"SET\",\"key\":\"a\",\"value\":1}\nnot json\n\n{\"op\":\"DELETE\",\"key\":\"a\"}\n").unwrap();
        let wal = Wal::open(&path).unwrap();
        let records = wal.replay().unwrap();
        assert_eq!(records, vec![
            Record::Set { key: "a".into(), value: Value::from(1) },
            Record::Delete { key: "a".into() },
        ]);
    }

    #[test]
    fn replay_discards_torn_trailing_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.wal");
        fs::write(&path, "{\"op\":\"SET\",\"key\":\"a\",\"value\":1}\n{\"op\":\"SET\",\"key\":\"b\",\"va").unwrap();
        let wal = Wal::open(&path).unwrap();
        let records = wal.replay().unwrap();
        assert_eq!(records, vec![Record::Set { key: "a".into(), value: Value::from(1) }]);
    }

    #[test]
    fn write_batch_then_replay_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.wal");
        let mut wal = Wal::open(&path).unwrap();
        let records = vec![
            Record::Set { key: "k1".into(), value: Value::from("v1") },
            Record::Incr { key: "n".into(), amount: 5 },
        ];
        wal.write_batch(&records, false).unwrap();
        assert_eq!(wal.replay().unwrap(), records);
    }

    #[test]
    fn compact_rewrites_to_one_set_per_key() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.wal");
        let mut wal = Wal::open(&path).unwrap();
        wal.write_batch(&[Record::Set { key: "a".into(), value: Value::from(1) }], false).unwrap();
        wal.write_batch(&[Record::Set { key: "a".into(), value: Value::from(2) }], false).unwrap();
        wal.write_batch(&[Record::Set { key: "b".into(), value: Value::from(3) }], false).unwrap();
        wal.compact(&[("a".into(), Value::from(2)), ("b".into(), Value::from(3))]).unwrap();
        let records = wal.replay().unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn open_fails_when_already_locked() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.wal");
        let _first = Wal::open(&path).unwrap();
        assert!(Wal::open(&path).is_err());
    }
}
