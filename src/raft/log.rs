//! The persisted Raft log: `current_term`, `voted_for`, and the ordered
//! sequence of log entries, all backed by a single append-only file.
//!
//! Unlike a general-purpose storage engine, this log keeps every entry
//! cached in memory (`entries`) and only goes back to the file for
//! durability and for replay on startup — appropriate for an educational
//! system with no log snapshotting, where the file is expected to stay
//! small relative to available memory (see DESIGN.md for the tradeoff
//! against a generic keyed storage engine).
//!
//! Invariants:
//! * Entry indexes are contiguous starting at 1 (0 means "no entry").
//! * Entry terms never decrease from the previous entry.
//! * Entry terms are at or below the current term.
//! * Appended entries are durable (flushed) before `append` returns.
//! * Committed entries are never changed or removed.
//! * If two logs contain a matching index/term, every earlier entry is
//!   identical (Raft §5.3, the Log Matching property).

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use fs4::fs_std::FileExt;
use serde::{Deserialize, Serialize};

use super::{Command, NodeId, Term};
use crate::error::{Error, Result};

/// A log index. Starts at 1; 0 means "no index" (the virtual entry that
/// precedes the first real one, with term 0).
pub type Index = u64;

/// A single entry in the replicated log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub index: Index,
    pub term: Term,
    /// `None` is a no-op, appended by a freshly elected leader to commit
    /// entries from earlier terms (Raft §5.4.2).
    pub command: Option<Command>,
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "op")]
enum Line {
    #[serde(rename = "term_vote")]
    TermVote { term: Term, vote: Option<NodeId> },
    #[serde(rename = "entry")]
    Entry { index: Index, term: Term, command: Option<Command> },
}

pub struct Log {
    path: PathBuf,
    file: File,
    term: Term,
    vote: Option<NodeId>,
    entries: Vec<Entry>,
    commit_index: Index,
}

impl Log {
    /// Opens (creating if absent) the log file at `path`, locks it
    /// exclusively, and replays it into memory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).read(true).append(true).open(&path)?;
        file.try_lock_exclusive().map_err(|_| {
            Error::Internal(format!("raft log {} is locked by another process", path.display()))
        })?;

        let mut term = 0;
        let mut vote = None;
        let mut entries = Vec::new();
        let reader = BufReader::new(File::open(&path)?);
        for line in reader.lines() {
            let Ok(line) = line else { break };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Ok(parsed) = serde_json::from_str::<Line>(line) else { continue };
            match parsed {
                Line::TermVote { term: t, vote: v } => {
                    term = t;
                    vote = v;
                }
                Line::Entry { index, term, command } => {
                    if index as usize == entries.len() + 1 {
                        entries.push(Entry { index, term, command });
                    }
                }
            }
        }

        Ok(Self { path, file, term, vote, entries, commit_index: 0 })
    }

    /// Returns the current term (0 if none) and vote.
    pub fn term_vote(&self) -> (Term, Option<NodeId>) {
        (self.term, self.vote.clone())
    }

    /// Persists the current term and cast vote. Enforces that the term
    /// never regresses and that at most one vote is cast per term. Always
    /// fsyncs, even though term changes are rare and this is on the
    /// critical path of every vote reply: a double vote could split-brain
    /// the cluster.
    pub fn set_term_vote(&mut self, term: Term, vote: Option<NodeId>) -> Result<()> {
        assert!(term > 0, "can't set term 0");
        assert!(term >= self.term, "term regression {} -> {}", self.term, term);
        assert!(
            term > self.term || self.vote.is_none() || vote == self.vote,
            "can't change vote within a term"
        );
        if term == self.term && vote == self.vote {
            return Ok(());
        }
        self.write_line(&Line::TermVote { term, vote: vote.clone() })?;
        self.file.sync_all()?;
        self.term = term;
        self.vote = vote;
        Ok(())
    }

    /// Appends a command at the current term and flushes it to disk,
    /// returning its index.
    pub fn append(&mut self, command: Option<Command>) -> Result<Index> {
        assert!(self.term > 0, "can't append an entry in term 0");
        let entry = Entry { index: self.last_index() + 1, term: self.term, command };
        self.write_line(&Line::Entry {
            index: entry.index,
            term: entry.term,
            command: entry.command.clone(),
        })?;
        self.file.sync_all()?;
        self.entries.push(entry.clone());
        Ok(entry.index)
    }

    /// Advances the commit index. The commit index itself is not fsynced:
    /// it can always be recovered from a quorum's logs after a crash.
    pub fn commit(&mut self, index: Index) -> Index {
        assert!(index >= self.commit_index, "commit index regression");
        self.commit_index = index;
        index
    }

    pub fn commit_index(&self) -> Index {
        self.commit_index
    }

    pub fn last_index(&self) -> Index {
        self.entries.last().map(|e| e.index).unwrap_or(0)
    }

    pub fn last_term(&self) -> Term {
        self.entries.last().map(|e| e.term).unwrap_or(0)
    }

    pub fn get(&self, index: Index) -> Option<&Entry> {
        if index == 0 {
            return None;
        }
        self.entries.get(index as usize - 1)
    }

    /// Whether the log contains an entry with exactly this index and term.
    pub fn has(&self, index: Index, term: Term) -> bool {
        if index == 0 {
            return term == 0;
        }
        self.get(index).map(|e| e.term == term).unwrap_or(false)
    }

    /// Returns every entry with index greater than `from` (exclusive).
    pub fn entries_after(&self, from: Index) -> Vec<Entry> {
        self.entries.iter().filter(|e| e.index > from).cloned().collect()
    }

    /// Splices `new_entries` into the log: entries whose index/term already
    /// match are skipped, a term mismatch truncates the log from that index
    /// onward, and the remaining new entries are appended. Truncation
    /// rewrites the backing file, since it is append-only; a pure append
    /// (the common case, no conflict) goes through the cheap path.
    pub fn splice(&mut self, new_entries: Vec<Entry>) -> Result<Index> {
        let Some(first) = new_entries.first() else { return Ok(self.last_index()) };

        let mut conflict_at = None;
        for (offset, new_entry) in new_entries.iter().enumerate() {
            let index = first.index + offset as u64;
            match self.get(index) {
                Some(existing) if existing.term == new_entry.term => continue,
                Some(_) => {
                    conflict_at = Some(index);
                    break;
                }
                None => break,
            }
        }

        if let Some(conflict_index) = conflict_at {
            self.entries.truncate(conflict_index as usize - 1);
            self.rewrite_file()?;
        }

        for entry in new_entries {
            if entry.index <= self.last_index() {
                continue;
            }
            self.write_line(&Line::Entry {
                index: entry.index,
                term: entry.term,
                command: entry.command.clone(),
            })?;
            self.entries.push(entry);
        }
        self.file.sync_all()?;
        Ok(self.last_index())
    }

    /// Truncates the log to its first `keep` entries, discarding the rest.
    /// Used when a follower detects a term conflict at `prevLogIndex` before
    /// any new entries have been validated against it.
    pub fn truncate_to(&mut self, keep: Index) -> Result<()> {
        if keep >= self.last_index() {
            return Ok(());
        }
        self.entries.truncate(keep as usize);
        self.rewrite_file()
    }

    fn write_line(&mut self, line: &Line) -> Result<()> {
        let mut buf = serde_json::to_vec(line)?;
        buf.push(b'\n');
        self.file.write_all(&buf)?;
        Ok(())
    }

    /// Rewrites the whole file from the in-memory term/vote/entries state,
    /// used after an in-memory truncation (the file itself has no way to
    /// remove a previously appended line).
    fn rewrite_file(&mut self) -> Result<()> {
        let tmp_path = self.path.with_extension("tmp");
        let result = (|| -> Result<()> {
            let mut tmp = File::create(&tmp_path)?;
            if self.term > 0 {
                let line = Line::TermVote { term: self.term, vote: self.vote.clone() };
                let mut buf = serde_json::to_vec(&line)?;
                buf.push(b'\n');
                tmp.write_all(&buf)?;
            }
            for entry in &self.entries {
                let line = Line::Entry {
                    index: entry.index,
                    term: entry.term,
                    command: entry.command.clone(),
                };
                let mut buf = serde_json::to_vec(&line)?;
                buf.push(b'\n');
                tmp.write_all(&buf)?;
            }
            tmp.sync_all()?;
            Ok(())
        })();
        if let Err(err) = result {
            let _ = fs::remove_file(&tmp_path);
            return Err(err);
        }
        FileExt::unlock(&self.file).ok();
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().create(true).read(true).append(true).open(&self.path)?;
        file.try_lock_exclusive().map_err(|_| {
            Error::Internal(format!("raft log {} is locked by another process", self.path.display()))
        })?;
        self.file = file;
        Ok(())
    }
}

impl Drop for Log {
    fn drop(&mut self) {
        FileExt::unlock(&self.file).ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn append_persists_and_reloads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.raftlog");
        {
            let mut log = Log::open(&path).unwrap();
            log.set_term_vote(1, Some("n1".to_string())).unwrap();
            log.append(None).unwrap();
            log.append(Some(Command::Delete { key: "a".into() })).unwrap();
        }
        let log = Log::open(&path).unwrap();
        assert_eq!(log.last_index(), 2);
        assert_eq!(log.term_vote(), (1, Some("n1".to_string())));
        assert_eq!(log.get(1).unwrap().command, None);
    }

    #[test]
    fn has_matches_index_and_term() {
        let dir = tempdir().unwrap();
        let mut log = Log::open(dir.path().join("t.raftlog")).unwrap();
        log.set_term_vote(1, None).unwrap();
        log.append(None).unwrap();
        assert!(log.has(1, 1));
        assert!(!log.has(1, 2));
        assert!(!log.has(2, 1));
        assert!(log.has(0, 0));
    }

    #[test]
    fn splice_truncates_on_term_conflict() {
        let dir = tempdir().unwrap();
        let mut log = Log::open(dir.path().join("t.raftlog")).unwrap();
        log.set_term_vote(1, None).unwrap();
        log.append(None).unwrap();
        log.append(None).unwrap();
        log.set_term_vote(2, None).unwrap();
        log.splice(vec![Entry { index: 2, term: 2, command: None }]).unwrap();
        assert_eq!(log.last_index(), 2);
        assert_eq!(log.get(2).unwrap().term, 2);
    }

    #[test]
    fn splice_is_noop_for_already_present_entries() {
        let dir = tempdir().unwrap();
        let mut log = Log::open(dir.path().join("t.raftlog")).unwrap();
        log.set_term_vote(1, None).unwrap();
        log.append(None).unwrap();
        let before = log.last_index();
        log.splice(vec![Entry { index: 1, term: 1, command: None }]).unwrap();
        assert_eq!(log.last_index(), before);
    }

    #[test]
    fn log_matching_after_truncate_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.raftlog");
        {
            let mut log = Log::open(&path).unwrap();
            log.set_term_vote(1, None).unwrap();
            log.append(None).unwrap();
            log.append(None).unwrap();
            log.set_term_vote(2, None).unwrap();
            log.splice(vec![Entry { index: 2, term: 2, command: None }]).unwrap();
        }
        let log = Log::open(&path).unwrap();
        assert_eq!(log.last_index(), 2);
        assert_eq!(log.get(2).unwrap().term, 2);
        assert_eq!(log.get(1).unwrap().term, 1);
    }
}
