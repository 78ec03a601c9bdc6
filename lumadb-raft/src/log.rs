//! Persisted Raft log, storing serialized `Command`s under `.raft/log`
//! (spec §6.2)

use crate::commands::Command;
use lumadb_common::{LogIndex, Term};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub term: Term,
    pub index: LogIndex,
    pub command: Command,
}

/// In-memory Raft log mirrored to a single append-only file. Entries are
/// length-prefixed bincode records; indices start at 1 (index 0 is the
/// implicit "before the log" sentinel).
pub struct RaftLog {
    entries: Vec<LogEntry>,
    path: PathBuf,
}

impl RaftLog {
    pub fn open(dir: &Path) -> lumadb_common::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join("raft.log");
        let entries = if path.exists() {
            Self::read_all(&path)?
        } else {
            Vec::new()
        };
        Ok(Self { entries, path })
    }

    fn read_all(path: &Path) -> lumadb_common::Result<Vec<LogEntry>> {
        let data = std::fs::read(path)?;
        let mut entries = Vec::new();
        let mut cursor = &data[..];
        while !cursor.is_empty() {
            if cursor.len() < 4 {
                break;
            }
            let len = u32::from_be_bytes(cursor[..4].try_into().unwrap()) as usize;
            if cursor.len() < 4 + len {
                break;
            }
            let entry: LogEntry = match bincode::deserialize(&cursor[4..4 + len]) {
                Ok(entry) => entry,
                Err(_) => break,
            };
            entries.push(entry);
            cursor = &cursor[4 + len..];
        }
        Ok(entries)
    }

    /// Append entries, truncating any conflicting suffix first (standard
    /// Raft log-matching semantics).
    pub fn append(&mut self, new_entries: Vec<LogEntry>) -> lumadb_common::Result<()> {
        for entry in new_entries {
            if let Some(existing) = self.entries.get(entry.index as usize - 1) {
                if existing.term != entry.term {
                    self.entries.truncate(entry.index as usize - 1);
                } else {
                    continue;
                }
            }
            self.entries.push(entry);
        }
        self.persist()
    }

    fn persist(&self) -> lumadb_common::Result<()> {
        let mut file = std::fs::File::create(&self.path)?;
        for entry in &self.entries {
            let bytes = bincode::serialize(entry)?;
            file.write_all(&(bytes.len() as u32).to_be_bytes())?;
            file.write_all(&bytes)?;
        }
        file.sync_all()?;
        Ok(())
    }

    #[must_use]
    pub fn last_index(&self) -> LogIndex {
        self.entries.last().map_or(0, |e| e.index)
    }

    #[must_use]
    pub fn last_term(&self) -> Term {
        self.entries.last().map_or(0, |e| e.term)
    }

    #[must_use]
    pub fn term_at(&self, index: LogIndex) -> Option<Term> {
        if index == 0 {
            return Some(0);
        }
        self.entries.get(index as usize - 1).map(|e| e.term)
    }

    #[must_use]
    pub fn entry(&self, index: LogIndex) -> Option<&LogEntry> {
        if index == 0 {
            return None;
        }
        self.entries.get(index as usize - 1)
    }

    #[must_use]
    pub fn entries_from(&self, index: LogIndex) -> Vec<LogEntry> {
        if index == 0 {
            return self.entries.clone();
        }
        self.entries
            .iter()
            .skip(index as usize - 1)
            .cloned()
            .collect()
    }

    pub fn truncate_from(&mut self, index: LogIndex) -> lumadb_common::Result<()> {
        self.entries.truncate(index.saturating_sub(1) as usize);
        self.persist()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(index: LogIndex, term: Term) -> LogEntry {
        LogEntry {
            term,
            index,
            command: Command::RegisterBroker(lumadb_common::NodeInfo {
                id: index,
                address: "x".into(),
                status: lumadb_common::NodeStatus::Online,
                last_heartbeat: 0,
            }),
        }
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut log = RaftLog::open(dir.path()).unwrap();
            log.append(vec![entry(1, 1), entry(2, 1)]).unwrap();
        }
        let log = RaftLog::open(dir.path()).unwrap();
        assert_eq!(log.last_index(), 2);
        assert_eq!(log.last_term(), 1);
    }

    #[test]
    fn append_truncates_conflicting_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = RaftLog::open(dir.path()).unwrap();
        log.append(vec![entry(1, 1), entry(2, 1), entry(3, 1)]).unwrap();
        log.append(vec![entry(2, 2)]).unwrap();
        assert_eq!(log.last_index(), 2);
        assert_eq!(log.last_term(), 2);
    }
}
