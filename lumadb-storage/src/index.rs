//! Sparse offset and time indexes (spec §4.1)
//!
//! Offset index entries are fixed 8-byte pairs `(relativeOffset u32,
//! bytePosition u32)`. Time index entries are fixed 12-byte pairs
//! `(timestamp i64, relativeOffset u32)`. Both are append-only and kept
//! fully in memory, mirrored to disk as flat binary files; they are hints
//! — rebuildable from the data file, never authoritative (spec §9).

use bytes::{Buf, BufMut, BytesMut};
use std::io::Write;
use std::path::Path;

/// Minimum gap between successive offset-index entries (spec §4.1).
pub const INDEX_INTERVAL_BYTES: u64 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetIndexEntry {
    pub relative_offset: u32,
    pub byte_position: u32,
}

/// In-memory sparse offset index, flushed to a `.index` file.
#[derive(Debug, Default)]
pub struct OffsetIndex {
    entries: Vec<OffsetIndexEntry>,
    bytes_since_last_entry: u64,
}

impl OffsetIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> lumadb_common::Result<Self> {
        let mut index = Self::new();
        if !path.exists() {
            return Ok(index);
        }
        let data = std::fs::read(path)?;
        let mut buf = &data[..];
        while buf.remaining() >= 8 {
            let relative_offset = buf.get_u32();
            let byte_position = buf.get_u32();
            index.entries.push(OffsetIndexEntry {
                relative_offset,
                byte_position,
            });
        }
        Ok(index)
    }

    /// Record that `bytes_written` bytes were just appended to the data
    /// file ending at `byte_position`; inserts an entry iff the sparse
    /// interval has elapsed since the previous one.
    pub fn maybe_append(&mut self, relative_offset: u32, byte_position: u32, bytes_written: u64) {
        self.bytes_since_last_entry += bytes_written;
        if self.entries.is_empty() || self.bytes_since_last_entry >= INDEX_INTERVAL_BYTES {
            self.entries.push(OffsetIndexEntry {
                relative_offset,
                byte_position,
            });
            self.bytes_since_last_entry = 0;
        }
    }

    /// Binary search for the closest indexed entry at or before
    /// `relative_offset`. Returns `None` if the index is empty (caller
    /// falls back to scanning the data file from position 0).
    #[must_use]
    pub fn floor_entry(&self, relative_offset: u32) -> Option<OffsetIndexEntry> {
        match self
            .entries
            .binary_search_by_key(&relative_offset, |e| e.relative_offset)
        {
            Ok(idx) => Some(self.entries[idx]),
            Err(0) => None,
            Err(idx) => Some(self.entries[idx - 1]),
        }
    }

    pub fn flush(&self, path: &Path) -> lumadb_common::Result<()> {
        let mut buf = BytesMut::with_capacity(self.entries.len() * 8);
        for entry in &self.entries {
            buf.put_u32(entry.relative_offset);
            buf.put_u32(entry.byte_position);
        }
        let mut file = std::fs::File::create(path)?;
        file.write_all(&buf)?;
        file.sync_all()?;
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeIndexEntry {
    pub timestamp: i64,
    pub relative_offset: u32,
}

/// In-memory sparse time index, flushed to a `.timeindex` file. Timestamps
/// are enforced non-decreasing (spec §3, §8 invariant 4).
#[derive(Debug, Default)]
pub struct TimeIndex {
    entries: Vec<TimeIndexEntry>,
    last_timestamp: Option<i64>,
}

impl TimeIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> lumadb_common::Result<Self> {
        let mut index = Self::new();
        if !path.exists() {
            return Ok(index);
        }
        let data = std::fs::read(path)?;
        let mut buf = &data[..];
        while buf.remaining() >= 12 {
            let timestamp = buf.get_i64();
            let relative_offset = buf.get_u32();
            index.last_timestamp = Some(timestamp);
            index.entries.push(TimeIndexEntry {
                timestamp,
                relative_offset,
            });
        }
        Ok(index)
    }

    /// Append an entry iff `timestamp` strictly exceeds the last indexed
    /// timestamp, per the append contract in spec §4.1.
    pub fn maybe_append(&mut self, timestamp: i64, relative_offset: u32) {
        let should_insert = match self.last_timestamp {
            Some(last) => timestamp > last,
            None => true,
        };
        if should_insert {
            self.entries.push(TimeIndexEntry {
                timestamp,
                relative_offset,
            });
            self.last_timestamp = Some(timestamp);
        }
    }

    /// Find the relative offset of the first entry whose timestamp is
    /// `>= target`, for `ListOffsets` timestamp lookups (spec §6.1).
    #[must_use]
    pub fn lookup(&self, target: i64) -> Option<u32> {
        match self
            .entries
            .binary_search_by_key(&target, |e| e.timestamp)
        {
            Ok(idx) => Some(self.entries[idx].relative_offset),
            Err(idx) => self.entries.get(idx).map(|e| e.relative_offset),
        }
    }

    pub fn flush(&self, path: &Path) -> lumadb_common::Result<()> {
        let mut buf = BytesMut::with_capacity(self.entries.len() * 12);
        for entry in &self.entries {
            buf.put_i64(entry.timestamp);
            buf.put_u32(entry.relative_offset);
        }
        let mut file = std::fs::File::create(path)?;
        file.write_all(&buf)?;
        file.sync_all()?;
        Ok(())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_index_sparse_insertion() {
        let mut index = OffsetIndex::new();
        index.maybe_append(0, 0, 0);
        index.maybe_append(5, 100, 1000);
        index.maybe_append(10, 200, 1000);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn offset_index_floor_lookup() {
        let mut index = OffsetIndex::new();
        index.maybe_append(0, 0, 0);
        index.maybe_append(10, 500, INDEX_INTERVAL_BYTES);
        let entry = index.floor_entry(7).unwrap();
        assert_eq!(entry.relative_offset, 0);
        let entry = index.floor_entry(10).unwrap();
        assert_eq!(entry.relative_offset, 10);
    }

    #[test]
    fn time_index_rejects_non_increasing() {
        let mut index = TimeIndex::new();
        index.maybe_append(100, 0);
        index.maybe_append(100, 1);
        index.maybe_append(99, 2);
        assert_eq!(index.entries.len(), 1);
    }
}
