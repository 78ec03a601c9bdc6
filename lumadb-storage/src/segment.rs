//! Append-only data file with offset and time indexes (spec §4.1)

use crate::index::{OffsetIndex, TimeIndex};
use crate::record::{decode_record, encode_record};
use lumadb_common::error::{Error, StorageError};
use lumadb_common::{Offset, Record, Timestamp};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Zero-pad a base offset into the 20-digit filename stem Kafka-style
/// brokers use so lexicographic order matches numeric order (spec §6.2).
#[must_use]
pub fn filename_stem(base_offset: Offset) -> String {
    format!("{base_offset:020}")
}

/// A region of a segment's data file suitable for zero-copy transfer: the
/// file path, byte offset, and length to send (spec §4.1 `ReadRange`).
#[derive(Debug, Clone)]
pub struct FileRegion {
    pub path: PathBuf,
    pub position: u64,
    pub length: u64,
}

/// One contiguous offset range for a partition, backed by three files
/// sharing a base-offset stem: `.log`, `.index`, `.timeindex`.
pub struct Segment {
    dir: PathBuf,
    base_offset: Offset,
    data_file: File,
    data_size: u64,
    next_offset: Offset,
    max_timestamp: Timestamp,
    created_at_ms: Timestamp,
    offset_index: OffsetIndex,
    time_index: TimeIndex,
    roll_size: u64,
    readable: bool,
}

impl Segment {
    fn log_path(dir: &Path, base_offset: Offset) -> PathBuf {
        dir.join(format!("{}.log", filename_stem(base_offset)))
    }

    fn index_path(dir: &Path, base_offset: Offset) -> PathBuf {
        dir.join(format!("{}.index", filename_stem(base_offset)))
    }

    fn timeindex_path(dir: &Path, base_offset: Offset) -> PathBuf {
        dir.join(format!("{}.timeindex", filename_stem(base_offset)))
    }

    /// Create a brand new, empty active segment.
    pub fn create(dir: &Path, base_offset: Offset, roll_size: u64) -> lumadb_common::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let data_file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(Self::log_path(dir, base_offset))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            base_offset,
            data_file,
            data_size: 0,
            next_offset: base_offset,
            max_timestamp: 0,
            created_at_ms: now_ms(),
            offset_index: OffsetIndex::new(),
            time_index: TimeIndex::new(),
            roll_size,
            readable: true,
        })
    }

    /// Open an existing segment directory, recovering via `Scan` if the
    /// indexes look inconsistent with the data file (spec §4.1 Recovery).
    pub fn open(dir: &Path, base_offset: Offset, roll_size: u64) -> lumadb_common::Result<Self> {
        let log_path = Self::log_path(dir, base_offset);
        let mut offset_index = OffsetIndex::load(&Self::index_path(dir, base_offset))?;
        let mut time_index = TimeIndex::load(&Self::timeindex_path(dir, base_offset))?;

        let (data_size, next_offset, max_timestamp, truncated) =
            Self::scan(&log_path, base_offset)?;

        if truncated {
            offset_index = OffsetIndex::new();
            time_index = TimeIndex::new();
        }

        if truncated {
            let mut file = OpenOptions::new().write(true).open(&log_path)?;
            file.set_len(data_size)?;
            file.sync_all()?;
        }

        let data_file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&log_path)?;

        let mut segment = Self {
            dir: dir.to_path_buf(),
            base_offset,
            data_file,
            data_size,
            next_offset,
            max_timestamp,
            created_at_ms: now_ms(),
            offset_index,
            time_index,
            roll_size,
            readable: true,
        };

        if truncated {
            segment.rebuild_indexes()?;
        }

        Ok(segment)
    }

    /// Walk the data file from the start, validating CRCs and returning
    /// `(validByteLength, nextOffset, maxTimestamp, wasTruncated)`. Partial
    /// tails from a crash mid-append are truncated at the last good record
    /// boundary (spec §4.1 Failure semantics).
    fn scan(log_path: &Path, base_offset: Offset) -> lumadb_common::Result<(u64, Offset, Timestamp, bool)> {
        if !log_path.exists() {
            return Ok((0, base_offset, 0, false));
        }
        let mut file = File::open(log_path)?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        let mut position = 0usize;
        let mut next_offset = base_offset;
        let mut max_timestamp = 0i64;

        loop {
            if position >= buf.len() {
                break;
            }
            match decode_record(&buf[position..]) {
                Ok((record, consumed)) => {
                    next_offset = record.offset.unwrap_or(next_offset) + 1;
                    max_timestamp = max_timestamp.max(record.timestamp);
                    position += consumed;
                }
                Err(_) => break,
            }
        }

        let truncated = position != buf.len();
        Ok((position as u64, next_offset, max_timestamp, truncated))
    }

    fn rebuild_indexes(&mut self) -> lumadb_common::Result<()> {
        self.offset_index = OffsetIndex::new();
        self.time_index = TimeIndex::new();

        let mut file = File::open(self.current_log_path())?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        let mut position = 0usize;
        while position < buf.len() {
            let (record, consumed) = decode_record(&buf[position..])?;
            let offset = record.offset.unwrap_or(self.base_offset);
            let relative = u32::try_from(offset - self.base_offset).unwrap_or(u32::MAX);
            self.offset_index
                .maybe_append(relative, position as u32, consumed as u64);
            self.time_index.maybe_append(record.timestamp, relative);
            position += consumed;
        }
        Ok(())
    }

    fn current_log_path(&self) -> PathBuf {
        Self::log_path(&self.dir, self.base_offset)
    }

    #[must_use]
    pub fn base_offset(&self) -> Offset {
        self.base_offset
    }

    #[must_use]
    pub fn next_offset(&self) -> Offset {
        self.next_offset
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.data_size
    }

    #[must_use]
    pub fn max_timestamp(&self) -> Timestamp {
        self.max_timestamp
    }

    #[must_use]
    pub fn created_at_ms(&self) -> Timestamp {
        self.created_at_ms
    }

    #[must_use]
    pub fn is_readable(&self) -> bool {
        self.readable
    }

    pub fn mark_unreadable(&mut self) {
        self.readable = false;
    }

    /// Append one pre-offset-assigned record. Fails with `SegmentFull` if
    /// the encoded size would exceed the roll threshold; the caller (Log)
    /// is responsible for rolling and retrying exactly once.
    pub fn append(&mut self, record: &Record) -> lumadb_common::Result<u64> {
        let encoded = encode_record(record);
        let encoded_len = encoded.len() as u64;
        if self.data_size + encoded_len > self.roll_size && self.data_size > 0 {
            return Err(Error::Storage(StorageError::SegmentFull));
        }

        let position = self.data_size;
        self.data_file.write_all(&encoded.bytes)?;
        self.data_file.flush()?;
        self.data_size += encoded_len;

        let offset = record.offset.unwrap_or(self.next_offset);
        self.next_offset = offset + 1;
        self.max_timestamp = self.max_timestamp.max(record.timestamp);

        let relative = u32::try_from(offset - self.base_offset).unwrap_or(u32::MAX);
        self.offset_index
            .maybe_append(relative, position as u32, encoded_len);
        self.time_index.maybe_append(record.timestamp, relative);

        Ok(position + encoded_len)
    }

    /// Truncate the data file so it ends exactly at `offset` (exclusive),
    /// then rebuild indexes from the remaining bytes. Used for
    /// log-divergence recovery after a fenced leader epoch (spec §4.4).
    pub fn truncate_to(&mut self, offset: Offset) -> lumadb_common::Result<()> {
        if offset >= self.next_offset {
            return Ok(());
        }
        let mut file = File::open(self.current_log_path())?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        let mut position = 0usize;
        let mut next_offset = self.base_offset;
        let mut max_timestamp = 0i64;
        while position < buf.len() {
            let (record, consumed) = decode_record(&buf[position..])?;
            if record.offset == Some(offset) {
                break;
            }
            next_offset = record.offset.unwrap_or(next_offset) + 1;
            max_timestamp = max_timestamp.max(record.timestamp);
            position += consumed;
        }

        let file = OpenOptions::new().write(true).open(self.current_log_path())?;
        file.set_len(position as u64)?;
        file.sync_all()?;

        self.data_size = position as u64;
        self.next_offset = next_offset;
        self.max_timestamp = max_timestamp;
        self.data_file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(self.current_log_path())?;

        self.rebuild_indexes()
    }

    /// Read a single record at an absolute offset within this segment.
    pub fn read(&self, offset: Offset) -> lumadb_common::Result<Record> {
        if !self.readable {
            return Err(Error::Storage(StorageError::CorruptSegment(self.base_offset)));
        }
        let relative = u32::try_from(offset - self.base_offset)
            .map_err(|_| Error::Storage(StorageError::OffsetOutOfRange(offset)))?;

        let start_position = self
            .offset_index
            .floor_entry(relative)
            .map_or(0, |e| u64::from(e.byte_position));

        let mut file = File::open(self.current_log_path())?;
        file.seek(SeekFrom::Start(start_position))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        let mut position = 0usize;
        while position < buf.len() {
            let (record, consumed) = decode_record(&buf[position..])?;
            if record.offset == Some(offset) {
                return Ok(record);
            }
            position += consumed;
        }
        Err(Error::Storage(StorageError::OffsetOutOfRange(offset)))
    }

    /// Return a zero-copy-able file region covering `[offset, end of
    /// segment]`, bounded by `max_bytes` (spec §4.1 `ReadRange`).
    pub fn read_range(&self, offset: Offset, max_bytes: u64) -> lumadb_common::Result<FileRegion> {
        let relative = u32::try_from(offset - self.base_offset)
            .map_err(|_| Error::Storage(StorageError::OffsetOutOfRange(offset)))?;
        let start_position = self
            .offset_index
            .floor_entry(relative)
            .map_or(0, |e| u64::from(e.byte_position));
        let length = (self.data_size - start_position).min(max_bytes);
        Ok(FileRegion {
            path: self.current_log_path(),
            position: start_position,
            length,
        })
    }

    /// Binary search the time index for the offset of the first record
    /// with `timestamp >= target` (spec §6.1 `ListOffsets`).
    #[must_use]
    pub fn lookup_by_timestamp(&self, target: Timestamp) -> Option<Offset> {
        self.time_index
            .lookup(target)
            .map(|relative| self.base_offset + i64::from(relative))
    }

    /// Flush index files to disk. Called after roll or on clean shutdown;
    /// indexes are rebuildable so this is not required for correctness.
    pub fn flush_indexes(&self) -> lumadb_common::Result<()> {
        self.offset_index
            .flush(&Self::index_path(&self.dir, self.base_offset))?;
        self.time_index
            .flush(&Self::timeindex_path(&self.dir, self.base_offset))?;
        Ok(())
    }

    /// Paths of the three files backing this segment, for snapshotting.
    #[must_use]
    pub fn file_paths(&self) -> [PathBuf; 3] {
        [
            self.current_log_path(),
            Self::index_path(&self.dir, self.base_offset),
            Self::timeindex_path(&self.dir, self.base_offset),
        ]
    }

    pub fn delete(&self) -> lumadb_common::Result<()> {
        for path in self.file_paths() {
            if path.exists() {
                std::fs::remove_file(path)?;
            }
        }
        Ok(())
    }
}

fn now_ms() -> Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as Timestamp
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn make_record(offset: Offset, timestamp: Timestamp, value: &str) -> Record {
        let mut record = Record::new(Bytes::copy_from_slice(value.as_bytes()), timestamp);
        record.offset = Some(offset);
        record
    }

    #[test]
    fn append_and_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut segment = Segment::create(dir.path(), 0, 1_000_000).unwrap();
        segment.append(&make_record(0, 100, "hello")).unwrap();
        segment.append(&make_record(1, 101, "world")).unwrap();

        let read = segment.read(0).unwrap();
        assert_eq!(read.value, Bytes::from_static(b"hello"));
        let read = segment.read(1).unwrap();
        assert_eq!(read.value, Bytes::from_static(b"world"));
        assert_eq!(segment.next_offset(), 2);
    }

    #[test]
    fn rejects_append_past_roll_size() {
        let dir = tempfile::tempdir().unwrap();
        let mut segment = Segment::create(dir.path(), 0, 32).unwrap();
        segment.append(&make_record(0, 1, "x")).unwrap();
        let err = segment.append(&make_record(1, 2, "this value is long enough to overflow"));
        assert!(err.is_err());
    }

    #[test]
    fn recovers_after_truncated_tail() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut segment = Segment::create(dir.path(), 0, 1_000_000).unwrap();
            segment.append(&make_record(0, 1, "good")).unwrap();
            segment.flush_indexes().unwrap();
        }
        let log_path = Segment::log_path(dir.path(), 0);
        let mut data = std::fs::read(&log_path).unwrap();
        data.extend_from_slice(&[1, 2, 3, 4, 5]);
        std::fs::write(&log_path, data).unwrap();

        let segment = Segment::open(dir.path(), 0, 1_000_000).unwrap();
        assert_eq!(segment.next_offset(), 1);
        assert!(segment.read(0).is_ok());
    }

    #[test]
    fn lookup_by_timestamp_finds_closest() {
        let dir = tempfile::tempdir().unwrap();
        let mut segment = Segment::create(dir.path(), 0, 1_000_000).unwrap();
        segment.append(&make_record(0, 100, "a")).unwrap();
        segment.append(&make_record(1, 200, "b")).unwrap();
        segment.append(&make_record(2, 300, "c")).unwrap();
        assert_eq!(segment.lookup_by_timestamp(150), Some(1));
        assert_eq!(segment.lookup_by_timestamp(300), Some(2));
    }
}
