//! Ordered sequence of segments for one partition (spec §4.2)

use crate::segment::{FileRegion, Segment};
use crate::snapshot::{SnapshotHandle, SnapshotManifest};
use lumadb_common::error::{Error, StorageError};
use lumadb_common::{LeaderEpoch, Offset, Record, Timestamp};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Sentinel meaning "the latest offset" (well-known -1 in `ListOffsets`).
pub const LATEST: Offset = -1;
/// Sentinel meaning "the earliest offset" (well-known -2 in `ListOffsets`).
pub const EARLIEST: Offset = -2;

/// Ordered, non-empty sequence of segments for one `(topic, partition)`.
/// Exactly one segment is active (writable, always the last). Append is
/// serialized by holding `&mut self` for the duration of the call, which
/// callers enforce with a per-partition lock (spec §5 single-writer).
pub struct Log {
    dir: PathBuf,
    segments: Vec<Segment>,
    roll_size: u64,
    roll_ms: u64,
    retention_ms: Option<u64>,
    retention_bytes: Option<u64>,
    leader_epoch: LeaderEpoch,
    high_watermark: RwLock<Offset>,
}

pub struct LogConfig {
    pub roll_size: u64,
    pub roll_ms: u64,
    pub retention_ms: Option<u64>,
    pub retention_bytes: Option<u64>,
}

impl Log {
    /// Open (or create, if `dir` is empty) the Log for one partition,
    /// scanning existing segment files in base-offset order.
    pub fn open(dir: &Path, config: LogConfig) -> lumadb_common::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let mut base_offsets = Self::discover_base_offsets(dir)?;
        base_offsets.sort_unstable();

        let mut segments = Vec::with_capacity(base_offsets.len().max(1));
        for base_offset in &base_offsets {
            segments.push(Segment::open(dir, *base_offset, config.roll_size)?);
        }
        if segments.is_empty() {
            segments.push(Segment::create(dir, 0, config.roll_size)?);
        }

        let high_watermark = segments.last().map(Segment::next_offset).unwrap_or(0);

        Ok(Self {
            dir: dir.to_path_buf(),
            segments,
            roll_size: config.roll_size,
            roll_ms: config.roll_ms,
            retention_ms: config.retention_ms,
            retention_bytes: config.retention_bytes,
            leader_epoch: 0,
            high_watermark: RwLock::new(high_watermark),
        })
    }

    fn discover_base_offsets(dir: &Path) -> lumadb_common::Result<Vec<Offset>> {
        let mut offsets = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("log") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    if let Ok(offset) = stem.parse::<Offset>() {
                        offsets.push(offset);
                    }
                }
            }
        }
        Ok(offsets)
    }

    #[must_use]
    pub fn base_offset(&self) -> Offset {
        self.segments.first().map(Segment::base_offset).unwrap_or(0)
    }

    #[must_use]
    pub fn log_end_offset(&self) -> Offset {
        self.active_segment().next_offset()
    }

    #[must_use]
    pub fn high_watermark(&self) -> Offset {
        *self.high_watermark.read()
    }

    /// Advance the high-watermark. Owned by the Replicator; the Log never
    /// moves it itself (spec §4.2). Enforces the monotonic invariant.
    pub fn advance_high_watermark(&self, new_hwm: Offset) {
        let mut hwm = self.high_watermark.write();
        if new_hwm > *hwm {
            *hwm = new_hwm;
        }
    }

    #[must_use]
    pub fn leader_epoch(&self) -> LeaderEpoch {
        self.leader_epoch
    }

    pub fn set_leader_epoch(&mut self, epoch: LeaderEpoch) {
        self.leader_epoch = epoch;
    }

    fn active_segment(&self) -> &Segment {
        self.segments.last().expect("log always has >=1 segment")
    }

    fn active_segment_mut(&mut self) -> &mut Segment {
        self.segments.last_mut().expect("log always has >=1 segment")
    }

    /// Roll a new active segment based on `log_end_offset`, flushing the
    /// outgoing segment's indexes first (spec §4.2 roll triggers).
    fn roll(&mut self) -> lumadb_common::Result<()> {
        let new_base = self.active_segment().next_offset();
        self.active_segment().flush_indexes()?;
        let segment = Segment::create(&self.dir, new_base, self.roll_size)?;
        self.segments.push(segment);
        info!(base_offset = new_base, "rolled new active segment");
        Ok(())
    }

    fn should_roll(&self, incoming_size: u64) -> bool {
        let active = self.active_segment();
        if active.size() + incoming_size > self.roll_size {
            return true;
        }
        let age_ms = now_ms().saturating_sub(active.created_at_ms());
        self.roll_ms > 0 && age_ms as u64 >= self.roll_ms
    }

    /// Leader-path append: assigns the next offset and timestamp, appending
    /// to the active segment and rolling exactly once on `SegmentFull`.
    pub fn append(
        &mut self,
        key: Option<bytes::Bytes>,
        value: bytes::Bytes,
        headers: Vec<lumadb_common::Header>,
        timestamp: Option<Timestamp>,
    ) -> lumadb_common::Result<Offset> {
        let offset = self.active_segment().next_offset();
        let mut record = Record::new(value, timestamp.unwrap_or_else(now_ms));
        record.key = key;
        record.headers = headers;
        record.offset = Some(offset);

        if self.should_roll(record.approx_size() as u64) {
            self.roll()?;
        }

        match self.active_segment_mut().append(&record) {
            Ok(_) => Ok(offset),
            Err(Error::Storage(StorageError::SegmentFull)) => {
                self.roll()?;
                self.active_segment_mut().append(&record)?;
                Ok(offset)
            }
            Err(e) => Err(e),
        }
    }

    /// Follower-path append: records arrive with offsets pre-assigned by
    /// the leader and must be strictly contiguous (spec §4.2).
    pub fn append_replicated(
        &mut self,
        records: Vec<Record>,
        leader_epoch: LeaderEpoch,
    ) -> lumadb_common::Result<()> {
        if leader_epoch < self.leader_epoch {
            return Err(Error::Replication(
                lumadb_common::error::ReplicationError::FencedLeaderEpoch {
                    expected: self.leader_epoch,
                    actual: leader_epoch,
                },
            ));
        }
        self.leader_epoch = leader_epoch;

        for record in records {
            let expected = self.active_segment().next_offset();
            let actual = record.offset.ok_or_else(|| {
                Error::Storage(StorageError::ReadFailed("replicated record missing offset".into()))
            })?;
            if actual != expected {
                return Err(Error::Storage(StorageError::OffsetOutOfOrder {
                    expected,
                    actual,
                }));
            }
            if self.should_roll(record.approx_size() as u64) {
                self.roll()?;
            }
            match self.active_segment_mut().append(&record) {
                Ok(_) => {}
                Err(Error::Storage(StorageError::SegmentFull)) => {
                    self.roll()?;
                    self.active_segment_mut().append(&record)?;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Truncate the log to `offset` (exclusive), used for log-divergence
    /// recovery after a fenced leader epoch (spec §4.4).
    pub fn truncate_to(&mut self, offset: Offset) -> lumadb_common::Result<()> {
        while self.segments.len() > 1 && self.segments[self.segments.len() - 1].base_offset() >= offset {
            let removed = self.segments.pop().unwrap();
            removed.delete()?;
        }
        self.active_segment_mut().truncate_to(offset)
    }

    fn find_segment(&self, offset: Offset) -> Option<&Segment> {
        match self
            .segments
            .binary_search_by_key(&offset, Segment::base_offset)
        {
            Ok(idx) => Some(&self.segments[idx]),
            Err(0) => None,
            Err(idx) => Some(&self.segments[idx - 1]),
        }
    }

    /// Consumer-visible read: fails with `OffsetOutOfRange` above the
    /// high-watermark (spec §4.2).
    pub fn read(&self, offset: Offset) -> lumadb_common::Result<Record> {
        if offset >= self.high_watermark() {
            return Err(Error::Storage(StorageError::OffsetOutOfRange(offset)));
        }
        self.read_unchecked(offset)
    }

    /// Internal/replication read: no high-watermark bound (used by
    /// followers reading their own appended-but-not-yet-committed tail and
    /// by the leader serving follower fetches).
    pub fn read_unchecked(&self, offset: Offset) -> lumadb_common::Result<Record> {
        let segment = self
            .find_segment(offset)
            .ok_or_else(|| Error::Storage(StorageError::OffsetOutOfRange(offset)))?;
        if !segment.is_readable() {
            warn!(offset, "read against quarantined segment");
            return Err(Error::Storage(StorageError::CorruptSegment(segment.base_offset())));
        }
        segment.read(offset)
    }

    /// Zero-copy read region for network transfer (spec §4.1 `ReadRange`).
    pub fn read_range(&self, offset: Offset, max_bytes: u64) -> lumadb_common::Result<FileRegion> {
        if offset == self.log_end_offset() {
            return Ok(FileRegion {
                path: self.dir.join("empty"),
                position: 0,
                length: 0,
            });
        }
        let segment = self
            .find_segment(offset)
            .ok_or_else(|| Error::Storage(StorageError::OffsetOutOfRange(offset)))?;
        segment.read_range(offset, max_bytes)
    }

    /// `ListOffsets` resolution: well-known sentinels or a timestamp lookup.
    pub fn list_offset(&self, timestamp_or_sentinel: Timestamp) -> lumadb_common::Result<Offset> {
        match timestamp_or_sentinel {
            LATEST => Ok(self.log_end_offset()),
            EARLIEST => Ok(self.base_offset()),
            target => {
                for segment in &self.segments {
                    if let Some(offset) = segment.lookup_by_timestamp(target) {
                        return Ok(offset);
                    }
                }
                Ok(self.log_end_offset())
            }
        }
    }

    /// Evaluate time then size retention, deleting whole segments (never
    /// the active one) and advancing `baseOffset` (spec §4.2).
    pub fn apply_retention(&mut self, now: Timestamp) -> lumadb_common::Result<usize> {
        let mut deleted = 0;

        if let Some(retention_ms) = self.retention_ms {
            while self.segments.len() > 1 {
                let oldest = &self.segments[0];
                if now.saturating_sub(oldest.max_timestamp()) as u64 > retention_ms {
                    let removed = self.segments.remove(0);
                    removed.delete()?;
                    deleted += 1;
                } else {
                    break;
                }
            }
        }

        if let Some(retention_bytes) = self.retention_bytes {
            while self.segments.len() > 1 {
                let total: u64 = self.segments.iter().map(Segment::size).sum();
                if total > retention_bytes {
                    let removed = self.segments.remove(0);
                    removed.delete()?;
                    deleted += 1;
                } else {
                    break;
                }
            }
        }

        Ok(deleted)
    }

    /// Atomically record current segment file paths + offsets under a
    /// snapshot directory (spec §4.2 `CreateSnapshot`).
    pub fn create_snapshot(&self, snapshots_dir: &Path) -> lumadb_common::Result<SnapshotHandle> {
        let id = format!("snapshot-{}", now_ms());
        let target_dir = snapshots_dir.join(&id);
        std::fs::create_dir_all(&target_dir)?;

        let mut segment_base_offsets = Vec::new();
        let mut total_size = 0u64;
        for segment in &self.segments {
            segment.flush_indexes()?;
            for path in segment.file_paths() {
                if path.exists() {
                    let dest = target_dir.join(path.file_name().unwrap());
                    std::fs::hard_link(&path, &dest)
                        .or_else(|_| std::fs::copy(&path, &dest).map(|_| ()))?;
                }
            }
            segment_base_offsets.push(segment.base_offset());
            total_size += segment.size();
        }

        let manifest_entry = SnapshotManifest {
            id: id.clone(),
            timestamp: now_ms(),
            high_watermark: self.high_watermark(),
            segment_base_offsets,
            total_size,
        };
        crate::snapshot::append_manifest_entry(snapshots_dir, &manifest_entry)?;

        Ok(SnapshotHandle {
            id,
            dir: target_dir,
        })
    }

    /// Reconstitute a Log into an empty target directory from a snapshot,
    /// without requiring replay (spec §4.2 `RestoreSnapshot`).
    pub fn restore_snapshot(
        snapshot_dir: &Path,
        target_dir: &Path,
        config: LogConfig,
    ) -> lumadb_common::Result<Self> {
        std::fs::create_dir_all(target_dir)?;
        for entry in std::fs::read_dir(snapshot_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_file() {
                let dest = target_dir.join(path.file_name().unwrap());
                std::fs::copy(&path, &dest)?;
            }
        }
        Self::open(target_dir, config)
    }

    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.segments.len()
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

    fn default_config() -> LogConfig {
        LogConfig {
            roll_size: 1024,
            roll_ms: 0,
            retention_ms: None,
            retention_bytes: None,
        }
    }

    #[test]
    fn append_monotonicity() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = Log::open(dir.path(), default_config()).unwrap();
        let o0 = log.append(None, Bytes::from_static(b"a"), vec![], None).unwrap();
        let o1 = log.append(None, Bytes::from_static(b"b"), vec![], None).unwrap();
        assert_eq!(o0, 0);
        assert_eq!(o1, 1);
    }

    #[test]
    fn fetch_at_log_end_offset_is_empty_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let log = Log::open(dir.path(), default_config()).unwrap();
        let region = log.read_range(log.log_end_offset(), 1024).unwrap();
        assert_eq!(region.length, 0);
    }

    #[test]
    fn fetch_above_log_end_offset_is_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let log = Log::open(dir.path(), default_config()).unwrap();
        assert!(log.read_range(log.log_end_offset() + 5, 1024).is_err());
    }

    #[test]
    fn read_above_high_watermark_is_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = Log::open(dir.path(), default_config()).unwrap();
        log.append(None, Bytes::from_static(b"a"), vec![], None).unwrap();
        assert!(log.read(0).is_err());
        log.advance_high_watermark(1);
        assert!(log.read(0).is_ok());
    }

    #[test]
    fn segment_rolls_at_configured_size() {
        let dir = tempfile::tempdir().unwrap();
        let config = LogConfig {
            roll_size: 128,
            roll_ms: 0,
            retention_ms: None,
            retention_bytes: None,
        };
        let mut log = Log::open(dir.path(), config).unwrap();
        for _ in 0..20 {
            log.append(None, Bytes::from_static(b"0123456789"), vec![], None)
                .unwrap();
        }
        assert!(log.segment_count() > 1);
    }

    #[test]
    fn snapshot_restore_matches_original() {
        let src_dir = tempfile::tempdir().unwrap();
        let mut log = Log::open(src_dir.path(), default_config()).unwrap();
        for i in 0..5 {
            log.append(None, Bytes::from(format!("v{i}")), vec![], None)
                .unwrap();
        }
        log.advance_high_watermark(5);

        let snapshots_dir = src_dir.path().join(".snapshots");
        std::fs::create_dir_all(&snapshots_dir).unwrap();
        let handle = log.create_snapshot(&snapshots_dir).unwrap();

        let restore_dir = tempfile::tempdir().unwrap();
        let restored = Log::restore_snapshot(&handle.dir, restore_dir.path(), default_config()).unwrap();

        for i in 0..5 {
            assert_eq!(
                restored.read_unchecked(i).unwrap().value,
                log.read_unchecked(i).unwrap().value
            );
        }
    }
}
