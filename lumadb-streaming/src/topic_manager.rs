//! Local cache of cluster metadata and owner of this broker's `Log` instances
//! (spec §4.3).

use dashmap::DashMap;
use lumadb_common::error::{Error, ReplicationError};
use lumadb_common::{NodeId, Offset, PartitionId, PartitionMetadata, Timestamp};
use lumadb_storage::Log;
use lumadb_storage::log::LogConfig;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

type TopicPartition = (String, PartitionId);

/// Per-follower fetch progress, used to evaluate ISR eviction thresholds.
#[derive(Debug, Clone, Copy)]
struct FollowerProgress {
    last_fetch_time: Instant,
    last_fetched_offset: Offset,
    behind_since: Option<Instant>,
}

/// Defaults applied to every `Log` this broker opens, sourced from
/// `lumadb_common::config::LogConfig` (topic-level overrides committed via
/// `CreateTopic` take precedence when present).
#[derive(Debug, Clone)]
pub struct LogDefaults {
    pub segment_bytes: u64,
    pub segment_ms: u64,
    pub retention_ms: Option<u64>,
    pub retention_bytes: Option<u64>,
}

/// Holds this broker's local view of cluster metadata plus the `Log`
/// instances for every partition replica it hosts.
pub struct TopicManager {
    broker_id: NodeId,
    data_dir: PathBuf,
    defaults: LogDefaults,
    logs: DashMap<TopicPartition, Arc<Mutex<Log>>>,
    partitions: DashMap<TopicPartition, PartitionMetadata>,
    follower_progress: DashMap<(TopicPartition, NodeId), FollowerProgress>,
}

impl TopicManager {
    #[must_use]
    pub fn new(broker_id: NodeId, data_dir: PathBuf, defaults: LogDefaults) -> Self {
        Self {
            broker_id,
            data_dir,
            defaults,
            logs: DashMap::new(),
            partitions: DashMap::new(),
            follower_progress: DashMap::new(),
        }
    }

    fn partition_dir(&self, topic: &str, partition: PartitionId) -> PathBuf {
        self.data_dir.join(format!("{topic}-{partition}"))
    }

    fn log_config(&self) -> LogConfig {
        LogConfig {
            roll_size: self.defaults.segment_bytes,
            roll_ms: self.defaults.segment_ms,
            retention_ms: self.defaults.retention_ms,
            retention_bytes: self.defaults.retention_bytes,
        }
    }

    /// Apply a committed partition-metadata snapshot (from a `CreateTopic`,
    /// `AlterPartitionAssignment`, `UpdateIsr`, or `ElectLeader` command).
    /// Opens a `Log` for this partition if this broker newly joined the
    /// replica set and one isn't open yet.
    pub fn apply_partition_metadata(
        &self,
        topic: &str,
        meta: PartitionMetadata,
    ) -> lumadb_common::Result<()> {
        let key = (topic.to_string(), meta.id);
        let hosts_replica = meta.replicas.contains(&self.broker_id);

        if hosts_replica && !self.logs.contains_key(&key) {
            let dir = self.partition_dir(topic, meta.id);
            let log = Log::open(&dir, self.log_config())?;
            info!(topic, partition = meta.id, "opened local log for new replica assignment");
            self.logs.insert(key.clone(), Arc::new(Mutex::new(log)));
        }

        if let Some(log) = self.logs.get(&key) {
            log.lock().set_leader_epoch(meta.leader_epoch);
        }

        self.partitions.insert(key, meta);
        Ok(())
    }

    /// Read-path entry point: the `Log` for `(topic, partition)` if this
    /// broker is the current leader, else `NOT_LEADER`.
    pub fn get_log(
        &self,
        topic: &str,
        partition: PartitionId,
    ) -> lumadb_common::Result<Arc<Mutex<Log>>> {
        let key = (topic.to_string(), partition);
        let meta = self
            .partitions
            .get(&key)
            .ok_or_else(|| Error::Replication(ReplicationError::LeaderNotAvailable))?;
        if meta.leader != Some(self.broker_id) {
            return Err(Error::Replication(ReplicationError::NotLeader));
        }
        drop(meta);
        self.logs
            .get(&key)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::Replication(ReplicationError::LeaderNotAvailable))
    }

    /// Replica-path entry point: the `Log` regardless of leadership, used
    /// by the follower-fetcher and by recovery paths.
    pub fn get_replica_log(
        &self,
        topic: &str,
        partition: PartitionId,
    ) -> Option<Arc<Mutex<Log>>> {
        self.logs
            .get(&(topic.to_string(), partition))
            .map(|entry| Arc::clone(entry.value()))
    }

    #[must_use]
    pub fn partition_metadata(&self, topic: &str, partition: PartitionId) -> Option<PartitionMetadata> {
        self.partitions.get(&(topic.to_string(), partition)).map(|m| m.clone())
    }

    #[must_use]
    pub fn is_leader(&self, topic: &str, partition: PartitionId) -> bool {
        self.partitions
            .get(&(topic.to_string(), partition))
            .is_some_and(|m| m.leader == Some(self.broker_id))
    }

    /// Record a follower's fetch progress (called by the leader-serving
    /// side of the Replicator on every `Fetch`).
    pub fn track_follower_fetch(
        &self,
        topic: &str,
        partition: PartitionId,
        follower: NodeId,
        fetched_offset: Offset,
        log_end_offset: Offset,
        lag_max_messages: i64,
    ) {
        let now = Instant::now();
        let key = ((topic.to_string(), partition), follower);
        let behind = log_end_offset - fetched_offset > lag_max_messages;

        self.follower_progress
            .entry(key)
            .and_modify(|progress| {
                progress.last_fetch_time = now;
                progress.last_fetched_offset = fetched_offset;
                progress.behind_since = if behind {
                    progress.behind_since.or(Some(now))
                } else {
                    None
                };
            })
            .or_insert(FollowerProgress {
                last_fetch_time: now,
                last_fetched_offset: fetched_offset,
                behind_since: if behind { Some(now) } else { None },
            });
    }

    /// Evaluate which current ISR members (other than this leader) should
    /// be proposed for eviction: stale fetch time, or persistently behind
    /// by more than `lag_max_messages` for longer than `lag_time_max_ms`
    /// (spec §4.3).
    #[must_use]
    pub fn stale_isr_members(
        &self,
        topic: &str,
        partition: PartitionId,
        lag_time_max_ms: u64,
    ) -> Vec<NodeId> {
        let Some(meta) = self.partitions.get(&(topic.to_string(), partition)) else {
            return Vec::new();
        };
        let now = Instant::now();
        let mut stale = Vec::new();
        for &replica in &meta.isr {
            if Some(replica) == meta.leader {
                continue;
            }
            let key = ((topic.to_string(), partition), replica);
            match self.follower_progress.get(&key) {
                None => stale.push(replica),
                Some(progress) => {
                    let fetch_stale = now.duration_since(progress.last_fetch_time).as_millis() as u64
                        > lag_time_max_ms;
                    let lag_stale = progress
                        .behind_since
                        .is_some_and(|since| now.duration_since(since).as_millis() as u64 > lag_time_max_ms);
                    if fetch_stale || lag_stale {
                        stale.push(replica);
                    }
                }
            }
        }
        if !stale.is_empty() {
            warn!(topic, partition, ?stale, "proposing ISR eviction");
        }
        stale
    }

    /// Current ISR size for `(topic, partition)`, used to gate
    /// `acks=all` produces against `min.insync.replicas`.
    #[must_use]
    pub fn isr_len(&self, topic: &str, partition: PartitionId) -> usize {
        self.partitions
            .get(&(topic.to_string(), partition))
            .map_or(0, |m| m.isr.len())
    }

    /// `min(logEndOffset over all ISR members)`, the new high-watermark
    /// candidate (spec §4.4). `leader_log_end_offset` is this broker's own
    /// `logEndOffset`, since the leader doesn't track itself as a follower.
    #[must_use]
    pub fn min_isr_offset(
        &self,
        topic: &str,
        partition: PartitionId,
        leader_log_end_offset: Offset,
    ) -> Offset {
        let Some(meta) = self.partitions.get(&(topic.to_string(), partition)) else {
            return leader_log_end_offset;
        };
        let mut min_offset = leader_log_end_offset;
        for &replica in &meta.isr {
            if Some(replica) == meta.leader {
                continue;
            }
            let key = ((topic.to_string(), partition), replica);
            let offset = self
                .follower_progress
                .get(&key)
                .map_or(0, |p| p.last_fetched_offset);
            min_offset = min_offset.min(offset);
        }
        min_offset
    }

    #[must_use]
    pub fn hosted_partitions(&self) -> Vec<TopicPartition> {
        self.logs.iter().map(|entry| entry.key().clone()).collect()
    }

    #[must_use]
    pub fn current_timestamp_ms() -> Timestamp {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as Timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumadb_common::LeaderEpoch;

    fn defaults() -> LogDefaults {
        LogDefaults {
            segment_bytes: 1024 * 1024,
            segment_ms: 0,
            retention_ms: None,
            retention_bytes: None,
        }
    }

    fn meta(id: PartitionId, leader: NodeId, replicas: Vec<NodeId>, isr: Vec<NodeId>) -> PartitionMetadata {
        PartitionMetadata {
            id,
            leader: Some(leader),
            leader_epoch: 1 as LeaderEpoch,
            replicas,
            isr,
            low_watermark: 0,
            high_watermark: 0,
        }
    }

    #[test]
    fn opens_log_on_replica_assignment() {
        let dir = tempfile::tempdir().unwrap();
        let manager = TopicManager::new(1, dir.path().to_path_buf(), defaults());
        manager
            .apply_partition_metadata("orders", meta(0, 1, vec![1, 2], vec![1, 2]))
            .unwrap();
        assert!(manager.is_leader("orders", 0));
        assert!(manager.get_log("orders", 0).is_ok());
    }

    #[test]
    fn non_leader_get_log_fails() {
        let dir = tempfile::tempdir().unwrap();
        let manager = TopicManager::new(2, dir.path().to_path_buf(), defaults());
        manager
            .apply_partition_metadata("orders", meta(0, 1, vec![1, 2], vec![1, 2]))
            .unwrap();
        assert!(!manager.is_leader("orders", 0));
        assert!(manager.get_log("orders", 0).is_err());
        assert!(manager.get_replica_log("orders", 0).is_some());
    }

    #[test]
    fn stale_follower_detected_after_lag_time() {
        let dir = tempfile::tempdir().unwrap();
        let manager = TopicManager::new(1, dir.path().to_path_buf(), defaults());
        manager
            .apply_partition_metadata("orders", meta(0, 1, vec![1, 2], vec![1, 2]))
            .unwrap();
        // Follower 2 never fetched: immediately stale.
        let stale = manager.stale_isr_members("orders", 0, 0);
        assert_eq!(stale, vec![2]);

        manager.track_follower_fetch("orders", 0, 2, 10, 10, 1000);
        let stale = manager.stale_isr_members("orders", 0, 10_000);
        assert!(stale.is_empty());
    }
}
