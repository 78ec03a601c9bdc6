//! Integration tests for LumaDB
//!
//! These exercise the testable properties from the broker core
//! specification end to end, across the storage, streaming, and
//! coordinator layers together rather than unit-testing any one of them.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tempfile::TempDir;

use lumadb_common::{NodeId, PartitionId, PartitionMetadata};
use lumadb_storage::log::{Log, LogConfig, EARLIEST, LATEST};
use lumadb_streaming::coordinator::{AssignmentStrategy, CoordinatorConfig, GroupCoordinator};
use lumadb_streaming::replicator::{Acks, FetchRequest, FetchResponse, ReplicaTransport, Replicator, ReplicatorConfig};
use lumadb_streaming::topic_manager::{LogDefaults, TopicManager};

/// No peers in these tests: every partition is replication-factor-1, so
/// the replicator never needs to dial out.
struct NoopTransport;

#[async_trait]
impl ReplicaTransport for NoopTransport {
    async fn fetch(&self, _leader: NodeId, _request: FetchRequest) -> lumadb_common::Result<FetchResponse> {
        Err(lumadb_common::error::Error::Replication(
            lumadb_common::error::ReplicationError::LeaderNotAvailable,
        ))
    }
}

fn solo_leader_meta(partition: PartitionId, broker_id: NodeId) -> PartitionMetadata {
    PartitionMetadata {
        id: partition,
        leader: Some(broker_id),
        leader_epoch: 0,
        replicas: vec![broker_id],
        isr: vec![broker_id],
        low_watermark: 0,
        high_watermark: 0,
    }
}

fn test_topic_manager(data_dir: &std::path::Path, broker_id: NodeId, defaults: LogDefaults) -> TopicManager {
    TopicManager::new(broker_id, data_dir.to_path_buf(), defaults)
}

fn test_replicator(topic_manager: Arc<TopicManager>, broker_id: NodeId) -> Replicator {
    Replicator::new(
        broker_id,
        topic_manager,
        Arc::new(NoopTransport),
        ReplicatorConfig {
            fetch_max_wait: std::time::Duration::from_millis(500),
            replica_lag_time_max_ms: 10_000,
            min_insync_replicas: 1,
            request_timeout: std::time::Duration::from_secs(2),
        },
    )
}

// ============================================================================
// S1: Produce/fetch roundtrip
// ============================================================================

#[tokio::test]
async fn produce_fetch_roundtrip_advances_high_watermark() {
    let temp_dir = TempDir::new().expect("temp dir");
    let broker_id = 1;
    let topic_manager = Arc::new(test_topic_manager(
        temp_dir.path(),
        broker_id,
        LogDefaults {
            segment_bytes: 1024 * 1024,
            segment_ms: 0,
            retention_ms: None,
            retention_bytes: None,
        },
    ));
    topic_manager
        .apply_partition_metadata("orders", solo_leader_meta(0, broker_id))
        .expect("apply metadata");

    let replicator = test_replicator(topic_manager.clone(), broker_id);

    let offset = replicator
        .produce(
            "orders",
            0,
            None,
            Bytes::from_static(b"hello"),
            Vec::new(),
            None,
            Acks::All,
        )
        .await
        .expect("produce");
    assert_eq!(offset, 0);

    let log = topic_manager.get_log("orders", 0).expect("log");
    let log = log.lock();
    assert_eq!(log.high_watermark(), 1);
    let record = log.read(0).expect("read back");
    assert_eq!(record.value, Bytes::from_static(b"hello"));
}

#[tokio::test]
async fn produce_acks_all_rejects_when_isr_below_min_insync() {
    let temp_dir = TempDir::new().expect("temp dir");
    let broker_id = 1;
    let topic_manager = Arc::new(test_topic_manager(
        temp_dir.path(),
        broker_id,
        LogDefaults {
            segment_bytes: 1024 * 1024,
            segment_ms: 0,
            retention_ms: None,
            retention_bytes: None,
        },
    ));
    // ISR only has the leader, but min.insync.replicas demands 2.
    topic_manager
        .apply_partition_metadata("orders", solo_leader_meta(0, broker_id))
        .expect("apply metadata");

    let replicator = Replicator::new(
        broker_id,
        topic_manager,
        Arc::new(NoopTransport),
        ReplicatorConfig {
            fetch_max_wait: std::time::Duration::from_millis(500),
            replica_lag_time_max_ms: 10_000,
            min_insync_replicas: 2,
            request_timeout: std::time::Duration::from_secs(1),
        },
    );

    let result = replicator
        .produce("orders", 0, None, Bytes::from_static(b"x"), Vec::new(), None, Acks::All)
        .await;
    assert!(matches!(
        result,
        Err(lumadb_common::error::Error::Replication(
            lumadb_common::error::ReplicationError::NotEnoughReplicas { .. }
        ))
    ));
}

// ============================================================================
// S2: Segment roll
// ============================================================================

#[tokio::test]
async fn segment_rolls_when_roll_size_exceeded() {
    let temp_dir = TempDir::new().expect("temp dir");
    let mut log = Log::open(
        temp_dir.path(),
        LogConfig {
            roll_size: 2048,
            roll_ms: 0,
            retention_ms: None,
            retention_bytes: None,
        },
    )
    .expect("open log");

    let payload = vec![7u8; 30];
    for _ in 0..40 {
        log.append(None, Bytes::from(payload.clone()), Vec::new(), Some(0))
            .expect("append");
    }

    assert_eq!(log.segment_count(), 2, "40 records at ~66B on-disk each must roll exactly once past a 2KiB segment");

    let mut base_offsets: Vec<i64> = std::fs::read_dir(temp_dir.path())
        .expect("read log dir")
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let path = entry.path();
            (path.extension().and_then(|e| e.to_str()) == Some("log"))
                .then(|| path.file_stem().and_then(|s| s.to_str())?.parse::<i64>().ok())
                .flatten()
        })
        .collect();
    base_offsets.sort_unstable();
    assert_eq!(base_offsets.len(), 2);
    assert_eq!(base_offsets[0], 0);
    assert!(
        (20..=35).contains(&base_offsets[1]),
        "rolled segment's base offset {} must fall within [20, 35]",
        base_offsets[1]
    );

    assert_eq!(log.list_offset(EARLIEST).expect("earliest"), 0);
    assert_eq!(log.list_offset(LATEST).expect("latest"), 40);
}

// ============================================================================
// S3: Retention
// ============================================================================

#[tokio::test]
async fn retention_deletes_segments_older_than_retention_ms() {
    let temp_dir = TempDir::new().expect("temp dir");
    let mut log = Log::open(
        temp_dir.path(),
        LogConfig {
            roll_size: 256,
            roll_ms: 0,
            retention_ms: Some(500),
            retention_bytes: None,
        },
    )
    .expect("open log");

    // Old records, timestamped far in the past relative to `now` below.
    for _ in 0..10 {
        log.append(None, Bytes::from_static(b"old-record-payload"), Vec::new(), Some(0))
            .expect("append old");
    }
    let earliest_before = log.list_offset(EARLIEST).expect("earliest before");

    // A fresh record forces a roll so the old segments aren't the active one.
    let now = 10_000i64;
    log.append(None, Bytes::from_static(b"fresh-record-payload"), Vec::new(), Some(now))
        .expect("append fresh");

    let deleted = log.apply_retention(now + 700).expect("apply retention");
    assert!(deleted > 0, "segments older than retention_ms must be deleted");

    let earliest_after = log.list_offset(EARLIEST).expect("earliest after");
    assert!(earliest_after > earliest_before, "base offset must advance past the deleted segments");
}

// ============================================================================
// S4: ISR shrink under follower lag
// ============================================================================

#[tokio::test]
async fn isr_shrink_lets_acks_all_succeed_without_lagging_follower() {
    let temp_dir = TempDir::new().expect("temp dir");
    let broker_id = 1;
    let lagging_follower: NodeId = 2;
    let topic_manager = Arc::new(test_topic_manager(
        temp_dir.path(),
        broker_id,
        LogDefaults {
            segment_bytes: 1024 * 1024,
            segment_ms: 0,
            retention_ms: None,
            retention_bytes: None,
        },
    ));

    let full_isr = PartitionMetadata {
        id: 0,
        leader: Some(broker_id),
        leader_epoch: 0,
        replicas: vec![broker_id, lagging_follower],
        isr: vec![broker_id, lagging_follower],
        low_watermark: 0,
        high_watermark: 0,
    };
    topic_manager
        .apply_partition_metadata("orders", full_isr)
        .expect("apply metadata");

    let replicator = Replicator::new(
        broker_id,
        topic_manager.clone(),
        Arc::new(NoopTransport),
        ReplicatorConfig {
            fetch_max_wait: std::time::Duration::from_millis(50),
            replica_lag_time_max_ms: 10_000,
            min_insync_replicas: 1,
            request_timeout: std::time::Duration::from_millis(200),
        },
    );

    // The follower never fetches: min_isr_offset is pinned at 0 while it's
    // still in the ISR, so acks=all never commits.
    let stuck = replicator
        .produce("orders", 0, None, Bytes::from_static(b"a"), Vec::new(), None, Acks::All)
        .await;
    assert!(matches!(
        stuck,
        Err(lumadb_common::error::Error::Replication(
            lumadb_common::error::ReplicationError::RequestTimedOut
        ))
    ));

    assert!(topic_manager
        .stale_isr_members("orders", 0, 0)
        .contains(&lagging_follower));

    // Metadata committed to shrink the ISR down to the leader alone.
    let shrunk_isr = PartitionMetadata {
        id: 0,
        leader: Some(broker_id),
        leader_epoch: 0,
        replicas: vec![broker_id, lagging_follower],
        isr: vec![broker_id],
        low_watermark: 0,
        high_watermark: 0,
    };
    topic_manager
        .apply_partition_metadata("orders", shrunk_isr)
        .expect("apply shrunk metadata");

    let offset = replicator
        .produce("orders", 0, None, Bytes::from_static(b"b"), Vec::new(), None, Acks::All)
        .await
        .expect("produce after ISR shrink");
    assert_eq!(offset, 1);
}

// ============================================================================
// S5: Consumer group rebalance
// ============================================================================

#[tokio::test]
async fn consumer_group_rebalance_assigns_and_then_rejects_stale_generation() {
    let temp_dir = TempDir::new().expect("temp dir");
    let broker_id = 1;
    let topic_manager = Arc::new(test_topic_manager(
        temp_dir.path(),
        broker_id,
        LogDefaults {
            segment_bytes: 1024 * 1024,
            segment_ms: 0,
            retention_ms: None,
            retention_bytes: None,
        },
    ));
    let coordinator = GroupCoordinator::new(
        topic_manager,
        CoordinatorConfig {
            default_session_timeout_ms: 10_000,
            default_rebalance_timeout_ms: 10_000,
            assignment_strategy: AssignmentStrategy::RoundRobin,
        },
    );

    let joined = coordinator
        .join_group(
            "billing-group",
            None,
            "billing-consumer",
            "127.0.0.1",
            10_000,
            10_000,
            vec!["orders".to_string()],
        )
        .expect("join group");
    assert_eq!(joined.generation, 1);
    assert_eq!(joined.leader_id, joined.member_id);

    let mut partitions_per_topic = HashMap::new();
    partitions_per_topic.insert("orders".to_string(), 4u32);

    let synced = coordinator
        .sync_group("billing-group", &joined.member_id, joined.generation, None, &partitions_per_topic)
        .await
        .expect("sync group");
    assert_eq!(synced.assignment.len(), 4, "sole member gets all four partitions");

    coordinator
        .offset_commit(
            "billing-group",
            joined.generation,
            vec![("orders".to_string(), 0, 100, String::new())],
        )
        .expect("commit at current generation");

    let fetched = coordinator.offset_fetch("billing-group", &[("orders".to_string(), 0)]);
    assert_eq!(fetched, vec![("orders".to_string(), 0, 100)]);

    let stale = coordinator.offset_commit(
        "billing-group",
        joined.generation - 1,
        vec![("orders".to_string(), 0, 200, String::new())],
    );
    assert!(matches!(
        stale,
        Err(lumadb_common::error::Error::Group(
            lumadb_common::error::GroupError::IllegalGeneration { .. }
        ))
    ));
}

// ============================================================================
// S6: Snapshot restore
// ============================================================================

#[tokio::test]
async fn snapshot_restore_reproduces_log_state_byte_for_byte() {
    let source_dir = TempDir::new().expect("source dir");
    let snapshots_dir = TempDir::new().expect("snapshots dir");
    let restore_dir = TempDir::new().expect("restore dir");

    let config = LogConfig {
        roll_size: 64 * 1024,
        roll_ms: 0,
        retention_ms: None,
        retention_bytes: None,
    };
    let mut log = Log::open(source_dir.path(), config).expect("open source log");
    for i in 0..1000u32 {
        log.append(None, Bytes::from(i.to_le_bytes().to_vec()), Vec::new(), Some(0))
            .expect("append");
    }
    log.advance_high_watermark(log.log_end_offset());

    let handle = log.create_snapshot(snapshots_dir.path()).expect("create snapshot");

    let restore_config = LogConfig {
        roll_size: 64 * 1024,
        roll_ms: 0,
        retention_ms: None,
        retention_bytes: None,
    };
    let restored = Log::restore_snapshot(&handle.dir, restore_dir.path(), restore_config).expect("restore snapshot");

    assert_eq!(restored.log_end_offset(), 1000);
    assert_eq!(restored.high_watermark(), 1000);

    for i in 0..1000 {
        let original = log.read_unchecked(i).expect("read original");
        let copy = restored.read_unchecked(i).expect("read restored");
        assert_eq!(original.value, copy.value);
        assert_eq!(original.offset, copy.offset);
    }
}
