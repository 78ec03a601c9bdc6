//! Behavioral request/response payloads for each in-scope API key
//! (spec §6.1). Wire compatibility with real Kafka clients is explicitly
//! out of scope; these are the server-side behaviors the core must
//! implement, encoded with bincode behind the generic frame in `frame.rs`.

use lumadb_common::{LeaderEpoch, NodeId, Offset, PartitionId, Record, Timestamp, TopicMetadata};
use serde::{Deserialize, Serialize};

pub const PRODUCE: i16 = 0;
pub const FETCH: i16 = 1;
pub const LIST_OFFSETS: i16 = 2;
pub const METADATA: i16 = 3;
pub const OFFSET_COMMIT: i16 = 8;
pub const OFFSET_FETCH: i16 = 9;
pub const FIND_COORDINATOR: i16 = 10;
pub const JOIN_GROUP: i16 = 11;
pub const HEARTBEAT: i16 = 12;
pub const LEAVE_GROUP: i16 = 13;
pub const SYNC_GROUP: i16 = 14;
pub const DESCRIBE_GROUPS: i16 = 15;
pub const LIST_GROUPS: i16 = 16;
pub const SASL_HANDSHAKE: i16 = 17;
pub const API_VERSIONS: i16 = 18;
pub const CREATE_TOPICS: i16 = 19;
pub const DELETE_TOPICS: i16 = 20;
pub const DELETE_RECORDS: i16 = 21;
pub const DESCRIBE_ACLS: i16 = 29;
pub const CREATE_ACLS: i16 = 30;
pub const DELETE_ACLS: i16 = 31;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AclSpec {
    pub principal: String,
    pub resource_type: String,
    pub resource_name: String,
    pub operation: String,
    pub allow: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicSpec {
    pub name: String,
    pub partitions: u32,
    pub replication_factor: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ApiRequest {
    Produce {
        topic: String,
        partition: PartitionId,
        key: Option<Vec<u8>>,
        value: Vec<u8>,
        headers: Vec<(String, Vec<u8>)>,
        acks: i16,
        timestamp: Option<Timestamp>,
    },
    Fetch {
        topic: String,
        partition: PartitionId,
        offset: Offset,
        max_bytes: u64,
        max_wait_ms: u32,
        /// `Some` when this fetch is a follower replicating, not a client.
        replica_id: Option<NodeId>,
        leader_epoch: LeaderEpoch,
    },
    ListOffsets {
        topic: String,
        partition: PartitionId,
        timestamp_or_sentinel: Timestamp,
    },
    Metadata {
        topics: Vec<String>,
    },
    OffsetCommit {
        group_id: String,
        generation: i32,
        offsets: Vec<(String, PartitionId, Offset, String)>,
    },
    OffsetFetch {
        group_id: String,
        partitions: Vec<(String, PartitionId)>,
    },
    FindCoordinator {
        group_id: String,
    },
    JoinGroup {
        group_id: String,
        member_id: Option<String>,
        client_id: String,
        session_timeout_ms: u64,
        rebalance_timeout_ms: u64,
        subscription: Vec<String>,
    },
    SyncGroup {
        group_id: String,
        member_id: String,
        generation: i32,
        assignments: Option<Vec<(String, Vec<(String, PartitionId)>)>>,
        partitions_per_topic: Vec<(String, u32)>,
    },
    Heartbeat {
        group_id: String,
        member_id: String,
        generation: i32,
    },
    LeaveGroup {
        group_id: String,
        member_id: String,
    },
    DescribeGroups {
        group_ids: Vec<String>,
    },
    ListGroups,
    CreateTopics {
        topics: Vec<TopicSpec>,
    },
    DeleteTopics {
        topics: Vec<String>,
    },
    DeleteRecords {
        topic: String,
        partition: PartitionId,
        before_offset: Offset,
    },
    SaslHandshake {
        mechanism: String,
    },
    ApiVersions,
    DescribeAcls,
    CreateAcls {
        entries: Vec<AclSpec>,
    },
    DeleteAcls {
        entries: Vec<AclSpec>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ApiResponse {
    Produce {
        error_code: i16,
        offset: Offset,
        timestamp: Timestamp,
    },
    Fetch {
        error_code: i16,
        high_watermark: Offset,
        leader_epoch: LeaderEpoch,
        diverge_to: Option<Offset>,
        records: Vec<Record>,
    },
    ListOffsets {
        error_code: i16,
        offset: Offset,
    },
    Metadata {
        controller_id: Option<NodeId>,
        topics: Vec<TopicMetadata>,
    },
    OffsetCommit {
        error_code: i16,
    },
    OffsetFetch {
        offsets: Vec<(String, PartitionId, Offset)>,
    },
    FindCoordinator {
        error_code: i16,
        node_id: NodeId,
    },
    JoinGroup {
        error_code: i16,
        generation: i32,
        leader_id: String,
        member_id: String,
        protocol: String,
        members: Vec<(String, Vec<String>)>,
    },
    SyncGroup {
        error_code: i16,
        assignment: Vec<(String, PartitionId)>,
    },
    Heartbeat {
        error_code: i16,
    },
    LeaveGroup {
        error_code: i16,
    },
    DescribeGroups {
        groups: Vec<String>,
    },
    ListGroups {
        groups: Vec<String>,
    },
    CreateTopics {
        error_code: i16,
    },
    DeleteTopics {
        error_code: i16,
    },
    DeleteRecords {
        error_code: i16,
        low_watermark: Offset,
    },
    SaslHandshake {
        error_code: i16,
        mechanisms: Vec<String>,
    },
    ApiVersions {
        api_keys: Vec<(i16, i16, i16)>,
    },
    Acls {
        error_code: i16,
    },
    Error {
        error_code: i16,
    },
}

/// `(apiKey, minVersion, maxVersion)` advertised by `ApiVersions`. Version
/// bounds are nominal — only one behavioral version of each API exists
/// here — but the shape matches what real clients expect to see.
#[must_use]
pub fn supported_api_versions() -> Vec<(i16, i16, i16)> {
    vec![
        (PRODUCE, 0, 0),
        (FETCH, 0, 0),
        (LIST_OFFSETS, 0, 0),
        (METADATA, 0, 0),
        (OFFSET_COMMIT, 0, 0),
        (OFFSET_FETCH, 0, 0),
        (FIND_COORDINATOR, 0, 0),
        (JOIN_GROUP, 0, 0),
        (HEARTBEAT, 0, 0),
        (LEAVE_GROUP, 0, 0),
        (SYNC_GROUP, 0, 0),
        (DESCRIBE_GROUPS, 0, 0),
        (LIST_GROUPS, 0, 0),
        (SASL_HANDSHAKE, 0, 0),
        (API_VERSIONS, 0, 0),
        (CREATE_TOPICS, 0, 0),
        (DELETE_TOPICS, 0, 0),
        (DELETE_RECORDS, 0, 0),
        (DESCRIBE_ACLS, 0, 0),
        (CREATE_ACLS, 0, 0),
        (DELETE_ACLS, 0, 0),
    ]
}
