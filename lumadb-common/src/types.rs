//! Common type definitions for the LumaDB broker core

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Timestamp in milliseconds since Unix epoch
pub type Timestamp = i64;

/// Offset type for log positions. -1 and -2 are reserved (latest/earliest).
pub type Offset = i64;

/// Partition identifier
pub type PartitionId = i32;

/// Broker / node identifier
pub type NodeId = u64;

/// Term number for Raft consensus
pub type Term = u64;

/// Log index for Raft consensus
pub type LogIndex = u64;

/// Leader epoch, incremented on every partition leader change (spec §4.4, §9)
pub type LeaderEpoch = i32;

/// Consumer group generation, incremented on every successful rebalance
pub type Generation = i32;

// ============================================================================
// Record types (spec §3)
// ============================================================================

/// A record header: an ordered (name, value) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: Bytes,
}

/// The atomic unit of the log. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Assigned by the Log on append; `None` until then.
    pub offset: Option<Offset>,
    pub timestamp: Timestamp,
    pub key: Option<Bytes>,
    pub value: Bytes,
    pub headers: Vec<Header>,
}

impl Record {
    pub fn new(value: impl Into<Bytes>, timestamp: Timestamp) -> Self {
        Self {
            offset: None,
            timestamp,
            key: None,
            value: value.into(),
            headers: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_key(mut self, key: impl Into<Bytes>) -> Self {
        self.key = Some(key.into());
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<Bytes>) -> Self {
        self.headers.push(Header {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    /// Size of the encoded record body, excluding the CRC/header framing
    /// (used by the adaptive batcher and segment roll threshold checks).
    #[must_use]
    pub fn approx_size(&self) -> usize {
        let key_len = self.key.as_ref().map_or(0, Bytes::len);
        let header_len: usize = self
            .headers
            .iter()
            .map(|h| h.name.len() + h.value.len() + 6)
            .sum();
        24 + key_len + self.value.len() + header_len
    }
}

/// Metadata returned to a producer after a successful append.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub topic: String,
    pub partition: PartitionId,
    pub offset: Offset,
    pub timestamp: Timestamp,
}

// ============================================================================
// Topic / partition types (spec §3, §4.3)
// ============================================================================

/// Topic configuration as committed by RaftMetadata's `CreateTopic` command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicConfig {
    pub name: String,
    pub partitions: u32,
    pub replication_factor: u32,
    pub retention_ms: Option<u64>,
    pub retention_bytes: Option<u64>,
    pub segment_bytes: Option<u64>,
    pub min_insync_replicas: Option<u32>,
    pub is_internal: bool,
    pub config: HashMap<String, String>,
}

impl TopicConfig {
    pub fn new(name: impl Into<String>, partitions: u32, replication_factor: u32) -> Self {
        Self {
            name: name.into(),
            partitions,
            replication_factor,
            retention_ms: None,
            retention_bytes: None,
            segment_bytes: None,
            min_insync_replicas: None,
            is_internal: false,
            config: HashMap::new(),
        }
    }
}

/// Snapshot of a topic's metadata, as served by the Metadata API (spec §6.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicMetadata {
    pub name: String,
    pub partitions: Vec<PartitionMetadata>,
    pub is_internal: bool,
}

/// Snapshot of one partition's replica/ISR/watermark state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionMetadata {
    pub id: PartitionId,
    pub leader: Option<NodeId>,
    pub leader_epoch: LeaderEpoch,
    pub replicas: Vec<NodeId>,
    pub isr: Vec<NodeId>,
    pub low_watermark: Offset,
    pub high_watermark: Offset,
}

// ============================================================================
// Cluster types (spec §4.5)
// ============================================================================

/// Broker registration as tracked by RaftMetadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: NodeId,
    pub address: String,
    pub status: NodeStatus,
    pub last_heartbeat: Timestamp,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NodeStatus {
    Online,
    Offline,
    Joining,
    Leaving,
}

/// An ACL entry as committed by `PutACL`/`DeleteACL` (spec §4.5).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AclEntry {
    pub principal: String,
    pub resource_type: String,
    pub resource_name: String,
    pub operation: String,
    pub allow: bool,
}

/// Cluster-wide status snapshot (used by the Metadata API response).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterStatus {
    pub cluster_id: String,
    pub controller_id: Option<NodeId>,
    pub brokers: Vec<NodeInfo>,
}
