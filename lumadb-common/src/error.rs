//! Error types for the LumaDB broker core
//!
//! Provides a unified error hierarchy plus the stable, wire-visible Kafka
//! error-code taxonomy described in spec §7.

use thiserror::Error;

/// Result type alias using the broker's `Error` type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the broker core
#[derive(Error, Debug)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Replication error: {0}")]
    Replication(#[from] ReplicationError),

    #[error("Raft error: {0}")]
    Raft(#[from] RaftError),

    #[error("Group coordinator error: {0}")]
    Group(#[from] GroupError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Storage-related errors (§4.1, §4.2)
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("segment is full")]
    SegmentFull,

    #[error("offset out of range: {0}")]
    OffsetOutOfRange(i64),

    #[error("offset out of order: expected {expected}, got {actual}")]
    OffsetOutOfOrder { expected: i64, actual: i64 },

    #[error("corrupt segment at base offset {0}")]
    CorruptSegment(i64),

    #[error("segment not found for offset {0}")]
    SegmentNotFound(i64),

    #[error("snapshot not found: {0}")]
    SnapshotNotFound(String),

    #[error("write failed: {0}")]
    WriteFailed(String),

    #[error("read failed: {0}")]
    ReadFailed(String),
}

/// Replication-related errors (§4.4)
#[derive(Error, Debug)]
pub enum ReplicationError {
    #[error("not leader for this partition")]
    NotLeader,

    #[error("leader not available")]
    LeaderNotAvailable,

    #[error("fenced leader epoch: expected {expected}, got {actual}")]
    FencedLeaderEpoch { expected: i32, actual: i32 },

    #[error("not enough in-sync replicas: have {have}, need {need}")]
    NotEnoughReplicas { have: usize, need: usize },

    #[error("request timed out waiting for acknowledgement")]
    RequestTimedOut,
}

/// Raft metadata plane errors (§4.5)
#[derive(Error, Debug)]
pub enum RaftError {
    #[error("not the metadata leader; retry against the leader")]
    NotMetadataLeader,

    #[error("raft quorum unreachable within timeout")]
    Timeout,

    #[error("stale term: local {local}, request {request}")]
    StaleTerm { local: u64, request: u64 },

    #[error("topic already exists: {0}")]
    TopicAlreadyExists(String),

    #[error("unknown topic or partition: {0}")]
    UnknownTopicOrPartition(String),
}

/// Consumer group coordinator errors (§4.6)
#[derive(Error, Debug)]
pub enum GroupError {
    #[error("rebalance in progress")]
    RebalanceInProgress,

    #[error("illegal generation: expected {expected}, got {actual}")]
    IllegalGeneration { expected: i32, actual: i32 },

    #[error("unknown member id: {0}")]
    UnknownMemberId(String),

    #[error("not coordinator for this group")]
    NotCoordinator,

    #[error("coordinator still loading group state")]
    CoordinatorLoadInProgress,

    #[error("group is dead: {0}")]
    GroupDead(String),
}

/// Wire protocol errors (§6.1)
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("invalid message format: {0}")]
    InvalidFormat(String),

    #[error("unsupported api version: {0}")]
    UnsupportedVersion(i16),

    #[error("crc mismatch")]
    CrcMismatch,

    #[error("incomplete message")]
    IncompleteMessage,
}

/// The stable, wire-visible Kafka error-code taxonomy (spec §7). Values are
/// part of the wire contract and must never be renumbered once shipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum KafkaErrorCode {
    None = 0,
    UnknownServerError = -1,
    OffsetOutOfRange = 1,
    CorruptMessage = 2,
    NetworkException = 13,
    CoordinatorLoadInProgress = 14,
    NotCoordinator = 16,
    RequestTimedOut = 7,
    LeaderNotAvailable = 5,
    NotLeaderOrFollower = 6,
    GroupAuthorizationFailed = 30,
    ClusterAuthorizationFailed = 31,
    InvalidRequiredAcks = 21,
    IllegalGeneration = 22,
    UnknownMemberId = 25,
    RebalanceInProgress = 27,
    TopicAuthorizationFailed = 29,
    NotEnoughReplicas = 19,
    NotEnoughReplicasAfterAppend = 20,
    TopicAlreadyExists = 36,
    UnknownTopicOrPartition = 3,
    SaslAuthenticationFailed = 58,
    FencedLeaderEpoch = 74,
    OffsetOutOfOrder = 44,
}

impl KafkaErrorCode {
    #[must_use]
    pub fn code(self) -> i16 {
        self as i16
    }
}

/// Map a broker-internal error onto the wire taxonomy, per the propagation
/// policy in spec §7 (transient vs. fatal classification happens here, at
/// the boundary the error crosses on its way to a response).
impl From<&Error> for KafkaErrorCode {
    fn from(e: &Error) -> Self {
        match e {
            Error::Storage(StorageError::OffsetOutOfRange(_)) => KafkaErrorCode::OffsetOutOfRange,
            Error::Storage(StorageError::OffsetOutOfOrder { .. }) => {
                KafkaErrorCode::OffsetOutOfOrder
            }
            Error::Storage(StorageError::CorruptSegment(_)) => KafkaErrorCode::CorruptMessage,
            Error::Replication(ReplicationError::NotLeader) => KafkaErrorCode::NotLeaderOrFollower,
            Error::Replication(ReplicationError::LeaderNotAvailable) => {
                KafkaErrorCode::LeaderNotAvailable
            }
            Error::Replication(ReplicationError::FencedLeaderEpoch { .. }) => {
                KafkaErrorCode::FencedLeaderEpoch
            }
            Error::Replication(ReplicationError::NotEnoughReplicas { .. }) => {
                KafkaErrorCode::NotEnoughReplicas
            }
            Error::Replication(ReplicationError::RequestTimedOut) => {
                KafkaErrorCode::RequestTimedOut
            }
            Error::Raft(RaftError::NotMetadataLeader) => KafkaErrorCode::NotCoordinator,
            Error::Raft(RaftError::Timeout) => KafkaErrorCode::RequestTimedOut,
            Error::Raft(RaftError::TopicAlreadyExists(_)) => KafkaErrorCode::TopicAlreadyExists,
            Error::Raft(RaftError::UnknownTopicOrPartition(_)) => {
                KafkaErrorCode::UnknownTopicOrPartition
            }
            Error::Group(GroupError::RebalanceInProgress) => KafkaErrorCode::RebalanceInProgress,
            Error::Group(GroupError::IllegalGeneration { .. }) => KafkaErrorCode::IllegalGeneration,
            Error::Group(GroupError::UnknownMemberId(_)) => KafkaErrorCode::UnknownMemberId,
            Error::Group(GroupError::NotCoordinator) => KafkaErrorCode::NotCoordinator,
            Error::Group(GroupError::CoordinatorLoadInProgress) => {
                KafkaErrorCode::CoordinatorLoadInProgress
            }
            Error::Group(GroupError::GroupDead(_)) => KafkaErrorCode::UnknownMemberId,
            Error::Protocol(_) | Error::Serialization(_) | Error::Io(_) | Error::Config(_) => {
                KafkaErrorCode::UnknownServerError
            }
            Error::Internal(_) => KafkaErrorCode::UnknownServerError,
        }
    }
}
