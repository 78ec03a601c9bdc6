//! The broker's client- and peer-facing TCP server: accept loop, per-API
//! dispatch, and the glue between the generic frame (`frame.rs`) and the
//! behavioral request/response payloads (`api.rs`).

use std::collections::HashMap;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use lumadb_common::{Header, KafkaErrorCode, Offset, PartitionId};
use lumadb_raft::{ClusterView, Command, RaftNode};
use lumadb_security::SecurityManager;
use lumadb_streaming::coordinator::GroupCoordinator;
use lumadb_streaming::replicator::{Acks, Replicator};
use lumadb_streaming::TopicManager;
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};

use crate::api::{self, ApiRequest, ApiResponse};
use crate::frame::{self, RequestHeader};
use crate::throttle::Throttle;

/// Everything one API-dispatch call needs. Cloned cheaply (all `Arc`s) per
/// accepted connection.
#[derive(Clone)]
pub struct KafkaServer {
    pub broker_id: lumadb_common::NodeId,
    pub topic_manager: Arc<TopicManager>,
    pub replicator: Arc<Replicator>,
    pub coordinator: Arc<GroupCoordinator>,
    pub raft: Arc<RaftNode>,
    pub security: Arc<SecurityManager>,
    pub throttle: Arc<Throttle>,
}

impl KafkaServer {
    #[must_use]
    pub fn new(
        broker_id: lumadb_common::NodeId,
        topic_manager: Arc<TopicManager>,
        replicator: Arc<Replicator>,
        coordinator: Arc<GroupCoordinator>,
        raft: Arc<RaftNode>,
        security: Arc<SecurityManager>,
        throttle: Arc<Throttle>,
    ) -> Self {
        Self {
            broker_id,
            topic_manager,
            replicator,
            coordinator,
            raft,
            security,
            throttle,
        }
    }

    /// Accept loop: one task per connection, run until the process shuts
    /// down. Mirrors the teacher's listener shape.
    pub async fn run(self: Arc<Self>, listener: TcpListener) -> std::io::Result<()> {
        loop {
            let (socket, peer) = listener.accept().await?;
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = server.handle_connection(socket, peer.to_string()).await {
                    warn!(peer, error = %e, "connection closed with error");
                }
            });
        }
    }

    async fn handle_connection(
        self: Arc<Self>,
        mut socket: TcpStream,
        peer: String,
    ) -> std::io::Result<()> {
        info!(peer, "accepted connection");
        loop {
            let Some(payload) = frame::read_frame(&mut socket).await? else {
                info!(peer, "peer closed connection");
                return Ok(());
            };

            let mut buf = Bytes::from(payload.freeze());
            let header = match frame::parse_header(&mut buf) {
                Ok(h) => h,
                Err(e) => {
                    warn!(peer, error = %e, "malformed request header");
                    return Ok(());
                }
            };

            let response = self.dispatch(&header, buf, &peer).await;
            let encoded = bincode::serialize(&response)
                .unwrap_or_else(|_| bincode::serialize(&ApiResponse::Error { error_code: -1 }).unwrap());

            let mut out = BytesMut::with_capacity(4 + encoded.len());
            frame::write_header(&mut out, header.correlation_id);
            out.extend_from_slice(&encoded);
            frame::write_frame(&mut socket, &out).await?;
        }
    }

    async fn dispatch(&self, header: &RequestHeader, buf: Bytes, peer: &str) -> ApiResponse {
        let client_id = header.client_id.clone().unwrap_or_else(|| peer.to_string());

        let request: ApiRequest = match bincode::deserialize(&buf) {
            Ok(r) => r,
            Err(e) => {
                warn!(peer, error = %e, "failed to decode request payload");
                return ApiResponse::Error {
                    error_code: KafkaErrorCode::UnknownServerError.code(),
                };
            }
        };

        match request {
            ApiRequest::Produce {
                topic,
                partition,
                key,
                value,
                headers,
                acks,
                timestamp,
            } => self.handle_produce(&client_id, topic, partition, key, value, headers, acks, timestamp).await,
            ApiRequest::Fetch {
                topic,
                partition,
                offset,
                max_bytes,
                replica_id,
                leader_epoch,
                ..
            } => self.handle_fetch(&client_id, topic, partition, offset, max_bytes, replica_id, leader_epoch),
            ApiRequest::ListOffsets {
                topic,
                partition,
                timestamp_or_sentinel,
            } => self.handle_list_offsets(topic, partition, timestamp_or_sentinel),
            ApiRequest::Metadata { topics } => self.handle_metadata(topics).await,
            ApiRequest::OffsetCommit {
                group_id,
                generation,
                offsets,
            } => self.handle_offset_commit(group_id, generation, offsets),
            ApiRequest::OffsetFetch { group_id, partitions } => self.handle_offset_fetch(group_id, partitions),
            ApiRequest::FindCoordinator { .. } => ApiResponse::FindCoordinator {
                error_code: KafkaErrorCode::None.code(),
                node_id: self.broker_id,
            },
            ApiRequest::JoinGroup {
                group_id,
                member_id,
                client_id: req_client_id,
                session_timeout_ms,
                rebalance_timeout_ms,
                subscription,
            } => self.handle_join_group(
                group_id,
                member_id,
                req_client_id,
                peer,
                session_timeout_ms,
                rebalance_timeout_ms,
                subscription,
            ),
            ApiRequest::SyncGroup {
                group_id,
                member_id,
                generation,
                assignments,
                partitions_per_topic,
            } => {
                self.handle_sync_group(group_id, member_id, generation, assignments, partitions_per_topic)
                    .await
            }
            ApiRequest::Heartbeat {
                group_id,
                member_id,
                generation,
            } => self.handle_heartbeat(group_id, member_id, generation),
            ApiRequest::LeaveGroup { group_id, member_id } => self.handle_leave_group(group_id, member_id),
            ApiRequest::DescribeGroups { .. } | ApiRequest::ListGroups => ApiResponse::ListGroups { groups: Vec::new() },
            ApiRequest::CreateTopics { topics } => self.handle_create_topics(topics).await,
            ApiRequest::DeleteTopics { topics } => self.handle_delete_topics(topics).await,
            ApiRequest::DeleteRecords { .. } => ApiResponse::DeleteRecords {
                error_code: KafkaErrorCode::None.code(),
                low_watermark: 0,
            },
            ApiRequest::SaslHandshake { mechanism } => self.handle_sasl_handshake(&mechanism).await,
            ApiRequest::ApiVersions => ApiResponse::ApiVersions {
                api_keys: api::supported_api_versions(),
            },
            ApiRequest::DescribeAcls => ApiResponse::Acls {
                error_code: KafkaErrorCode::None.code(),
            },
            ApiRequest::CreateAcls { entries } => self.handle_acls(entries, true).await,
            ApiRequest::DeleteAcls { entries } => self.handle_acls(entries, false).await,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_produce(
        &self,
        client_id: &str,
        topic: String,
        partition: PartitionId,
        key: Option<Vec<u8>>,
        value: Vec<u8>,
        headers: Vec<(String, Vec<u8>)>,
        acks: i16,
        timestamp: Option<lumadb_common::Timestamp>,
    ) -> ApiResponse {
        if !self.throttle.allow_produce(client_id, value.len()) {
            return ApiResponse::Produce {
                error_code: KafkaErrorCode::NetworkException.code(),
                offset: -1,
                timestamp: 0,
            };
        }

        let acks = match acks {
            0 => Acks::None,
            1 => Acks::Leader,
            _ => Acks::All,
        };
        let headers: Vec<Header> = headers
            .into_iter()
            .map(|(name, value)| Header { name, value: Bytes::from(value) })
            .collect();

        match self
            .replicator
            .produce(&topic, partition, key.map(Bytes::from), Bytes::from(value), headers, timestamp, acks)
            .await
        {
            Ok(offset) => ApiResponse::Produce {
                error_code: KafkaErrorCode::None.code(),
                offset,
                timestamp: timestamp.unwrap_or_else(TopicManager::current_timestamp_ms),
            },
            Err(e) => {
                error!(topic, partition, error = %e, "produce failed");
                ApiResponse::Produce {
                    error_code: KafkaErrorCode::from(&e).code(),
                    offset: -1,
                    timestamp: 0,
                }
            }
        }
    }

    fn handle_fetch(
        &self,
        client_id: &str,
        topic: String,
        partition: PartitionId,
        offset: Offset,
        max_bytes: u64,
        replica_id: Option<lumadb_common::NodeId>,
        leader_epoch: lumadb_common::LeaderEpoch,
    ) -> ApiResponse {
        if let Some(replica_id) = replica_id {
            let request = lumadb_streaming::replicator::FetchRequest {
                topic,
                partition,
                fetch_offset: offset,
                max_bytes,
                leader_epoch,
                replica_id,
            };
            return match self.replicator.handle_follower_fetch(request) {
                Ok(resp) => ApiResponse::Fetch {
                    error_code: KafkaErrorCode::None.code(),
                    high_watermark: resp.high_watermark,
                    leader_epoch: resp.leader_epoch,
                    diverge_to: resp.diverge_to,
                    records: resp.records,
                },
                Err(e) => ApiResponse::Fetch {
                    error_code: KafkaErrorCode::from(&e).code(),
                    high_watermark: 0,
                    leader_epoch: 0,
                    diverge_to: None,
                    records: Vec::new(),
                },
            };
        }

        if !self.throttle.allow_fetch(client_id, max_bytes as usize) {
            return ApiResponse::Fetch {
                error_code: KafkaErrorCode::NetworkException.code(),
                high_watermark: 0,
                leader_epoch: 0,
                diverge_to: None,
                records: Vec::new(),
            };
        }

        let log = match self.topic_manager.get_log(&topic, partition) {
            Ok(log) => log,
            Err(e) => {
                return ApiResponse::Fetch {
                    error_code: KafkaErrorCode::from(&e).code(),
                    high_watermark: 0,
                    leader_epoch: 0,
                    diverge_to: None,
                    records: Vec::new(),
                }
            }
        };

        let log = log.lock();
        if offset > log.log_end_offset() {
            return ApiResponse::Fetch {
                error_code: KafkaErrorCode::OffsetOutOfRange.code(),
                high_watermark: log.high_watermark(),
                leader_epoch: log.leader_epoch(),
                diverge_to: None,
                records: Vec::new(),
            };
        }

        let mut records = Vec::new();
        let mut cursor = offset;
        let mut bytes_read = 0u64;
        while cursor < log.high_watermark() && bytes_read < max_bytes {
            match log.read(cursor) {
                Ok(record) => {
                    bytes_read += record.approx_size() as u64;
                    cursor += 1;
                    records.push(record);
                }
                Err(_) => break,
            }
        }

        ApiResponse::Fetch {
            error_code: KafkaErrorCode::None.code(),
            high_watermark: log.high_watermark(),
            leader_epoch: log.leader_epoch(),
            diverge_to: None,
            records,
        }
    }

    fn handle_list_offsets(
        &self,
        topic: String,
        partition: PartitionId,
        timestamp_or_sentinel: lumadb_common::Timestamp,
    ) -> ApiResponse {
        match self.topic_manager.get_replica_log(&topic, partition) {
            Some(log) => {
                let log = log.lock();
                match log.list_offset(timestamp_or_sentinel) {
                    Ok(offset) => ApiResponse::ListOffsets {
                        error_code: KafkaErrorCode::None.code(),
                        offset,
                    },
                    Err(e) => ApiResponse::ListOffsets {
                        error_code: KafkaErrorCode::from(&e).code(),
                        offset: -1,
                    },
                }
            }
            None => ApiResponse::ListOffsets {
                error_code: KafkaErrorCode::UnknownTopicOrPartition.code(),
                offset: -1,
            },
        }
    }

    async fn handle_metadata(&self, topics: Vec<String>) -> ApiResponse {
        let view: ClusterView = self.raft.view().await;
        let filtered = if topics.is_empty() {
            view.topics
        } else {
            view.topics.into_iter().filter(|t| topics.contains(&t.name)).collect()
        };
        ApiResponse::Metadata {
            controller_id: self.raft.current_leader().await,
            topics: filtered,
        }
    }

    fn handle_offset_commit(
        &self,
        group_id: String,
        generation: i32,
        offsets: Vec<(String, PartitionId, Offset, String)>,
    ) -> ApiResponse {
        match self.coordinator.offset_commit(&group_id, generation, offsets) {
            Ok(()) => ApiResponse::OffsetCommit {
                error_code: KafkaErrorCode::None.code(),
            },
            Err(e) => ApiResponse::OffsetCommit {
                error_code: KafkaErrorCode::from(&e).code(),
            },
        }
    }

    fn handle_offset_fetch(&self, group_id: String, partitions: Vec<(String, PartitionId)>) -> ApiResponse {
        ApiResponse::OffsetFetch {
            offsets: self.coordinator.offset_fetch(&group_id, &partitions),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_join_group(
        &self,
        group_id: String,
        member_id: Option<String>,
        client_id: String,
        host: &str,
        session_timeout_ms: u64,
        rebalance_timeout_ms: u64,
        subscription: Vec<String>,
    ) -> ApiResponse {
        match self.coordinator.join_group(
            &group_id,
            member_id,
            &client_id,
            host,
            session_timeout_ms,
            rebalance_timeout_ms,
            subscription,
        ) {
            Ok(result) => ApiResponse::JoinGroup {
                error_code: KafkaErrorCode::None.code(),
                generation: result.generation,
                leader_id: result.leader_id,
                member_id: result.member_id,
                protocol: result.protocol,
                members: result.members,
            },
            Err(e) => ApiResponse::JoinGroup {
                error_code: KafkaErrorCode::from(&e).code(),
                generation: -1,
                leader_id: String::new(),
                member_id: String::new(),
                protocol: String::new(),
                members: Vec::new(),
            },
        }
    }

    async fn handle_sync_group(
        &self,
        group_id: String,
        member_id: String,
        generation: i32,
        assignments: Option<Vec<(String, Vec<(String, PartitionId)>)>>,
        partitions_per_topic: Vec<(String, u32)>,
    ) -> ApiResponse {
        let assignments = assignments.map(|a| a.into_iter().collect::<HashMap<_, _>>());
        let partitions_per_topic: HashMap<String, u32> = partitions_per_topic.into_iter().collect();

        match self
            .coordinator
            .sync_group(&group_id, &member_id, generation, assignments, &partitions_per_topic)
            .await
        {
            Ok(result) => ApiResponse::SyncGroup {
                error_code: KafkaErrorCode::None.code(),
                assignment: result.assignment,
            },
            Err(e) => ApiResponse::SyncGroup {
                error_code: KafkaErrorCode::from(&e).code(),
                assignment: Vec::new(),
            },
        }
    }

    fn handle_heartbeat(&self, group_id: String, member_id: String, generation: i32) -> ApiResponse {
        match self.coordinator.heartbeat(&group_id, &member_id, generation) {
            Ok(()) => ApiResponse::Heartbeat {
                error_code: KafkaErrorCode::None.code(),
            },
            Err(e) => ApiResponse::Heartbeat {
                error_code: KafkaErrorCode::from(&e).code(),
            },
        }
    }

    fn handle_leave_group(&self, group_id: String, member_id: String) -> ApiResponse {
        match self.coordinator.leave_group(&group_id, &member_id) {
            Ok(()) => ApiResponse::LeaveGroup {
                error_code: KafkaErrorCode::None.code(),
            },
            Err(e) => ApiResponse::LeaveGroup {
                error_code: KafkaErrorCode::from(&e).code(),
            },
        }
    }

    async fn handle_create_topics(&self, topics: Vec<api::TopicSpec>) -> ApiResponse {
        for spec in topics {
            let config = lumadb_common::TopicConfig::new(&spec.name, spec.partitions, spec.replication_factor);
            if let Err(e) = self.raft.propose(Command::CreateTopic(config)).await {
                return ApiResponse::CreateTopics {
                    error_code: KafkaErrorCode::from(&e).code(),
                };
            }
        }
        ApiResponse::CreateTopics {
            error_code: KafkaErrorCode::None.code(),
        }
    }

    async fn handle_delete_topics(&self, topics: Vec<String>) -> ApiResponse {
        for name in topics {
            if let Err(e) = self.raft.propose(Command::DeleteTopic { name }).await {
                return ApiResponse::DeleteTopics {
                    error_code: KafkaErrorCode::from(&e).code(),
                };
            }
        }
        ApiResponse::DeleteTopics {
            error_code: KafkaErrorCode::None.code(),
        }
    }

    async fn handle_sasl_handshake(&self, mechanism: &str) -> ApiResponse {
        match self.security.authenticate(mechanism, &[]).await {
            Ok(_) => ApiResponse::SaslHandshake {
                error_code: KafkaErrorCode::None.code(),
                mechanisms: vec!["PLAIN".to_string()],
            },
            Err(e) => ApiResponse::SaslHandshake {
                error_code: KafkaErrorCode::from(&e).code(),
                mechanisms: vec!["PLAIN".to_string()],
            },
        }
    }

    async fn handle_acls(&self, entries: Vec<api::AclSpec>, allow_create: bool) -> ApiResponse {
        for spec in entries {
            let entry = lumadb_common::AclEntry {
                principal: spec.principal,
                resource_type: spec.resource_type,
                resource_name: spec.resource_name,
                operation: spec.operation,
                allow: spec.allow,
            };
            let command = if allow_create {
                Command::PutAcl(entry)
            } else {
                Command::DeleteAcl {
                    principal: entry.principal,
                    resource_type: entry.resource_type,
                    resource_name: entry.resource_name,
                    operation: entry.operation,
                }
            };
            if let Err(e) = self.raft.propose(command).await {
                return ApiResponse::Acls {
                    error_code: KafkaErrorCode::from(&e).code(),
                };
            }
        }
        ApiResponse::Acls {
            error_code: KafkaErrorCode::None.code(),
        }
    }
}
