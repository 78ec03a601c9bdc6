//! ISR replication protocol: follower fetch loop and leader-side fetch
//! handling (spec §4.4).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use lumadb_common::error::{Error, ReplicationError, StorageError};
use lumadb_common::{Header, LeaderEpoch, NodeId, Offset, PartitionId, Record, Timestamp};
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::topic_manager::TopicManager;

/// Producer acknowledgement mode (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acks {
    /// Leader returns immediately after the local append.
    None,
    /// Leader returns after the local append (same as `None` for this
    /// core, since there is no separate "send" step once appended).
    Leader,
    /// Leader returns only once the high-watermark reaches the produced
    /// offset, i.e. all ISR members have replicated it.
    All,
}

/// A follower's request to replicate from `fetch_offset`.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub topic: String,
    pub partition: PartitionId,
    pub fetch_offset: Offset,
    pub max_bytes: u64,
    pub leader_epoch: LeaderEpoch,
    pub replica_id: NodeId,
}

/// The leader's reply to a follower fetch.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub leader_epoch: LeaderEpoch,
    pub high_watermark: Offset,
    pub records: Vec<Record>,
    /// Set when the follower's `leader_epoch` was stale: the offset it
    /// should truncate to before retrying (log-divergence recovery).
    pub diverge_to: Option<Offset>,
}

/// Abstracts the Kafka-wire Fetch RPC used between broker peers. The wire
/// codec itself is out of scope for this crate; the protocol crate
/// implements this trait over real TCP connections.
#[async_trait]
pub trait ReplicaTransport: Send + Sync {
    async fn fetch(&self, leader: NodeId, request: FetchRequest) -> lumadb_common::Result<FetchResponse>;
}

pub struct ReplicatorConfig {
    pub fetch_max_wait: Duration,
    pub replica_lag_time_max_ms: u64,
    pub min_insync_replicas: usize,
    pub request_timeout: Duration,
}

/// Implements both replicator sub-roles: follower-fetcher (pulls from the
/// current leader) and leader-serving (answers follower fetches, advances
/// the high-watermark).
pub struct Replicator {
    broker_id: NodeId,
    topic_manager: Arc<TopicManager>,
    transport: Arc<dyn ReplicaTransport>,
    config: ReplicatorConfig,
}

impl Replicator {
    #[must_use]
    pub fn new(
        broker_id: NodeId,
        topic_manager: Arc<TopicManager>,
        transport: Arc<dyn ReplicaTransport>,
        config: ReplicatorConfig,
    ) -> Self {
        Self {
            broker_id,
            topic_manager,
            transport,
            config,
        }
    }

    /// Client-facing produce entry point. Applies `acks` semantics on top
    /// of the raw `Log::append`.
    pub async fn produce(
        &self,
        topic: &str,
        partition: PartitionId,
        key: Option<Bytes>,
        value: Bytes,
        headers: Vec<Header>,
        timestamp: Option<Timestamp>,
        acks: Acks,
    ) -> lumadb_common::Result<Offset> {
        if acks == Acks::All
            && self.topic_manager.isr_len(topic, partition) < self.config.min_insync_replicas
        {
            return Err(Error::Replication(ReplicationError::NotEnoughReplicas {
                have: self.topic_manager.isr_len(topic, partition),
                need: self.config.min_insync_replicas,
            }));
        }

        let log = self.topic_manager.get_log(topic, partition)?;
        let offset = {
            let mut log = log.lock();
            log.append(key, value, headers, timestamp)?
        };

        if acks != Acks::All {
            return Ok(offset);
        }

        // No followers to wait on (e.g. a replication-factor-1 topic): the
        // leader is the entire ISR, so it must advance its own
        // high-watermark rather than wait for a follower fetch that will
        // never come.
        {
            let log = log.lock();
            let new_hwm = self
                .topic_manager
                .min_isr_offset(topic, partition, log.log_end_offset());
            log.advance_high_watermark(new_hwm);
        }

        let deadline = tokio::time::Instant::now() + self.config.request_timeout;
        loop {
            if log.lock().high_watermark() > offset {
                return Ok(offset);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::Replication(ReplicationError::RequestTimedOut));
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Leader-serving side: answer a follower's fetch, update its tracked
    /// progress, and advance the high-watermark to
    /// `min(logEndOffset over ISR)`.
    pub fn handle_follower_fetch(&self, request: FetchRequest) -> lumadb_common::Result<FetchResponse> {
        let log = self
            .topic_manager
            .get_log(&request.topic, request.partition)?;
        let log = log.lock();

        if request.leader_epoch < log.leader_epoch() {
            return Ok(FetchResponse {
                leader_epoch: log.leader_epoch(),
                high_watermark: log.high_watermark(),
                records: Vec::new(),
                diverge_to: Some(log.high_watermark()),
            });
        }

        let mut records = Vec::new();
        let mut offset = request.fetch_offset;
        let mut bytes_read = 0u64;
        let log_end_offset = log.log_end_offset();
        while offset < log_end_offset && bytes_read < request.max_bytes {
            match log.read_unchecked(offset) {
                Ok(record) => {
                    bytes_read += record.approx_size() as u64;
                    offset += 1;
                    records.push(record);
                }
                Err(_) => break,
            }
        }

        self.topic_manager.track_follower_fetch(
            &request.topic,
            request.partition,
            request.replica_id,
            offset,
            log_end_offset,
            i64::MAX,
        );

        let new_hwm = self
            .topic_manager
            .min_isr_offset(&request.topic, request.partition, log_end_offset);
        log.advance_high_watermark(new_hwm);

        Ok(FetchResponse {
            leader_epoch: log.leader_epoch(),
            high_watermark: log.high_watermark(),
            records,
            diverge_to: None,
        })
    }

    /// Follower-fetcher loop for one partition this broker replicates but
    /// does not lead. Runs until `cancel` resolves.
    pub async fn run_follower(
        self: Arc<Self>,
        topic: String,
        partition: PartitionId,
        mut cancel: oneshot::Receiver<()>,
    ) {
        let mut backoff = Duration::from_millis(50);
        const MAX_BACKOFF: Duration = Duration::from_secs(1);

        loop {
            if cancel.try_recv().is_ok() {
                return;
            }

            let Some(meta) = self.topic_manager.partition_metadata(&topic, partition) else {
                tokio::time::sleep(backoff).await;
                continue;
            };
            let Some(leader) = meta.leader else {
                tokio::time::sleep(backoff).await;
                continue;
            };
            if leader == self.broker_id {
                return; // became leader; stop following
            }

            let Some(log) = self.topic_manager.get_replica_log(&topic, partition) else {
                tokio::time::sleep(backoff).await;
                continue;
            };

            let (fetch_offset, leader_epoch) = {
                let log = log.lock();
                (log.log_end_offset(), log.leader_epoch())
            };

            let request = FetchRequest {
                topic: topic.clone(),
                partition,
                fetch_offset,
                max_bytes: 1024 * 1024,
                leader_epoch,
                replica_id: self.broker_id,
            };

            match self.transport.fetch(leader, request).await {
                Ok(response) => {
                    backoff = Duration::from_millis(50);
                    if let Some(diverge_to) = response.diverge_to {
                        warn!(topic, partition, diverge_to, "fenced leader epoch, truncating");
                        if let Err(e) = log.lock().truncate_to(diverge_to) {
                            warn!(topic, partition, error = %e, "truncate during divergence recovery failed");
                        }
                        continue;
                    }
                    if !response.records.is_empty() {
                        if let Err(e) = log
                            .lock()
                            .append_replicated(response.records, response.leader_epoch)
                        {
                            match e {
                                Error::Replication(ReplicationError::FencedLeaderEpoch { .. }) => {
                                    warn!(topic, partition, "local epoch ahead of leader response, retrying");
                                }
                                Error::Storage(StorageError::OffsetOutOfOrder { .. }) => {
                                    warn!(topic, partition, "offset gap from leader, will refetch");
                                }
                                other => warn!(topic, partition, error = %other, "follower append failed"),
                            }
                            continue;
                        }
                    }
                    log.lock().advance_high_watermark(response.high_watermark);
                }
                Err(e) => {
                    warn!(topic, partition, error = %e, "follower fetch failed, backing off");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }
}

/// Convenience constructor for tests and for wiring up standalone follower
/// loops from the broker's top-level supervisor.
pub fn spawn_follower(
    replicator: Arc<Replicator>,
    topic: String,
    partition: PartitionId,
) -> (tokio::task::JoinHandle<()>, oneshot::Sender<()>) {
    let (tx, rx) = oneshot::channel();
    let handle = tokio::spawn(async move {
        info!(topic = %topic, partition, "starting follower fetch loop");
        replicator.run_follower(topic, partition, rx).await;
    });
    (handle, tx)
}
