//! Broker bootstrap: wires storage, replication, consensus, security, and
//! the Kafka-wire listener into one running process.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::info;

use lumadb_common::config::Config;
use lumadb_raft::RaftNode;
use lumadb_protocol::kafka::KafkaServer;
use lumadb_protocol::Throttle;
use lumadb_security::SecurityManager;
use lumadb_streaming::coordinator::{AssignmentStrategy, CoordinatorConfig, GroupCoordinator};
use lumadb_streaming::replicator::{Replicator, ReplicatorConfig};
use lumadb_streaming::topic_manager::LogDefaults;
use lumadb_streaming::{Reactor, TopicManager};

use crate::transport::SingleNodeTransport;

pub struct LumaServer {
    config: Config,
    kafka: Arc<KafkaServer>,
    raft: Arc<RaftNode>,
    reactor: Arc<Reactor>,
    raft_cancel: Option<tokio::sync::oneshot::Sender<()>>,
}

impl LumaServer {
    pub async fn new(config: Config) -> Result<Self> {
        info!("initializing LumaDB broker components");
        std::fs::create_dir_all(&config.broker.data_dir).context("creating data directory")?;

        let transport = Arc::new(SingleNodeTransport);

        let raft = RaftNode::new(
            config.broker.id,
            Vec::new(),
            config.raft.clone(),
            &config.broker.data_dir,
            transport.clone(),
        )
        .context("initializing raft node")?;

        let topic_manager = Arc::new(TopicManager::new(
            config.broker.id,
            config.broker.data_dir.clone(),
            LogDefaults {
                segment_bytes: config.log.segment_bytes,
                segment_ms: config.log.segment_ms,
                retention_ms: config.log.retention_ms,
                retention_bytes: config.log.retention_bytes,
            },
        ));

        let replicator = Arc::new(Replicator::new(
            config.broker.id,
            topic_manager.clone(),
            transport.clone(),
            ReplicatorConfig {
                fetch_max_wait: std::time::Duration::from_millis(config.fetch.max_wait_ms),
                replica_lag_time_max_ms: config.replication.replica_lag_time_max_ms,
                min_insync_replicas: config.replication.min_insync_replicas as usize,
                request_timeout: std::time::Duration::from_millis(config.raft.election_timeout_ms),
            },
        ));

        let coordinator = Arc::new(GroupCoordinator::new(
            topic_manager.clone(),
            CoordinatorConfig {
                default_session_timeout_ms: config.group.session_timeout_ms,
                default_rebalance_timeout_ms: config.group.rebalance_timeout_ms,
                assignment_strategy: AssignmentStrategy::RoundRobin,
            },
        ));

        let security = Arc::new(SecurityManager::disabled());
        let throttle = Arc::new(Throttle::new(
            config.throttle.producer_bytes_per_second,
            config.throttle.consumer_bytes_per_second,
        ));

        let reactor = Arc::new(Reactor::new());
        reactor.start(topic_manager.clone());

        let kafka = Arc::new(KafkaServer::new(
            config.broker.id,
            topic_manager,
            replicator,
            coordinator,
            raft.clone(),
            security,
            throttle,
        ));

        Ok(Self {
            config,
            kafka,
            raft,
            reactor,
            raft_cancel: None,
        })
    }

    pub async fn run(&mut self) -> Result<()> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.raft_cancel = Some(tx);
        let raft = self.raft.clone();
        tokio::spawn(async move { raft.run(rx).await });

        let listen_addr = self
            .config
            .broker
            .listeners
            .first()
            .context("at least one listener is required")?;
        let listener = TcpListener::bind(listen_addr).await.context("binding listener")?;

        info!(address = %listen_addr, broker_id = self.config.broker.id, "LumaDB broker listening");

        self.kafka.clone().run(listener).await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        info!("shutting down LumaDB broker");
        if let Some(cancel) = self.raft_cancel.take() {
            let _ = cancel.send(());
        }
        self.reactor.stop();
        Ok(())
    }
}
