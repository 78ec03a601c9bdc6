//! Metadata commands and the deterministic state machine that applies them
//! (spec §4.5)

use lumadb_common::error::{Error, RaftError};
use lumadb_common::{AclEntry, NodeId, NodeInfo, NodeStatus, PartitionId, TopicConfig, TopicMetadata};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Every metadata mutation is one of these commands; applying the same
/// sequence of commands on every replica yields identical state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Command {
    CreateTopic(TopicConfig),
    DeleteTopic { name: String },
    AlterPartitionAssignment {
        topic: String,
        partition: PartitionId,
        replicas: Vec<NodeId>,
    },
    UpdateIsr {
        topic: String,
        partition: PartitionId,
        isr: Vec<NodeId>,
    },
    ElectLeader {
        topic: String,
        partition: PartitionId,
        leader: NodeId,
    },
    RegisterBroker(NodeInfo),
    UnregisterBroker { id: NodeId },
    PutAcl(AclEntry),
    DeleteAcl {
        principal: String,
        resource_type: String,
        resource_name: String,
        operation: String,
    },
}

#[derive(Debug, Clone, Default)]
struct PartitionState {
    leader: Option<NodeId>,
    leader_epoch: i32,
    replicas: Vec<NodeId>,
    isr: Vec<NodeId>,
}

/// Deterministic cluster metadata state machine. Applied only by entries
/// that have reached the Raft commit index.
#[derive(Default)]
pub struct StateMachine {
    topics: HashMap<String, TopicConfig>,
    partitions: HashMap<(String, PartitionId), PartitionState>,
    brokers: HashMap<NodeId, NodeInfo>,
    acls: Vec<AclEntry>,
}

impl StateMachine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a committed command. Infallible in the sense that every
    /// replica applies the same command and reaches the same state;
    /// pre-commit validation (e.g. `TopicAlreadyExists`) happens at
    /// propose time, not here, except for integrity guards kept cheap
    /// enough to run on every replica.
    pub fn apply(&mut self, command: &Command) {
        match command {
            Command::CreateTopic(config) => {
                for partition in 0..config.partitions {
                    let partition = partition as PartitionId;
                    let replicas: Vec<NodeId> = self
                        .brokers
                        .keys()
                        .take(config.replication_factor as usize)
                        .copied()
                        .collect();
                    self.partitions.insert(
                        (config.name.clone(), partition),
                        PartitionState {
                            leader: replicas.first().copied(),
                            leader_epoch: 0,
                            isr: replicas.clone(),
                            replicas,
                        },
                    );
                }
                self.topics.insert(config.name.clone(), config.clone());
            }
            Command::DeleteTopic { name } => {
                self.topics.remove(name);
                self.partitions.retain(|(topic, _), _| topic != name);
            }
            Command::AlterPartitionAssignment {
                topic,
                partition,
                replicas,
            } => {
                let entry = self
                    .partitions
                    .entry((topic.clone(), *partition))
                    .or_default();
                entry.replicas = replicas.clone();
            }
            Command::UpdateIsr {
                topic,
                partition,
                isr,
            } => {
                if let Some(entry) = self.partitions.get_mut(&(topic.clone(), *partition)) {
                    entry.isr = isr.clone();
                }
            }
            Command::ElectLeader {
                topic,
                partition,
                leader,
            } => {
                let entry = self
                    .partitions
                    .entry((topic.clone(), *partition))
                    .or_default();
                entry.leader = Some(*leader);
                entry.leader_epoch += 1;
            }
            Command::RegisterBroker(info) => {
                self.brokers.insert(info.id, info.clone());
            }
            Command::UnregisterBroker { id } => {
                if let Some(broker) = self.brokers.get_mut(id) {
                    broker.status = NodeStatus::Offline;
                }
            }
            Command::PutAcl(entry) => {
                self.acls.retain(|existing| !matches_acl_key(existing, entry));
                self.acls.push(entry.clone());
            }
            Command::DeleteAcl {
                principal,
                resource_type,
                resource_name,
                operation,
            } => {
                self.acls.retain(|entry| {
                    !(entry.principal == *principal
                        && entry.resource_type == *resource_type
                        && entry.resource_name == *resource_name
                        && entry.operation == *operation)
                });
            }
        }
    }

    /// Pre-commit validation for a proposed command, evaluated by the
    /// leader before appending to the Raft log (spec §7 `TOPIC_ALREADY_EXISTS`
    /// / `UNKNOWN_TOPIC_OR_PARTITION`).
    pub fn validate(&self, command: &Command) -> lumadb_common::Result<()> {
        match command {
            Command::CreateTopic(config) => {
                if self.topics.contains_key(&config.name) {
                    return Err(Error::Raft(RaftError::TopicAlreadyExists(config.name.clone())));
                }
            }
            Command::DeleteTopic { name }
            | Command::AlterPartitionAssignment { topic: name, .. }
            | Command::UpdateIsr { topic: name, .. }
            | Command::ElectLeader { topic: name, .. } => {
                if !self.topics.contains_key(name) {
                    return Err(Error::Raft(RaftError::UnknownTopicOrPartition(name.clone())));
                }
            }
            Command::RegisterBroker(_)
            | Command::UnregisterBroker { .. }
            | Command::PutAcl(_)
            | Command::DeleteAcl { .. } => {}
        }
        Ok(())
    }

    /// Read-only snapshot used to answer `Metadata` requests (spec §6.1).
    #[must_use]
    pub fn view(&self) -> ClusterView {
        let mut topics = Vec::new();
        for config in self.topics.values() {
            let mut partitions: Vec<lumadb_common::PartitionMetadata> = self
                .partitions
                .iter()
                .filter(|((topic, _), _)| topic == &config.name)
                .map(|((_, id), state)| lumadb_common::PartitionMetadata {
                    id: *id,
                    leader: state.leader,
                    leader_epoch: state.leader_epoch,
                    replicas: state.replicas.clone(),
                    isr: state.isr.clone(),
                    low_watermark: 0,
                    high_watermark: 0,
                })
                .collect();
            partitions.sort_by_key(|p| p.id);
            topics.push(TopicMetadata {
                name: config.name.clone(),
                partitions,
                is_internal: config.is_internal,
            });
        }
        ClusterView {
            topics,
            brokers: self.brokers.values().cloned().collect(),
            acl_count: self.acls.len(),
        }
    }

    #[must_use]
    pub fn topic_config(&self, name: &str) -> Option<&TopicConfig> {
        self.topics.get(name)
    }

    #[must_use]
    pub fn is_authorized(&self, check: impl Fn(&AclEntry) -> bool) -> Option<bool> {
        self.acls.iter().find(|e| check(e)).map(|e| e.allow)
    }
}

fn matches_acl_key(a: &AclEntry, b: &AclEntry) -> bool {
    a.principal == b.principal
        && a.resource_type == b.resource_type
        && a.resource_name == b.resource_name
        && a.operation == b.operation
}

/// Snapshot of cluster metadata, for the Metadata API response.
#[derive(Debug, Clone)]
pub struct ClusterView {
    pub topics: Vec<TopicMetadata>,
    pub brokers: Vec<NodeInfo>,
    pub acl_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_topic_assigns_partitions() {
        let mut sm = StateMachine::new();
        sm.apply(&Command::RegisterBroker(NodeInfo {
            id: 1,
            address: "localhost:9092".into(),
            status: NodeStatus::Online,
            last_heartbeat: 0,
        }));
        sm.apply(&Command::CreateTopic(TopicConfig::new("orders", 3, 1)));
        let view = sm.view();
        let topic = view.topics.iter().find(|t| t.name == "orders").unwrap();
        assert_eq!(topic.partitions.len(), 3);
    }

    #[test]
    fn rejects_duplicate_topic() {
        let mut sm = StateMachine::new();
        sm.apply(&Command::CreateTopic(TopicConfig::new("orders", 1, 1)));
        assert!(sm
            .validate(&Command::CreateTopic(TopicConfig::new("orders", 1, 1)))
            .is_err());
    }

    #[test]
    fn isr_update_applies() {
        let mut sm = StateMachine::new();
        sm.apply(&Command::CreateTopic(TopicConfig::new("orders", 1, 1)));
        sm.apply(&Command::UpdateIsr {
            topic: "orders".into(),
            partition: 0,
            isr: vec![1, 2],
        });
        let view = sm.view();
        let partition = &view.topics[0].partitions[0];
        assert_eq!(partition.isr, vec![1, 2]);
    }
}
