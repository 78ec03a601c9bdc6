//! Consumer group coordination: membership, rebalance generations, and the
//! committed-offset store (spec §4.6).

pub mod assignor;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub use assignor::AssignmentStrategy;

use assignor::{assign, MemberSpec};
use bytes::Bytes;
use dashmap::DashMap;
use lumadb_common::error::GroupError;
use lumadb_common::{Error, Offset, PartitionId, Timestamp};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::info;

use crate::topic_manager::TopicManager;

/// The internal topic name backing the committed-offset store (spec §6.2
/// `.groups/`).
pub const OFFSETS_TOPIC: &str = "__consumer_offsets";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Empty,
    PreparingRebalance,
    CompletingRebalance,
    Stable,
    Dead,
}

#[derive(Debug, Clone)]
struct Member {
    client_id: String,
    host: String,
    session_timeout_ms: u64,
    rebalance_timeout_ms: u64,
    subscription: Vec<String>,
    last_heartbeat: Instant,
    joined_this_round: bool,
    assignment: Vec<(String, PartitionId)>,
}

struct Group {
    state: Lifecycle,
    generation: i32,
    protocol: Option<String>,
    leader_member_id: Option<String>,
    members: HashMap<String, Member>,
    committed_offsets: HashMap<(String, PartitionId), (Offset, String)>,
    rebalance_deadline: Option<Instant>,
    rebalance_notify: Arc<Notify>,
}

impl Group {
    fn new() -> Self {
        Self {
            state: Lifecycle::Empty,
            generation: 0,
            protocol: None,
            leader_member_id: None,
            members: HashMap::new(),
            committed_offsets: HashMap::new(),
            rebalance_deadline: None,
            rebalance_notify: Arc::new(Notify::new()),
        }
    }

    fn start_rebalance(&mut self, rebalance_timeout: Duration) {
        self.state = Lifecycle::PreparingRebalance;
        self.generation += 1;
        self.rebalance_deadline = Some(Instant::now() + rebalance_timeout);
        for member in self.members.values_mut() {
            member.joined_this_round = false;
        }
    }

    fn all_joined(&self) -> bool {
        !self.members.is_empty() && self.members.values().all(|m| m.joined_this_round)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OffsetCommitRecord {
    group_id: String,
    topic: String,
    partition: PartitionId,
    offset: Offset,
    metadata: String,
}

pub struct JoinGroupResult {
    pub generation: i32,
    pub member_id: String,
    pub leader_id: String,
    pub protocol: String,
    /// Populated only for the member identified as `leader_id`: every
    /// known member's subscription, so the leader can compute assignments.
    pub members: Vec<(String, Vec<String>)>,
}

pub struct SyncGroupResult {
    pub assignment: Vec<(String, PartitionId)>,
}

pub struct CoordinatorConfig {
    pub default_session_timeout_ms: u64,
    pub default_rebalance_timeout_ms: u64,
    pub assignment_strategy: AssignmentStrategy,
}

/// Drives JoinGroup/SyncGroup/Heartbeat/LeaveGroup/OffsetCommit/OffsetFetch
/// for every group this broker coordinates.
pub struct GroupCoordinator {
    topic_manager: Arc<TopicManager>,
    groups: DashMap<String, RwLock<Group>>,
    config: CoordinatorConfig,
}

impl GroupCoordinator {
    #[must_use]
    pub fn new(topic_manager: Arc<TopicManager>, config: CoordinatorConfig) -> Self {
        Self {
            topic_manager,
            groups: DashMap::new(),
            config,
        }
    }

    fn offsets_partition(group_id: &str) -> PartitionId {
        let mut hash: u64 = 1469598103934665603;
        for b in group_id.as_bytes() {
            hash ^= u64::from(*b);
            hash = hash.wrapping_mul(1099511628211);
        }
        (hash % 50) as PartitionId
    }

    /// On becoming coordinator for this group's internal-topic partition,
    /// rebuild in-memory state by replaying committed offsets from the
    /// beginning (spec §4.6 failure semantics).
    pub fn recover_group(&self, group_id: &str) -> lumadb_common::Result<()> {
        let partition = Self::offsets_partition(group_id);
        let Some(log) = self.topic_manager.get_replica_log(OFFSETS_TOPIC, partition) else {
            return Ok(());
        };
        let log = log.lock();
        let entry = self.groups.entry(group_id.to_string()).or_insert_with(|| RwLock::new(Group::new()));
        let mut group = entry.write();

        let mut offset = log.base_offset();
        while offset < log.log_end_offset() {
            let record = log.read_unchecked(offset)?;
            if let Ok(commit) = bincode::deserialize::<OffsetCommitRecord>(&record.value) {
                if commit.group_id == group_id {
                    group
                        .committed_offsets
                        .insert((commit.topic, commit.partition), (commit.offset, commit.metadata));
                }
            }
            offset += 1;
        }
        info!(group_id, "recovered committed offsets from internal topic");
        Ok(())
    }

    pub fn join_group(
        &self,
        group_id: &str,
        member_id: Option<String>,
        client_id: &str,
        host: &str,
        session_timeout_ms: u64,
        rebalance_timeout_ms: u64,
        subscription: Vec<String>,
    ) -> lumadb_common::Result<JoinGroupResult> {
        let entry = self.groups.entry(group_id.to_string()).or_insert_with(|| RwLock::new(Group::new()));
        let mut group = entry.write();

        if group.state == Lifecycle::Dead {
            return Err(Error::Group(GroupError::GroupDead(group_id.to_string())));
        }

        let member_id = member_id.unwrap_or_else(|| format!("{client_id}-{}", uuid::Uuid::new_v4()));
        let is_new = !group.members.contains_key(&member_id);

        group.members.insert(
            member_id.clone(),
            Member {
                client_id: client_id.to_string(),
                host: host.to_string(),
                session_timeout_ms: if session_timeout_ms > 0 {
                    session_timeout_ms
                } else {
                    self.config.default_session_timeout_ms
                },
                rebalance_timeout_ms: if rebalance_timeout_ms > 0 {
                    rebalance_timeout_ms
                } else {
                    self.config.default_rebalance_timeout_ms
                },
                subscription,
                last_heartbeat: Instant::now(),
                joined_this_round: true,
                assignment: group
                    .members
                    .get(&member_id)
                    .map(|m| m.assignment.clone())
                    .unwrap_or_default(),
            },
        );

        if is_new || group.state == Lifecycle::Empty || group.state == Lifecycle::Stable {
            let rebalance_timeout = Duration::from_millis(
                group
                    .members
                    .values()
                    .map(|m| m.rebalance_timeout_ms)
                    .max()
                    .unwrap_or(self.config.default_rebalance_timeout_ms),
            );
            group.start_rebalance(rebalance_timeout);
        }

        if group.leader_member_id.is_none() {
            group.leader_member_id = Some(member_id.clone());
        }

        if group.all_joined() {
            group.state = Lifecycle::CompletingRebalance;
            group.protocol = Some(
                group
                    .protocol
                    .clone()
                    .unwrap_or_else(|| "roundrobin".to_string()),
            );
        }

        let leader_id = group.leader_member_id.clone().unwrap_or_else(|| member_id.clone());
        let members = if member_id == leader_id {
            group
                .members
                .iter()
                .map(|(id, m)| (id.clone(), m.subscription.clone()))
                .collect()
        } else {
            Vec::new()
        };

        Ok(JoinGroupResult {
            generation: group.generation,
            member_id,
            leader_id,
            protocol: group.protocol.clone().unwrap_or_else(|| "roundrobin".to_string()),
            members,
        })
    }

    /// Leader calls with `Some(assignments)` it computed from the member
    /// list returned by `join_group`; followers call with `None` and wait
    /// for the leader's assignment to propagate.
    pub async fn sync_group(
        &self,
        group_id: &str,
        member_id: &str,
        generation: i32,
        assignments: Option<HashMap<String, Vec<(String, PartitionId)>>>,
        partitions_per_topic: &HashMap<String, u32>,
    ) -> lumadb_common::Result<SyncGroupResult> {
        let entry = self
            .groups
            .get(group_id)
            .ok_or_else(|| Error::Group(GroupError::UnknownMemberId(member_id.to_string())))?;
        let notify;
        {
            let mut group = entry.write();
            if generation != group.generation {
                return Err(Error::Group(GroupError::IllegalGeneration {
                    expected: group.generation,
                    actual: generation,
                }));
            }
            if !group.members.contains_key(member_id) {
                return Err(Error::Group(GroupError::UnknownMemberId(member_id.to_string())));
            }

            if let Some(leader_assignments) = assignments {
                for (id, partitions) in leader_assignments {
                    if let Some(m) = group.members.get_mut(&id) {
                        m.assignment = partitions;
                    }
                }
                group.state = Lifecycle::Stable;
                group.rebalance_notify.notify_waiters();
            } else if group.protocol.is_none() {
                // No protocol negotiated yet and this member isn't the
                // leader: derive a default assignment so the group can
                // still make progress.
                let member_specs: Vec<MemberSpec> = group
                    .members
                    .iter()
                    .map(|(id, m)| MemberSpec {
                        member_id: id.clone(),
                        subscription: m.subscription.clone(),
                        previous_assignment: m.assignment.clone(),
                    })
                    .collect();
                let computed = assign(self.config.assignment_strategy, &member_specs, partitions_per_topic);
                for (id, partitions) in computed {
                    if let Some(m) = group.members.get_mut(&id) {
                        m.assignment = partitions;
                    }
                }
                group.state = Lifecycle::Stable;
                group.rebalance_notify.notify_waiters();
            }

            if group.state == Lifecycle::Stable {
                let assignment = group.members.get(member_id).map(|m| m.assignment.clone()).unwrap_or_default();
                return Ok(SyncGroupResult { assignment });
            }
            notify = Arc::clone(&group.rebalance_notify);
        }

        notify.notified().await;

        let group = entry.read();
        if generation != group.generation {
            return Err(Error::Group(GroupError::IllegalGeneration {
                expected: group.generation,
                actual: generation,
            }));
        }
        let assignment = group.members.get(member_id).map(|m| m.assignment.clone()).unwrap_or_default();
        Ok(SyncGroupResult { assignment })
    }

    pub fn heartbeat(&self, group_id: &str, member_id: &str, generation: i32) -> lumadb_common::Result<()> {
        let entry = self
            .groups
            .get(group_id)
            .ok_or_else(|| Error::Group(GroupError::UnknownMemberId(member_id.to_string())))?;
        let mut group = entry.write();

        if generation != group.generation {
            return Err(Error::Group(GroupError::RebalanceInProgress));
        }
        let member = group
            .members
            .get_mut(member_id)
            .ok_or_else(|| Error::Group(GroupError::UnknownMemberId(member_id.to_string())))?;
        member.last_heartbeat = Instant::now();
        Ok(())
    }

    pub fn leave_group(&self, group_id: &str, member_id: &str) -> lumadb_common::Result<()> {
        let Some(entry) = self.groups.get(group_id) else {
            return Ok(());
        };
        let mut group = entry.write();
        group.members.remove(member_id);
        if group.leader_member_id.as_deref() == Some(member_id) {
            group.leader_member_id = group.members.keys().next().cloned();
        }
        if group.members.is_empty() {
            group.state = Lifecycle::Empty;
        } else {
            let rebalance_timeout = Duration::from_millis(self.config.default_rebalance_timeout_ms);
            group.start_rebalance(rebalance_timeout);
        }
        Ok(())
    }

    /// Background sweep: evict members whose heartbeat is overdue, and
    /// promote `PreparingRebalance` groups whose join timer has fired.
    pub fn sweep(&self) {
        for entry in &self.groups {
            let mut group = entry.value().write();
            let now = Instant::now();

            let expired: Vec<String> = group
                .members
                .iter()
                .filter(|(_, m)| now.duration_since(m.last_heartbeat) > Duration::from_millis(m.session_timeout_ms))
                .map(|(id, _)| id.clone())
                .collect();
            if !expired.is_empty() {
                for id in &expired {
                    group.members.remove(id);
                }
                if group.members.is_empty() {
                    group.state = Lifecycle::Empty;
                } else if group.state != Lifecycle::PreparingRebalance {
                    let rebalance_timeout = Duration::from_millis(self.config.default_rebalance_timeout_ms);
                    group.start_rebalance(rebalance_timeout);
                }
            }

            if group.state == Lifecycle::PreparingRebalance {
                let deadline_passed = group.rebalance_deadline.is_some_and(|d| now >= d);
                if group.all_joined() || deadline_passed {
                    group.members.retain(|_, m| m.joined_this_round);
                    group.state = Lifecycle::CompletingRebalance;
                    group.protocol.get_or_insert_with(|| "roundrobin".to_string());
                }
            }
        }
    }

    pub fn offset_commit(
        &self,
        group_id: &str,
        generation: i32,
        commits: Vec<(String, PartitionId, Offset, String)>,
    ) -> lumadb_common::Result<()> {
        let entry = self
            .groups
            .entry(group_id.to_string())
            .or_insert_with(|| RwLock::new(Group::new()));
        {
            let mut group = entry.write();
            if group.state != Lifecycle::Empty && generation != group.generation {
                return Err(Error::Group(GroupError::IllegalGeneration {
                    expected: group.generation,
                    actual: generation,
                }));
            }
            for (topic, partition, offset, metadata) in &commits {
                group
                    .committed_offsets
                    .insert((topic.clone(), *partition), (*offset, metadata.clone()));
            }
        }

        let partition = Self::offsets_partition(group_id);
        if let Ok(log) = self.topic_manager.get_log(OFFSETS_TOPIC, partition) {
            let mut log = log.lock();
            for (topic, partition, offset, metadata) in commits {
                let record = OffsetCommitRecord {
                    group_id: group_id.to_string(),
                    topic,
                    partition,
                    offset,
                    metadata,
                };
                let encoded = bincode::serialize(&record).map_err(Error::from)?;
                log.append(None, Bytes::from(encoded), Vec::new(), None)?;
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn offset_fetch(&self, group_id: &str, requested: &[(String, PartitionId)]) -> Vec<(String, PartitionId, Offset)> {
        let Some(entry) = self.groups.get(group_id) else {
            return requested.iter().map(|(t, p)| (t.clone(), *p, -1)).collect();
        };
        let group = entry.read();
        requested
            .iter()
            .map(|(t, p)| {
                let offset = group
                    .committed_offsets
                    .get(&(t.clone(), *p))
                    .map_or(-1, |(o, _)| *o);
                (t.clone(), *p, offset)
            })
            .collect()
    }

    #[must_use]
    pub fn now_ms() -> Timestamp {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as Timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn coordinator() -> GroupCoordinator {
        let topic_manager = Arc::new(TopicManager::new(
            1,
            PathBuf::from("/tmp/lumadb-coordinator-test"),
            crate::topic_manager::LogDefaults {
                segment_bytes: 1024 * 1024,
                segment_ms: 0,
                retention_ms: None,
                retention_bytes: None,
            },
        ));
        GroupCoordinator::new(
            topic_manager,
            CoordinatorConfig {
                default_session_timeout_ms: 10_000,
                default_rebalance_timeout_ms: 60_000,
                assignment_strategy: AssignmentStrategy::RoundRobin,
            },
        )
    }

    #[test]
    fn first_join_becomes_leader_and_starts_rebalance() {
        let coordinator = coordinator();
        let result = coordinator
            .join_group("g1", None, "client-a", "host-a", 10_000, 60_000, vec!["orders".into()])
            .unwrap();
        assert_eq!(result.leader_id, result.member_id);
        assert_eq!(result.generation, 1);
    }

    #[test]
    fn heartbeat_with_stale_generation_triggers_rebalance_signal() {
        let coordinator = coordinator();
        let result = coordinator
            .join_group("g1", None, "client-a", "host-a", 10_000, 60_000, vec!["orders".into()])
            .unwrap();
        let err = coordinator
            .heartbeat("g1", &result.member_id, result.generation + 1)
            .unwrap_err();
        assert!(matches!(err, Error::Group(GroupError::RebalanceInProgress)));
    }

    #[test]
    fn offset_fetch_unknown_returns_sentinel() {
        let coordinator = coordinator();
        let result = coordinator.offset_fetch("nonexistent", &[("orders".to_string(), 0)]);
        assert_eq!(result[0].2, -1);
    }
}
