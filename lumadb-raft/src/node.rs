//! Raft node: pre-vote election, log replication, and commit/apply
//! (spec §4.5)

use crate::commands::{ClusterView, Command, StateMachine};
use crate::log::{LogEntry, RaftLog};
use crate::rpc::{AppendEntriesArgs, AppendEntriesReply, RequestVoteArgs, RequestVoteReply};
use crate::state::{NodeState, RaftState};
use crate::transport::RaftTransport;
use lumadb_common::config::RaftConfig;
use lumadb_common::error::{Error, RaftError};
use lumadb_common::{LogIndex, NodeId, Term};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct HardState {
    current_term: Term,
    voted_for: Option<NodeId>,
}

struct Inner {
    raft_state: RaftState,
    log: RaftLog,
    state_machine: StateMachine,
    next_index: HashMap<NodeId, LogIndex>,
    match_index: HashMap<NodeId, LogIndex>,
    last_contact: Instant,
}

/// One member of the single Raft group backing cluster metadata. Owns its
/// persisted log and the deterministic `StateMachine` applied to it.
pub struct RaftNode {
    node_id: NodeId,
    peers: Vec<NodeId>,
    config: RaftConfig,
    transport: Arc<dyn RaftTransport>,
    state_dir: PathBuf,
    inner: Mutex<Inner>,
}

impl RaftNode {
    pub fn new(
        node_id: NodeId,
        peers: Vec<NodeId>,
        config: RaftConfig,
        data_dir: &Path,
        transport: Arc<dyn RaftTransport>,
    ) -> lumadb_common::Result<Arc<Self>> {
        let raft_dir = data_dir.join(".raft");
        std::fs::create_dir_all(raft_dir.join("snapshot"))?;
        let state_dir = raft_dir.join("state");
        std::fs::create_dir_all(&state_dir)?;

        let log = RaftLog::open(&raft_dir.join("log"))?;
        let hard_state = Self::load_hard_state(&state_dir)?;

        let raft_state = RaftState {
            current_term: hard_state.current_term,
            voted_for: hard_state.voted_for,
            role: NodeState::Follower,
            commit_index: 0,
            last_applied: 0,
            leader_id: None,
        };

        Ok(Arc::new(Self {
            node_id,
            peers,
            config,
            transport,
            state_dir,
            inner: Mutex::new(Inner {
                raft_state,
                log,
                state_machine: StateMachine::new(),
                next_index: HashMap::new(),
                match_index: HashMap::new(),
                last_contact: Instant::now(),
            }),
        }))
    }

    fn hard_state_path(state_dir: &Path) -> PathBuf {
        state_dir.join("hardstate.json")
    }

    fn load_hard_state(state_dir: &Path) -> lumadb_common::Result<HardState> {
        let path = Self::hard_state_path(state_dir);
        if !path.exists() {
            return Ok(HardState::default());
        }
        let data = std::fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }

    fn persist_hard_state(&self, state: &RaftState) -> lumadb_common::Result<()> {
        let hard_state = HardState {
            current_term: state.current_term,
            voted_for: state.voted_for,
        };
        let json = serde_json::to_vec(&hard_state)?;
        std::fs::write(Self::hard_state_path(&self.state_dir), json)?;
        Ok(())
    }

    #[must_use]
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub async fn is_leader(&self) -> bool {
        self.inner.lock().await.raft_state.role == NodeState::Leader
    }

    pub async fn current_leader(&self) -> Option<NodeId> {
        self.inner.lock().await.raft_state.leader_id
    }

    pub async fn term(&self) -> Term {
        self.inner.lock().await.raft_state.current_term
    }

    pub async fn view(&self) -> ClusterView {
        self.inner.lock().await.state_machine.view()
    }

    fn election_timeout(&self) -> Duration {
        let base = self.config.election_timeout_ms;
        let jitter = rand::thread_rng().gen_range(0..base / 2 + 1);
        Duration::from_millis(base + jitter)
    }

    /// Drives election timeouts and leader heartbeats until `cancel`
    /// resolves. Intended to be spawned as a background task.
    pub async fn run(self: Arc<Self>, mut cancel: tokio::sync::oneshot::Receiver<()>) {
        loop {
            let sleep_for = {
                let inner = self.inner.lock().await;
                if inner.raft_state.role == NodeState::Leader {
                    Duration::from_millis(self.config.heartbeat_timeout_ms)
                } else {
                    self.election_timeout()
                }
            };

            tokio::select! {
                () = tokio::time::sleep(sleep_for) => {}
                _ = &mut cancel => {
                    info!(node_id = self.node_id, "raft node shutting down");
                    return;
                }
            }

            let (role, last_contact) = {
                let inner = self.inner.lock().await;
                (inner.raft_state.role, inner.last_contact)
            };

            match role {
                NodeState::Leader => self.send_heartbeats().await,
                _ => {
                    if last_contact.elapsed() >= Duration::from_millis(self.config.election_timeout_ms) {
                        self.run_election().await;
                    }
                }
            }
        }
    }

    async fn run_election(self: &Arc<Self>) {
        if self.config.prevote_enabled && !self.win_prevote().await {
            debug!(node_id = self.node_id, "pre-vote failed, staying follower");
            return;
        }

        let (term, last_log_index, last_log_term) = {
            let mut inner = self.inner.lock().await;
            inner.raft_state.current_term += 1;
            inner.raft_state.role = NodeState::Candidate;
            inner.raft_state.voted_for = Some(self.node_id);
            inner.last_contact = Instant::now();
            let _ = self.persist_hard_state(&inner.raft_state);
            (
                inner.raft_state.current_term,
                inner.log.last_index(),
                inner.log.last_term(),
            )
        };

        info!(node_id = self.node_id, term, "starting election");
        lumadb_common::metrics::raft::record_election();

        let args = RequestVoteArgs {
            term,
            candidate_id: self.node_id,
            last_log_index,
            last_log_term,
            pre_vote: false,
        };

        let mut votes = 1; // self-vote
        let replies = self.broadcast_request_vote(args).await;
        for reply in replies.into_iter().flatten() {
            let mut inner = self.inner.lock().await;
            if inner.raft_state.observe_term(reply.term) {
                let _ = self.persist_hard_state(&inner.raft_state);
                return;
            }
            drop(inner);
            if reply.vote_granted {
                votes += 1;
            }
        }

        let quorum = (self.peers.len() + 1) / 2 + 1;
        if votes >= quorum {
            self.become_leader(term).await;
        }
    }

    async fn win_prevote(self: &Arc<Self>) -> bool {
        let (term, last_log_index, last_log_term) = {
            let inner = self.inner.lock().await;
            (
                inner.raft_state.current_term + 1,
                inner.log.last_index(),
                inner.log.last_term(),
            )
        };
        let args = RequestVoteArgs {
            term,
            candidate_id: self.node_id,
            last_log_index,
            last_log_term,
            pre_vote: true,
        };
        let replies = self.broadcast_request_vote(args).await;
        let votes = 1 + replies.into_iter().flatten().filter(|r| r.vote_granted).count();
        let quorum = (self.peers.len() + 1) / 2 + 1;
        votes >= quorum
    }

    async fn broadcast_request_vote(
        self: &Arc<Self>,
        args: RequestVoteArgs,
    ) -> Vec<Option<RequestVoteReply>> {
        let futures = self.peers.iter().map(|&peer| {
            let transport = self.transport.clone();
            let args = args.clone();
            async move {
                timeout(Duration::from_millis(1_500), transport.request_vote(peer, args))
                    .await
                    .ok()
                    .and_then(std::result::Result::ok)
            }
        });
        futures::future::join_all(futures).await
    }

    async fn become_leader(self: &Arc<Self>, expected_term: Term) {
        let mut inner = self.inner.lock().await;
        if inner.raft_state.current_term != expected_term || inner.raft_state.role != NodeState::Candidate {
            return;
        }
        inner.raft_state.role = NodeState::Leader;
        inner.raft_state.leader_id = Some(self.node_id);
        let next = inner.log.last_index() + 1;
        for &peer in &self.peers {
            inner.next_index.insert(peer, next);
            inner.match_index.insert(peer, 0);
        }
        // With no peers (or peers already caught up) self's own log is the
        // whole quorum; don't wait for a round of AppendEntries replies
        // that may never come to recognize entries already committed by
        // a prior leader.
        self.try_advance_commit(&mut inner);
        info!(node_id = self.node_id, term = expected_term, "became raft leader");
        lumadb_common::metrics::raft::record_leader_change(expected_term);
    }

    async fn send_heartbeats(self: &Arc<Self>) {
        let peers = self.peers.clone();
        for peer in peers {
            let _ = self.replicate_to_peer(peer).await;
        }
    }

    async fn replicate_to_peer(self: &Arc<Self>, peer: NodeId) -> lumadb_common::Result<bool> {
        let (term, prev_log_index, prev_log_term, entries, leader_commit) = {
            let inner = self.inner.lock().await;
            if inner.raft_state.role != NodeState::Leader {
                return Ok(false);
            }
            let next = *inner.next_index.get(&peer).unwrap_or(&(inner.log.last_index() + 1));
            let prev_log_index = next.saturating_sub(1);
            let prev_log_term = inner.log.term_at(prev_log_index).unwrap_or(0);
            (
                inner.raft_state.current_term,
                prev_log_index,
                prev_log_term,
                inner.log.entries_from(next),
                inner.raft_state.commit_index,
            )
        };

        let args = AppendEntriesArgs {
            term,
            leader_id: self.node_id,
            prev_log_index,
            prev_log_term,
            entries: entries.clone(),
            leader_commit,
        };

        let reply = timeout(Duration::from_millis(1_500), self.transport.append_entries(peer, args)).await;
        let reply = match reply {
            Ok(Ok(reply)) => reply,
            _ => return Ok(false),
        };

        let mut inner = self.inner.lock().await;
        if inner.raft_state.observe_term(reply.term) {
            let _ = self.persist_hard_state(&inner.raft_state);
            return Ok(false);
        }

        if reply.success {
            let new_match = prev_log_index + entries.len() as LogIndex;
            inner.match_index.insert(peer, new_match);
            inner.next_index.insert(peer, new_match + 1);
            self.try_advance_commit(&mut inner);
            lumadb_common::metrics::raft::record_append_entries(true);
            Ok(true)
        } else {
            let retry_from = reply.conflict_index.unwrap_or(prev_log_index.saturating_sub(1)).max(1);
            inner.next_index.insert(peer, retry_from);
            lumadb_common::metrics::raft::record_append_entries(false);
            Ok(false)
        }
    }

    fn try_advance_commit(&self, inner: &mut Inner) {
        let mut match_indices: Vec<LogIndex> = inner.match_index.values().copied().collect();
        match_indices.push(inner.log.last_index()); // self always matches its own log
        match_indices.sort_unstable_by(|a, b| b.cmp(a));
        let quorum_pos = self.peers.len() / 2; // median across self+peers
        if let Some(&candidate) = match_indices.get(quorum_pos) {
            if candidate > inner.raft_state.commit_index {
                if let Some(term) = inner.log.term_at(candidate) {
                    if term == inner.raft_state.current_term {
                        inner.raft_state.commit_index = candidate;
                        self.apply_committed(inner);
                        lumadb_common::metrics::raft::set_commit_index(candidate);
                    }
                }
            }
        }
    }

    fn apply_committed(&self, inner: &mut Inner) {
        while inner.raft_state.last_applied < inner.raft_state.commit_index {
            let next = inner.raft_state.last_applied + 1;
            if let Some(entry) = inner.log.entry(next) {
                inner.state_machine.apply(&entry.command);
            }
            inner.raft_state.last_applied = next;
        }
    }

    /// Propose a command. Only the leader accepts; followers must be
    /// retried against the leader (spec §4.5 Failure semantics).
    pub async fn propose(self: &Arc<Self>, command: Command) -> lumadb_common::Result<LogIndex> {
        let index = {
            let mut inner = self.inner.lock().await;
            if inner.raft_state.role != NodeState::Leader {
                return Err(Error::Raft(RaftError::NotMetadataLeader));
            }
            inner.state_machine.validate(&command)?;
            let index = inner.log.last_index() + 1;
            let term = inner.raft_state.current_term;
            inner.log.append(vec![LogEntry {
                term,
                index,
                command,
            }])?;
            // No peers to wait on (single-node broker): the leader's own
            // log is the entire quorum, so commit the entry right away
            // instead of looping on `replicate_to_peer` calls that have
            // nothing to contact.
            self.try_advance_commit(&mut inner);
            index
        };

        let deadline = Instant::now() + Duration::from_millis(self.config.election_timeout_ms);
        let peers = self.peers.clone();
        loop {
            let futures = peers.iter().map(|&peer| self.replicate_to_peer(peer));
            let _ = futures::future::join_all(futures).await;

            if self.inner.lock().await.raft_state.commit_index >= index {
                return Ok(index);
            }
            if Instant::now() >= deadline {
                return Err(Error::Raft(RaftError::Timeout));
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Handle an inbound `RequestVote` RPC.
    pub async fn handle_request_vote(&self, args: RequestVoteArgs) -> RequestVoteReply {
        let mut inner = self.inner.lock().await;

        if args.pre_vote {
            let up_to_date = Self::log_is_up_to_date(
                args.last_log_index,
                args.last_log_term,
                inner.log.last_index(),
                inner.log.last_term(),
            );
            let recently_heard_from_leader =
                inner.last_contact.elapsed() < Duration::from_millis(self.config.election_timeout_ms);
            let granted = up_to_date && !recently_heard_from_leader;
            return RequestVoteReply {
                term: inner.raft_state.current_term,
                vote_granted: granted,
            };
        }

        if args.term < inner.raft_state.current_term {
            return RequestVoteReply {
                term: inner.raft_state.current_term,
                vote_granted: false,
            };
        }
        if inner.raft_state.observe_term(args.term) {
            let _ = self.persist_hard_state(&inner.raft_state);
        }

        let can_vote = inner.raft_state.voted_for.is_none()
            || inner.raft_state.voted_for == Some(args.candidate_id);
        let up_to_date = Self::log_is_up_to_date(
            args.last_log_index,
            args.last_log_term,
            inner.log.last_index(),
            inner.log.last_term(),
        );

        if can_vote && up_to_date {
            inner.raft_state.voted_for = Some(args.candidate_id);
            inner.last_contact = Instant::now();
            let _ = self.persist_hard_state(&inner.raft_state);
            RequestVoteReply {
                term: inner.raft_state.current_term,
                vote_granted: true,
            }
        } else {
            RequestVoteReply {
                term: inner.raft_state.current_term,
                vote_granted: false,
            }
        }
    }

    fn log_is_up_to_date(
        candidate_last_index: LogIndex,
        candidate_last_term: Term,
        local_last_index: LogIndex,
        local_last_term: Term,
    ) -> bool {
        candidate_last_term > local_last_term
            || (candidate_last_term == local_last_term && candidate_last_index >= local_last_index)
    }

    /// Handle an inbound `AppendEntries` RPC (also used as heartbeat).
    pub async fn handle_append_entries(&self, args: AppendEntriesArgs) -> AppendEntriesReply {
        let mut inner = self.inner.lock().await;

        if args.term < inner.raft_state.current_term {
            return AppendEntriesReply {
                term: inner.raft_state.current_term,
                success: false,
                conflict_index: None,
            };
        }

        inner.raft_state.observe_term(args.term);
        inner.raft_state.role = NodeState::Follower;
        inner.raft_state.leader_id = Some(args.leader_id);
        inner.last_contact = Instant::now();

        if args.prev_log_index > 0 {
            match inner.log.term_at(args.prev_log_index) {
                Some(term) if term == args.prev_log_term => {}
                _ => {
                    let conflict = inner.log.last_index().min(args.prev_log_index);
                    return AppendEntriesReply {
                        term: inner.raft_state.current_term,
                        success: false,
                        conflict_index: Some(conflict.max(1) - 1),
                    };
                }
            }
        }

        if let Err(e) = inner.log.append(args.entries) {
            warn!(error = %e, "failed to persist raft log entries");
            return AppendEntriesReply {
                term: inner.raft_state.current_term,
                success: false,
                conflict_index: None,
            };
        }

        if args.leader_commit > inner.raft_state.commit_index {
            inner.raft_state.commit_index = args.leader_commit.min(inner.log.last_index());
            self.apply_committed(&mut inner);
        }

        AppendEntriesReply {
            term: inner.raft_state.current_term,
            success: true,
            conflict_index: None,
        }
    }
}
