//! Raft node role and volatile/persistent election state

use lumadb_common::{LogIndex, NodeId, Term};

/// A node's current role in the consensus protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Follower,
    /// Pre-vote phase: canvass peers without incrementing the term, to
    /// avoid disrupting a healthy leader after a transient partition
    /// (spec §4.5, §9).
    PreCandidate,
    Candidate,
    Leader,
}

/// The full election/log-application state of one Raft node. Term and
/// `voted_for` must be durable across restarts in a production
/// deployment; here they are persisted alongside the log (see
/// `RaftLog::persist_hard_state`).
pub struct RaftState {
    pub current_term: Term,
    pub voted_for: Option<NodeId>,
    pub role: NodeState,
    pub commit_index: LogIndex,
    pub last_applied: LogIndex,
    pub leader_id: Option<NodeId>,
}

impl Default for RaftState {
    fn default() -> Self {
        Self {
            current_term: 0,
            voted_for: None,
            role: NodeState::Follower,
            commit_index: 0,
            last_applied: 0,
            leader_id: None,
        }
    }
}

impl RaftState {
    /// Step down to follower on observing a higher term (safe at any role).
    pub fn observe_term(&mut self, term: Term) -> bool {
        if term > self.current_term {
            self.current_term = term;
            self.voted_for = None;
            self.role = NodeState::Follower;
            self.leader_id = None;
            true
        } else {
            false
        }
    }
}
