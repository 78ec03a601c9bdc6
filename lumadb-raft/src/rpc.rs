//! Raft RPC message types (RequestVote, AppendEntries)

use crate::log::LogEntry;
use lumadb_common::{LogIndex, NodeId, Term};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteArgs {
    pub term: Term,
    pub candidate_id: NodeId,
    pub last_log_index: LogIndex,
    pub last_log_term: Term,
    /// True during the pre-vote phase: does not require the candidate to
    /// have incremented its term, and does not grant a binding vote
    /// (spec §4.5, §9).
    pub pre_vote: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteReply {
    pub term: Term,
    pub vote_granted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesArgs {
    pub term: Term,
    pub leader_id: NodeId,
    pub prev_log_index: LogIndex,
    pub prev_log_term: Term,
    pub entries: Vec<LogEntry>,
    pub leader_commit: LogIndex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesReply {
    pub term: Term,
    pub success: bool,
    /// When `success` is false due to a log mismatch, the index the
    /// follower suggests the leader retry from (fast log backtracking).
    pub conflict_index: Option<LogIndex>,
}
