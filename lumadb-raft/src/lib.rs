//! Single-Raft-group replicated cluster metadata store (spec §4.5)
//!
//! Holds topic configurations, replica assignments, ISR membership,
//! partition leadership, ACL entries, and broker registrations as a
//! deterministic state machine applied on top of a standard Raft log with
//! pre-vote enabled.

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod commands;
pub mod log;
pub mod node;
pub mod rpc;
pub mod state;
pub mod transport;

pub use commands::{ClusterView, Command, StateMachine};
pub use log::{LogEntry, RaftLog};
pub use node::RaftNode;
pub use rpc::{AppendEntriesArgs, AppendEntriesReply, RequestVoteArgs, RequestVoteReply};
pub use state::NodeState;
pub use transport::RaftTransport;
