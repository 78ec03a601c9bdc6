//! Peer RPC transport abstraction
//!
//! The wire codec for these RPCs lives outside this crate (spec §1: "the
//! Kafka wire codec for individual APIs...only the protocol behaviors...
//! are in scope"); `RaftTransport` lets `RaftNode` stay agnostic to how
//! bytes actually reach a peer.

use crate::rpc::{AppendEntriesArgs, AppendEntriesReply, RequestVoteArgs, RequestVoteReply};
use async_trait::async_trait;
use lumadb_common::NodeId;

#[async_trait]
pub trait RaftTransport: Send + Sync {
    async fn request_vote(
        &self,
        peer: NodeId,
        args: RequestVoteArgs,
    ) -> lumadb_common::Result<RequestVoteReply>;

    async fn append_entries(
        &self,
        peer: NodeId,
        args: AppendEntriesArgs,
    ) -> lumadb_common::Result<AppendEntriesReply>;
}
