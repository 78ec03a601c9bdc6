//! Single-node placeholder transports.
//!
//! Real inter-broker wire transport (peer `RequestVote`/`AppendEntries`,
//! follower `Fetch`) is out of scope here the same way per-API Kafka byte
//! compatibility is (spec §1): these traits exist so `RaftNode` and
//! `Replicator` stay decoupled from how bytes reach a peer, and this
//! binary supplies the degenerate single-node implementation, the same
//! role the teacher's `RaftStub` played.

use async_trait::async_trait;
use lumadb_common::error::{Error, RaftError, ReplicationError};
use lumadb_common::NodeId;
use lumadb_raft::transport::RaftTransport;
use lumadb_raft::{AppendEntriesArgs, AppendEntriesReply, RequestVoteArgs, RequestVoteReply};
use lumadb_streaming::replicator::{FetchRequest, FetchResponse, ReplicaTransport};

pub struct SingleNodeTransport;

#[async_trait]
impl RaftTransport for SingleNodeTransport {
    async fn request_vote(&self, _peer: NodeId, _args: RequestVoteArgs) -> lumadb_common::Result<RequestVoteReply> {
        Err(Error::Raft(RaftError::Timeout))
    }

    async fn append_entries(&self, _peer: NodeId, _args: AppendEntriesArgs) -> lumadb_common::Result<AppendEntriesReply> {
        Err(Error::Raft(RaftError::Timeout))
    }
}

#[async_trait]
impl ReplicaTransport for SingleNodeTransport {
    async fn fetch(&self, _leader: NodeId, _request: FetchRequest) -> lumadb_common::Result<FetchResponse> {
        Err(Error::Replication(ReplicationError::LeaderNotAvailable))
    }
}
