//! LumaDB Streaming - topic management, ISR replication, and consumer
//! group coordination
//!
//! This crate owns the broker's data-plane runtime: the per-partition
//! `Log` instances (via `lumadb-storage`), the `Replicator` that keeps
//! followers in sync, and the `GroupCoordinator` that drives consumer
//! rebalances.

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod batch;
pub mod coordinator;
pub mod network;
pub mod reactor;
pub mod replicator;
pub mod topic_manager;

pub use batch::AdaptiveBatcher;
pub use coordinator::GroupCoordinator;
pub use network::ZeroCopyBuffer;
pub use reactor::Reactor;
pub use replicator::Replicator;
pub use topic_manager::TopicManager;
