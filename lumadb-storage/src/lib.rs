//! LumaDB Storage - segmented append-only log storage engine
//!
//! Mirrors the on-disk layout of a Kafka-style partition log: a directory
//! per topic-partition containing zero-padded base-offset `.log`/`.index`/
//! `.timeindex` files, a `.snapshots/` directory and manifest.

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod index;
pub mod log;
pub mod record;
pub mod segment;
pub mod snapshot;

pub use index::{OffsetIndex, TimeIndex};
pub use log::Log;
pub use record::{decode_record, encode_record, EncodedRecord};
pub use segment::Segment;
pub use snapshot::{SnapshotHandle, SnapshotManifest};
