//! Kafka wire protocol behaviors for LumaDB: connection handling, request
//! dispatch, and per-client throttling (spec §6.1, §5).
//!
//! Byte-exact compatibility with real Kafka clients is out of scope; this
//! crate implements the generic request/response framing described in the
//! spec and the server-side behavior of every in-scope API key.

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod api;
pub mod frame;
pub mod kafka;
pub mod throttle;

pub use api::{ApiRequest, ApiResponse};
pub use frame::RequestHeader;
pub use kafka::KafkaServer;
pub use throttle::Throttle;
