//! LumaDB Common - Shared utilities and types for the broker core
//!
//! This crate provides the functionality shared by every broker component:
//! - Error types and the Kafka wire error-code taxonomy
//! - Layered configuration (file + environment overrides)
//! - Metrics and observability helpers
//! - Common type definitions (records, topics, partitions, cluster metadata)

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod metrics;
pub mod types;

pub use config::Config;
pub use error::{Error, KafkaErrorCode, Result};
pub use types::*;
