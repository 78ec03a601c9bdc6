//! Layered broker configuration (spec §6.4)
//!
//! Configuration is loaded from an optional file (TOML or YAML, selected by
//! extension) and then overridden by `LUMADB_*` environment variables, the
//! same two-layer precedence the teacher's config loader uses.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level broker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub broker: BrokerConfig,
    pub log: LogConfig,
    pub replication: ReplicationConfig,
    pub raft: RaftConfig,
    pub group: GroupConfig,
    pub fetch: FetchConfig,
    pub throttle: ThrottleConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            log: LogConfig::default(),
            replication: ReplicationConfig::default(),
            raft: RaftConfig::default(),
            group: GroupConfig::default(),
            fetch: FetchConfig::default(),
            throttle: ThrottleConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub id: u64,
    pub listeners: Vec<String>,
    pub data_dir: PathBuf,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            id: 0,
            listeners: vec!["127.0.0.1:9092".to_string()],
            data_dir: PathBuf::from("./data"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub segment_bytes: u64,
    pub segment_ms: u64,
    pub retention_ms: Option<u64>,
    pub retention_bytes: Option<u64>,
    pub index_interval_bytes: u32,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            segment_bytes: 1024 * 1024 * 1024,
            segment_ms: 7 * 24 * 60 * 60 * 1000,
            retention_ms: Some(7 * 24 * 60 * 60 * 1000),
            retention_bytes: None,
            index_interval_bytes: 4096,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    pub replica_lag_time_max_ms: u64,
    pub min_insync_replicas: u32,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            replica_lag_time_max_ms: 10_000,
            min_insync_replicas: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RaftConfig {
    pub heartbeat_timeout_ms: u64,
    pub election_timeout_ms: u64,
    pub leader_lease_timeout_ms: u64,
    pub prevote_enabled: bool,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_ms: 1_000,
            election_timeout_ms: 3_000,
            leader_lease_timeout_ms: 500,
            prevote_enabled: true,
        }
    }
}

impl RaftConfig {
    #[must_use]
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    #[must_use]
    pub fn election_timeout(&self) -> Duration {
        Duration::from_millis(self.election_timeout_ms)
    }

    #[must_use]
    pub fn leader_lease_timeout(&self) -> Duration {
        Duration::from_millis(self.leader_lease_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupConfig {
    pub session_timeout_ms: u64,
    pub rebalance_timeout_ms: u64,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            session_timeout_ms: 10_000,
            rebalance_timeout_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub max_wait_ms: u64,
    pub min_bytes: u32,
    pub max_bytes: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_wait_ms: 500,
            min_bytes: 1,
            max_bytes: 50 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    pub producer_bytes_per_second: Option<u64>,
    pub consumer_bytes_per_second: Option<u64>,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            producer_bytes_per_second: None,
            consumer_bytes_per_second: None,
        }
    }
}

impl Config {
    /// Load configuration from an optional file, then apply `LUMADB_*`
    /// environment overrides for the handful of settings operators most
    /// commonly need to override per-node (broker id, listeners, data dir).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml" | "yml") => serde_yaml::from_str(&contents)
                .map_err(|e| Error::Config(format!("invalid yaml config: {e}"))),
            _ => toml::from_str(&contents)
                .map_err(|e| Error::Config(format!("invalid toml config: {e}"))),
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var("LUMADB_BROKER_ID") {
            if let Ok(id) = id.parse() {
                self.broker.id = id;
            }
        }
        if let Ok(listeners) = std::env::var("LUMADB_LISTENERS") {
            self.broker.listeners = listeners.split(',').map(str::trim).map(String::from).collect();
        }
        if let Ok(dir) = std::env::var("LUMADB_DATA_DIR") {
            self.broker.data_dir = PathBuf::from(dir);
        }
    }

    fn validate(&self) -> Result<()> {
        if self.broker.listeners.is_empty() {
            return Err(Error::Config("at least one listener is required".into()));
        }
        if self.replication.min_insync_replicas == 0 {
            return Err(Error::Config("min_insync_replicas must be >= 1".into()));
        }
        if self.raft.election_timeout_ms <= self.raft.heartbeat_timeout_ms {
            return Err(Error::Config(
                "raft.election_timeout_ms must exceed raft.heartbeat_timeout_ms".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_empty_listeners() {
        let mut config = Config::default();
        config.broker.listeners.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_min_isr() {
        let mut config = Config::default();
        config.replication.min_insync_replicas = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn loads_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lumadb.toml");
        std::fs::write(
            &path,
            r#"
            [broker]
            id = 7
            listeners = ["0.0.0.0:9093"]
            "#,
        )
        .unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.broker.id, 7);
        assert_eq!(config.broker.listeners, vec!["0.0.0.0:9093".to_string()]);
    }
}
