//! Metrics and observability helpers
//!
//! Thin wrappers around the `metrics` facade plus a Prometheus exporter,
//! following the same registry-singleton shape the teacher uses for its
//! storage/query metrics, repointed at broker-domain counters.

use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::OnceCell;
use std::time::Instant;

static REGISTRY: OnceCell<MetricsRegistry> = OnceCell::new();

/// Handle to the process-wide metrics exporter.
pub struct MetricsRegistry {
    handle: metrics_exporter_prometheus::PrometheusHandle,
}

impl MetricsRegistry {
    /// Install the global recorder. Safe to call more than once; only the
    /// first call takes effect.
    pub fn install() -> &'static MetricsRegistry {
        REGISTRY.get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install prometheus recorder");
            MetricsRegistry { handle }
        })
    }

    /// Fetch the singleton, installing it if this is the first call.
    #[must_use]
    pub fn global() -> &'static MetricsRegistry {
        REGISTRY.get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install prometheus recorder");
            MetricsRegistry { handle }
        })
    }

    /// Render metrics in the Prometheus text exposition format.
    #[must_use]
    pub fn export_prometheus(&self) -> String {
        self.handle.render()
    }
}

/// RAII latency timer: records into the named histogram on drop.
pub struct LatencyTimer {
    name: &'static str,
    start: Instant,
    labels: Vec<(&'static str, String)>,
}

impl LatencyTimer {
    #[must_use]
    pub fn start(name: &'static str) -> Self {
        Self {
            name,
            start: Instant::now(),
            labels: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_label(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.labels.push((key, value.into()));
        self
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed().as_secs_f64();
        if self.labels.is_empty() {
            metrics::histogram!(self.name).record(elapsed);
        } else {
            let labels: Vec<(String, String)> = self
                .labels
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.clone()))
                .collect();
            metrics::histogram!(self.name, &labels).record(elapsed);
        }
    }
}

/// Produce-path metrics, recorded by the `TopicManager`/`Replicator` append path.
pub mod produce {
    pub fn record_append(topic: &str, partition: i32, record_count: usize, bytes: usize) {
        let partition = partition.to_string();
        metrics::counter!("lumadb_records_produced_total", "topic" => topic.to_string(), "partition" => partition.clone())
            .increment(record_count as u64);
        metrics::counter!("lumadb_bytes_produced_total", "topic" => topic.to_string(), "partition" => partition)
            .increment(bytes as u64);
    }

    pub fn record_rejected(topic: &str, reason: &'static str) {
        metrics::counter!("lumadb_produce_rejected_total", "topic" => topic.to_string(), "reason" => reason)
            .increment(1);
    }
}

/// Fetch-path metrics.
pub mod fetch {
    pub fn record_fetch(topic: &str, partition: i32, record_count: usize, bytes: usize) {
        let partition = partition.to_string();
        metrics::counter!("lumadb_records_consumed_total", "topic" => topic.to_string(), "partition" => partition.clone())
            .increment(record_count as u64);
        metrics::counter!("lumadb_bytes_consumed_total", "topic" => topic.to_string(), "partition" => partition)
            .increment(bytes as u64);
    }

    pub fn set_consumer_lag(group: &str, topic: &str, partition: i32, lag: i64) {
        metrics::gauge!(
            "lumadb_consumer_lag",
            "group" => group.to_string(),
            "topic" => topic.to_string(),
            "partition" => partition.to_string()
        )
        .set(lag as f64);
    }
}

/// Replication/ISR metrics, for Replicator eviction/admission events (spec §4.4).
pub mod replication {
    pub fn record_isr_shrink(topic: &str, partition: i32) {
        metrics::counter!("lumadb_isr_shrinks_total", "topic" => topic.to_string(), "partition" => partition.to_string())
            .increment(1);
    }

    pub fn record_isr_expand(topic: &str, partition: i32) {
        metrics::counter!("lumadb_isr_expansions_total", "topic" => topic.to_string(), "partition" => partition.to_string())
            .increment(1);
    }

    pub fn set_replica_lag_ms(topic: &str, partition: i32, follower: u64, lag_ms: u64) {
        metrics::gauge!(
            "lumadb_replica_lag_ms",
            "topic" => topic.to_string(),
            "partition" => partition.to_string(),
            "follower" => follower.to_string()
        )
        .set(lag_ms as f64);
    }

    pub fn set_high_watermark(topic: &str, partition: i32, offset: i64) {
        metrics::gauge!("lumadb_high_watermark", "topic" => topic.to_string(), "partition" => partition.to_string())
            .set(offset as f64);
    }
}

/// Raft metadata-plane metrics.
pub mod raft {
    pub fn record_election() {
        metrics::counter!("lumadb_raft_elections_total").increment(1);
    }

    pub fn record_leader_change(term: u64) {
        metrics::counter!("lumadb_raft_leader_changes_total").increment(1);
        metrics::gauge!("lumadb_raft_term").set(term as f64);
    }

    pub fn record_append_entries(success: bool) {
        let label = if success { "success" } else { "failure" };
        metrics::counter!("lumadb_raft_append_entries_total", "result" => label).increment(1);
    }

    pub fn set_commit_index(index: u64) {
        metrics::gauge!("lumadb_raft_commit_index").set(index as f64);
    }
}

/// Consumer group coordinator metrics.
pub mod coordinator {
    pub fn record_rebalance(group: &str) {
        metrics::counter!("lumadb_rebalances_total", "group" => group.to_string()).increment(1);
    }

    pub fn record_member_join(group: &str) {
        metrics::counter!("lumadb_group_joins_total", "group" => group.to_string()).increment(1);
    }

    pub fn record_member_leave(group: &str) {
        metrics::counter!("lumadb_group_leaves_total", "group" => group.to_string()).increment(1);
    }

    pub fn set_group_size(group: &str, size: usize) {
        metrics::gauge!("lumadb_group_size", "group" => group.to_string()).set(size as f64);
    }
}
