//! Adaptive batch-size controller
//!
//! The produce hot path accumulates records up to a target batch size
//! before handing them to the Log. The target grows while throughput is
//! improving and shrinks otherwise, bounded by configured min/max (spec
//! §9 open question, resolved: grow-on-improvement / shrink-otherwise).

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

pub struct AdaptiveBatcher {
    min_batch_size: usize,
    max_batch_size: usize,
    target: AtomicUsize,
    last_throughput: AtomicU64,
}

impl AdaptiveBatcher {
    #[must_use]
    pub fn new(min_batch_size: usize, max_batch_size: usize) -> Self {
        Self {
            min_batch_size,
            max_batch_size,
            target: AtomicUsize::new(min_batch_size),
            last_throughput: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn target_batch_size(&self) -> usize {
        self.target.load(Ordering::Relaxed)
    }

    /// Feed back a throughput sample (records processed over `elapsed`).
    /// Grows the target batch size on improving throughput, shrinks it
    /// otherwise, never outside `[min_batch_size, max_batch_size]`.
    pub fn record_sample(&self, records: u64, elapsed: Duration) {
        if elapsed.is_zero() {
            return;
        }
        let throughput = (records as f64 / elapsed.as_secs_f64()) as u64;
        let previous = self.last_throughput.swap(throughput, Ordering::Relaxed);

        let current = self.target.load(Ordering::Relaxed);
        let next = if throughput >= previous {
            (current * 2).min(self.max_batch_size)
        } else {
            (current / 2).max(self.min_batch_size)
        };
        self.target.store(next, Ordering::Relaxed);
    }
}

/// Accumulates records for one partition's producer, flushing either when
/// the adaptive target is reached or a linger deadline expires.
pub struct RecordAccumulator {
    records: Vec<lumadb_common::Record>,
    deadline: Option<Instant>,
    linger: Duration,
}

impl RecordAccumulator {
    #[must_use]
    pub fn new(linger: Duration) -> Self {
        Self {
            records: Vec::new(),
            deadline: None,
            linger,
        }
    }

    pub fn push(&mut self, record: lumadb_common::Record) {
        if self.records.is_empty() {
            self.deadline = Some(Instant::now() + self.linger);
        }
        self.records.push(record);
    }

    #[must_use]
    pub fn should_flush(&self, target_batch_size: usize) -> bool {
        self.records.len() >= target_batch_size
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    pub fn drain(&mut self) -> Vec<lumadb_common::Record> {
        self.deadline = None;
        std::mem::take(&mut self.records)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_on_improving_throughput() {
        let batcher = AdaptiveBatcher::new(16, 4096);
        batcher.record_sample(100, Duration::from_secs(1));
        batcher.record_sample(200, Duration::from_secs(1));
        assert!(batcher.target_batch_size() > 16);
    }

    #[test]
    fn shrinks_on_degrading_throughput() {
        let batcher = AdaptiveBatcher::new(16, 4096);
        batcher.record_sample(1000, Duration::from_secs(1));
        batcher.record_sample(1000, Duration::from_secs(1));
        let grown = batcher.target_batch_size();
        batcher.record_sample(10, Duration::from_secs(1));
        assert!(batcher.target_batch_size() < grown);
    }

    #[test]
    fn bounded_by_max() {
        let batcher = AdaptiveBatcher::new(16, 64);
        for _ in 0..10 {
            batcher.record_sample(1_000_000, Duration::from_secs(1));
        }
        assert!(batcher.target_batch_size() <= 64);
    }
}
