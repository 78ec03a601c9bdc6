//! Per-client token buckets for produce/fetch byte-rate limiting
//! (spec §5: "Throttling: token buckets per client...").

use dashmap::DashMap;
use parking_lot::Mutex;
use std::time::Instant;

struct Bucket {
    tokens: f64,
    capacity: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(refill_per_sec: f64) -> Self {
        Self {
            tokens: refill_per_sec,
            capacity: refill_per_sec,
            refill_per_sec,
            last_refill: Instant::now(),
        }
    }

    fn try_consume(&mut self, amount: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;

        if self.tokens >= amount {
            self.tokens -= amount;
            true
        } else {
            false
        }
    }
}

/// Per-client rate limiter. `None` limits mean unthrottled, matching
/// `throttle.producer.bytes.per.second` / `throttle.consumer.bytes.per.second`
/// being unset.
pub struct Throttle {
    produce_limit: Option<u64>,
    consume_limit: Option<u64>,
    produce_buckets: DashMap<String, Mutex<Bucket>>,
    consume_buckets: DashMap<String, Mutex<Bucket>>,
}

impl Throttle {
    #[must_use]
    pub fn new(produce_limit: Option<u64>, consume_limit: Option<u64>) -> Self {
        Self {
            produce_limit,
            consume_limit,
            produce_buckets: DashMap::new(),
            consume_buckets: DashMap::new(),
        }
    }

    #[must_use]
    pub fn allow_produce(&self, client_id: &str, bytes: usize) -> bool {
        let Some(limit) = self.produce_limit else {
            return true;
        };
        let bucket = self
            .produce_buckets
            .entry(client_id.to_string())
            .or_insert_with(|| Mutex::new(Bucket::new(limit as f64)));
        bucket.lock().try_consume(bytes as f64)
    }

    #[must_use]
    pub fn allow_fetch(&self, client_id: &str, bytes: usize) -> bool {
        let Some(limit) = self.consume_limit else {
            return true;
        };
        let bucket = self
            .consume_buckets
            .entry(client_id.to_string())
            .or_insert_with(|| Mutex::new(Bucket::new(limit as f64)));
        bucket.lock().try_consume(bytes as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unthrottled_always_allows() {
        let throttle = Throttle::new(None, None);
        assert!(throttle.allow_produce("client-a", 10_000_000));
    }

    #[test]
    fn exhausts_bucket_then_recovers_denied() {
        let throttle = Throttle::new(Some(100), None);
        assert!(throttle.allow_produce("client-a", 100));
        assert!(!throttle.allow_produce("client-a", 100));
    }
}
