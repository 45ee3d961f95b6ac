//! Per-client token-bucket rate limiter.
//!
//! Shipped but not wired into the router; the upstream pool's quota and
//! cooldown currently bound traffic instead.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct LimiterConfig {
    /// Maximum burst size in tokens.
    pub capacity: f64,
    /// Tokens replenished per second.
    pub refill_per_second: f64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            capacity: 30.0,
            refill_per_second: 1.0,
        }
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    refilled_at: Instant,
}

/// Token-bucket limiter keyed by client identity (e.g. remote address).
pub struct RateLimiter {
    config: LimiterConfig,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new(config: LimiterConfig) -> Self {
        Self {
            config,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Takes one token for `client`. Returns false when the bucket is dry.
    pub fn try_acquire(&self, client: &str) -> bool {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().expect("limiter mutex poisoned");
        let bucket = buckets.entry(client.to_string()).or_insert_with(|| Bucket {
            tokens: self.config.capacity,
            refilled_at: now,
        });
        let elapsed = now.duration_since(bucket.refilled_at).as_secs_f64();
        bucket.tokens =
            (bucket.tokens + elapsed * self.config.refill_per_second).min(self.config.capacity);
        bucket.refilled_at = now;
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_up_to_capacity_then_deny() {
        let limiter = RateLimiter::new(LimiterConfig {
            capacity: 3.0,
            refill_per_second: 0.0,
        });
        assert!(limiter.try_acquire("1.2.3.4"));
        assert!(limiter.try_acquire("1.2.3.4"));
        assert!(limiter.try_acquire("1.2.3.4"));
        assert!(!limiter.try_acquire("1.2.3.4"));
    }

    #[test]
    fn clients_have_independent_buckets() {
        let limiter = RateLimiter::new(LimiterConfig {
            capacity: 1.0,
            refill_per_second: 0.0,
        });
        assert!(limiter.try_acquire("a"));
        assert!(!limiter.try_acquire("a"));
        assert!(limiter.try_acquire("b"));
    }

    #[test]
    fn tokens_refill_over_time() {
        let limiter = RateLimiter::new(LimiterConfig {
            capacity: 1.0,
            refill_per_second: 1000.0,
        });
        assert!(limiter.try_acquire("a"));
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(limiter.try_acquire("a"));
    }
}
