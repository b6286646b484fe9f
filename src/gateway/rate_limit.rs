//! Per-principal token-bucket rate limiting (§4.8 pipeline step 4).
//!
//! No teacher precedent generalizes cleanly here — `opencrabs` has no
//! public multi-tenant surface to throttle — so this is authored fresh,
//! in the style the rest of this module uses elsewhere: a
//! `parking_lot::Mutex`-guarded map, lazily populated per key, exactly
//! like [`crate::registry::Registry`]'s health cells.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// One bucket per principal subject, refilled continuously at
/// `capacity` tokens per minute. A request costs one token; `allow`
/// returns `false` (without consuming a token) once the bucket is dry.
pub struct RateLimiter {
    capacity: f64,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new(per_minute: u32) -> Self {
        Self {
            capacity: per_minute.max(1) as f64,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Admits one request for `key`, refilling first. Returns `Some(wait)`
    /// with the time until a token is available if the request is
    /// rejected, or `None` if it's admitted.
    pub fn check(&self, key: &str) -> Option<Duration> {
        let refill_per_sec = self.capacity / 60.0;
        let mut buckets = self.buckets.lock();
        let now = Instant::now();
        let bucket = buckets.entry(key.to_string()).or_insert_with(|| Bucket { tokens: self.capacity, last_refill: now });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * refill_per_sec).min(self.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            None
        } else {
            let deficit = 1.0 - bucket.tokens;
            Some(Duration::from_secs_f64((deficit / refill_per_sec).max(0.0)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_capacity_then_rejects() {
        let limiter = RateLimiter::new(60);
        for _ in 0..60 {
            assert!(limiter.check("p1").is_none());
        }
        assert!(limiter.check("p1").is_some());
    }

    #[test]
    fn buckets_are_independent_per_key() {
        let limiter = RateLimiter::new(1);
        assert!(limiter.check("a").is_none());
        assert!(limiter.check("b").is_none());
    }

    #[test]
    fn exhausted_bucket_reports_a_positive_wait() {
        let limiter = RateLimiter::new(60);
        assert!(limiter.check("p1").is_none());
        let wait = limiter.check("p1");
        assert!(wait.is_some());
        assert!(wait.unwrap() > Duration::ZERO);
    }
}
