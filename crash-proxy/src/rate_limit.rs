// Token bucket admission control keyed by route name.
//
// Buckets live in a bounded cache and are dropped after sitting idle for the
// configured TTL, so the number of tracked keys cannot grow without limit.
use crate::config::RateLimitConfig;
use moka::sync::Cache;
use std::time::{Duration, Instant};

const MAX_KEYS: u64 = 10_000;

#[derive(Clone, Copy, Debug)]
struct Bucket {
    tokens: f64,
    refilled_at: Instant,
}

#[derive(Clone)]
pub struct RateLimiter {
    buckets: Cache<String, Bucket>,
    capacity: f64,
    refill_per_sec: f64,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let buckets = Cache::builder()
            .max_capacity(MAX_KEYS)
            .time_to_idle(Duration::from_secs(config.key_ttl_secs))
            .build();

        let capacity = f64::from(config.requests_per_minute);

        RateLimiter {
            buckets,
            capacity,
            refill_per_sec: capacity / 60.0,
        }
    }

    /// Takes one token from `key`'s bucket. Returns false when it is empty.
    pub fn admit(&self, key: &str) -> bool {
        self.admit_at(key, Instant::now())
    }

    fn admit_at(&self, key: &str, now: Instant) -> bool {
        let mut admitted = false;

        // The upsert runs under the entry's lock, other keys are not blocked
        self.buckets.entry_by_ref(key).and_upsert_with(|existing| {
            let mut bucket = match existing {
                Some(entry) => entry.into_value(),
                None => Bucket {
                    tokens: self.capacity,
                    refilled_at: now,
                },
            };

            let elapsed = now.saturating_duration_since(bucket.refilled_at);
            bucket.tokens =
                (bucket.tokens + elapsed.as_secs_f64() * self.refill_per_sec).min(self.capacity);
            bucket.refilled_at = bucket.refilled_at.max(now);

            if bucket.tokens >= 1.0 {
                bucket.tokens -= 1.0;
                admitted = true;
            }
            bucket
        });

        admitted
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> u64 {
        self.buckets.run_pending_tasks();
        self.buckets.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(requests_per_minute: u32) -> RateLimiter {
        RateLimiter::new(&RateLimitConfig {
            requests_per_minute,
            key_ttl_secs: 3600,
        })
    }

    #[test]
    fn test_allowance_exhausted() {
        let limiter = limiter(5);
        let now = Instant::now();

        for _ in 0..5 {
            assert!(limiter.admit_at("new", now));
        }
        assert!(!limiter.admit_at("new", now));
        assert!(!limiter.admit_at("new", now));
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = limiter(2);
        let now = Instant::now();

        assert!(limiter.admit_at("new", now));
        assert!(limiter.admit_at("new", now));
        assert!(!limiter.admit_at("new", now));

        assert!(limiter.admit_at("legacy", now));
        assert!(limiter.admit_at("legacy", now));
        assert!(!limiter.admit_at("legacy", now));

        assert_eq!(limiter.tracked_keys(), 2);
    }

    #[test]
    fn test_refill_over_time() {
        // One token per second
        let limiter = limiter(60);
        let start = Instant::now();

        for _ in 0..60 {
            assert!(limiter.admit_at("new", start));
        }
        assert!(!limiter.admit_at("new", start));

        let later = start + Duration::from_millis(1500);
        assert!(limiter.admit_at("new", later));
        assert!(!limiter.admit_at("new", later));

        // Never refills beyond the per-minute allowance
        let much_later = start + Duration::from_secs(3600);
        for _ in 0..60 {
            assert!(limiter.admit_at("new", much_later));
        }
        assert!(!limiter.admit_at("new", much_later));
    }

    #[test]
    fn test_admit_uses_wall_clock() {
        let limiter = limiter(1);
        assert!(limiter.admit("healthcheck"));
        assert!(!limiter.admit("healthcheck"));
    }
}
