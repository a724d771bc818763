//! Fixed-window rate limiter for the login and refresh endpoints.
//!
//! Keys are `"{scope}:{client_ip}"`. State is process-local.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};

use crate::clock::Clock;

pub const DEFAULT_REQUESTS: u32 = 10;
pub const DEFAULT_WINDOW: Duration = Duration::seconds(60);

#[derive(Debug, Clone, Copy)]
struct Bucket {
    window_start: DateTime<Utc>,
    count: u32,
    last_seen_at: DateTime<Utc>,
}

/// Per-key fixed-window counter.
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    clock: Arc<dyn Clock>,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    /// Zero `limit` or a non-positive `window` fall back to the defaults.
    pub fn new(limit: u32, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            limit: if limit == 0 { DEFAULT_REQUESTS } else { limit },
            window: if window <= Duration::zero() {
                DEFAULT_WINDOW
            } else {
                window
            },
            clock,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Count a request against `key`.
    ///
    /// Returns `Err(wait)` once the window's count has reached the limit,
    /// where `wait` is the time left until the window resets.
    pub fn allow(&self, key: &str) -> Result<(), std::time::Duration> {
        let now = self.clock.now();
        let mut buckets = self.lock();
        self.sweep_locked(&mut buckets, now);

        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            window_start: now,
            count: 0,
            last_seen_at: now,
        });
        if now - bucket.window_start >= self.window {
            *bucket = Bucket {
                window_start: now,
                count: 0,
                last_seen_at: now,
            };
        }

        bucket.last_seen_at = now;
        if bucket.count >= self.limit {
            let remaining = self.window - (now - bucket.window_start);
            return Err(remaining.to_std().unwrap_or_default());
        }
        bucket.count += 1;
        Ok(())
    }

    /// Evict buckets idle for at least two windows.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut buckets = self.lock();
        self.sweep_locked(&mut buckets, now)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn sweep_locked(&self, buckets: &mut HashMap<String, Bucket>, now: DateTime<Utc>) -> usize {
        let stale_after = self.window * 2;
        let before = buckets.len();
        buckets.retain(|_, bucket| now - bucket.last_seen_at < stale_after);
        before - buckets.len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Bucket>> {
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn limiter(limit: u32) -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        (RateLimiter::new(limit, Duration::seconds(60), clock.clone()), clock)
    }

    #[test]
    fn test_third_request_denied_with_retry_after() {
        let (limiter, clock) = limiter(2);
        assert!(limiter.allow("login:1.2.3.4").is_ok());
        clock.advance(Duration::seconds(15));
        assert!(limiter.allow("login:1.2.3.4").is_ok());
        let wait = limiter.allow("login:1.2.3.4").unwrap_err();
        assert_eq!(wait, std::time::Duration::from_secs(45));
    }

    #[test]
    fn test_keys_are_independent() {
        let (limiter, _clock) = limiter(2);
        limiter.allow("login:a").unwrap();
        limiter.allow("login:a").unwrap();
        assert!(limiter.allow("login:a").is_err());
        assert!(limiter.allow("login:b").is_ok());
        assert!(limiter.allow("refresh:a").is_ok());
    }

    #[test]
    fn test_window_resets() {
        let (limiter, clock) = limiter(2);
        limiter.allow("k").unwrap();
        limiter.allow("k").unwrap();
        assert!(limiter.allow("k").is_err());
        clock.advance(Duration::seconds(60));
        assert!(limiter.allow("k").is_ok());
    }

    #[test]
    fn test_denied_requests_do_not_extend_window() {
        let (limiter, clock) = limiter(1);
        limiter.allow("k").unwrap();
        clock.advance(Duration::seconds(30));
        assert!(limiter.allow("k").is_err());
        clock.advance(Duration::seconds(30));
        assert!(limiter.allow("k").is_ok());
    }

    #[test]
    fn test_sweep_evicts_idle_buckets() {
        let (limiter, clock) = limiter(5);
        limiter.allow("a").unwrap();
        clock.advance(Duration::seconds(90));
        limiter.allow("b").unwrap();
        assert_eq!(limiter.len(), 2);
        clock.advance(Duration::seconds(30));
        assert_eq!(limiter.sweep(), 1);
        assert_eq!(limiter.len(), 1);
    }

    #[test]
    fn test_zero_config_uses_defaults() {
        let clock = Arc::new(ManualClock::default());
        let limiter = RateLimiter::new(0, Duration::zero(), clock);
        for _ in 0..DEFAULT_REQUESTS {
            limiter.allow("k").unwrap();
        }
        assert!(limiter.allow("k").is_err());
    }
}
