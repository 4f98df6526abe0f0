//! Retry delays for failed reconciles.
//!
//! The delay of an object grows exponentially with its consecutive failures, from 5ms up to 10s.
//! On top of that, a token bucket shared by all objects of a controller (10 per second, burst
//! of 100) keeps a burst of failures from hammering the API server. The larger of both delays
//! wins.

use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
    time::{Duration, Instant},
};

const BASE_DELAY: Duration = Duration::from_millis(5);
const MAX_DELAY: Duration = Duration::from_secs(10);
const BUCKET_RATE: f64 = 10.0;
const BUCKET_BURST: f64 = 100.0;

fn exponential_delay(failures: u32) -> Duration {
    BASE_DELAY
        .saturating_mul(2_u32.saturating_pow(failures))
        .min(MAX_DELAY)
}

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    refilled_at: Instant,
}

impl TokenBucket {
    fn new(now: Instant) -> Self {
        Self {
            tokens: BUCKET_BURST,
            refilled_at: now,
        }
    }

    /// Takes a token, returning how long the caller has to wait for it.
    fn reserve(&mut self, now: Instant) -> Duration {
        let elapsed = now.saturating_duration_since(self.refilled_at).as_secs_f64();
        self.tokens = (self.tokens + elapsed * BUCKET_RATE).min(BUCKET_BURST);
        self.refilled_at = now;

        self.tokens -= 1.0;
        if self.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-self.tokens / BUCKET_RATE)
        }
    }
}

#[derive(Debug)]
pub struct Backoff {
    failures: Mutex<HashMap<String, u32>>,
    bucket: Mutex<TokenBucket>,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

impl Backoff {
    pub fn new() -> Self {
        Self {
            failures: Mutex::default(),
            bucket: Mutex::new(TokenBucket::new(Instant::now())),
        }
    }

    /// Records a failure of `key` and returns the delay before it should be retried.
    pub fn next_delay(&self, key: &str) -> Duration {
        self.next_delay_at(key, Instant::now())
    }

    fn next_delay_at(&self, key: &str, now: Instant) -> Duration {
        let failures = {
            let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
            let count = failures.entry(key.to_owned()).or_default();
            let previous = *count;
            *count = count.saturating_add(1);
            previous
        };
        let bucket = self
            .bucket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reserve(now);

        exponential_delay(failures).max(bucket)
    }

    /// Forgets the failures of `key`, typically after it reconciled successfully.
    pub fn reset(&self, key: &str) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(0, Duration::from_millis(5))]
    #[case(1, Duration::from_millis(10))]
    #[case(10, Duration::from_millis(5120))]
    #[case(11, MAX_DELAY)]
    #[case(u32::MAX, MAX_DELAY)]
    fn exponential(#[case] failures: u32, #[case] expected: Duration) {
        assert_eq!(exponential_delay(failures), expected);
    }

    #[test]
    fn per_object_counters() {
        let backoff = Backoff::new();
        let now = Instant::now();

        assert_eq!(backoff.next_delay_at("a", now), Duration::from_millis(5));
        assert_eq!(backoff.next_delay_at("a", now), Duration::from_millis(10));
        assert_eq!(backoff.next_delay_at("b", now), Duration::from_millis(5));

        backoff.reset("a");
        assert_eq!(backoff.next_delay_at("a", now), Duration::from_millis(5));
    }

    #[test]
    fn bucket_limits_bursts() {
        let now = Instant::now();
        let mut bucket = TokenBucket::new(now);
        for _ in 0..100 {
            assert_eq!(bucket.reserve(now), Duration::ZERO);
        }
        assert_eq!(bucket.reserve(now), Duration::from_millis(100));
        assert_eq!(bucket.reserve(now), Duration::from_millis(200));

        // One second later ten tokens are back, which pays off the debt of two.
        let later = now + Duration::from_secs(1);
        for _ in 0..8 {
            assert_eq!(bucket.reserve(later), Duration::ZERO);
        }
        assert_eq!(bucket.reserve(later), Duration::from_millis(100));
    }
}
