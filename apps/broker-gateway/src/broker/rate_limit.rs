//! Per-backend token-bucket rate limiting.
//!
//! Each backend owns one [`RateBucket`] with a capacity, a refill rate,
//! and atomic admit-or-wait semantics: an admission either consumes a
//! token immediately or reports how long the caller must wait before
//! asking again. Buckets are independent; one backend's burst never
//! delays another's.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

/// Capacity and refill rate for one backend's bucket.
#[derive(Debug, Clone, Copy)]
pub struct RateBucketConfig {
    /// Maximum burst size; hard ceiling on stored tokens.
    pub capacity: f64,
    /// Tokens restored per second.
    pub refill_per_sec: f64,
}

impl Default for RateBucketConfig {
    fn default() -> Self {
        Self {
            capacity: 10.0,
            refill_per_sec: 1.0,
        }
    }
}

/// Point-in-time view of one bucket for the status surface.
#[derive(Debug, Clone, Serialize)]
pub struct RateBucketStats {
    /// Bucket capacity.
    pub capacity: f64,
    /// Tokens currently available.
    pub available: f64,
    /// Refill rate in tokens per second.
    pub refill_per_sec: f64,
}

/// Token bucket state for one backend.
#[derive(Debug)]
struct RateBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl RateBucket {
    fn new(config: RateBucketConfig) -> Self {
        // Degenerate configs (zero capacity or refill) would deadlock
        // admission forever; clamp to a usable floor instead.
        let capacity = config.capacity.max(1.0);
        let refill_per_sec = config.refill_per_sec.max(0.001);
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec,
            last_refill: Instant::now(),
        }
    }

    /// Refill from elapsed time, capped at capacity.
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// Refill, then consume one token or report the deficit wait.
    fn admit(&mut self, now: Instant) -> Duration {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Duration::ZERO
        } else {
            Duration::from_secs_f64((1.0 - self.tokens) / self.refill_per_sec)
        }
    }
}

/// Rate limiter holding one token bucket per backend.
#[derive(Debug)]
pub struct RateLimiter {
    buckets: std::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<RateBucket>>>>,
    default_config: RateBucketConfig,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateBucketConfig::default())
    }
}

impl RateLimiter {
    /// Create a limiter; backends without an explicit budget get
    /// `default_config`.
    #[must_use]
    pub fn new(default_config: RateBucketConfig) -> Self {
        Self {
            buckets: std::sync::Mutex::new(HashMap::new()),
            default_config,
        }
    }

    /// Set (or replace) the budget for one backend.
    ///
    /// Replacing resets the bucket to full.
    pub fn configure(&self, backend: &str, config: RateBucketConfig) {
        let bucket = Arc::new(tokio::sync::Mutex::new(RateBucket::new(config)));
        match self.buckets.lock() {
            Ok(mut map) => {
                map.insert(backend.to_string(), bucket);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(backend.to_string(), bucket);
            }
        }
    }

    /// Try to admit one call for `backend`.
    ///
    /// Returns `Duration::ZERO` and consumes a token when the budget
    /// allows, otherwise returns the wait until a token will be available
    /// without consuming anything. Admission requests for one backend are
    /// served in arrival order.
    pub async fn admit(&self, backend: &str) -> Duration {
        let bucket = self.bucket_for(backend);
        let mut guard = bucket.lock().await;
        guard.admit(Instant::now())
    }

    /// Wait until a token is available and consume it.
    ///
    /// Loops admit-then-sleep; each sleep is bounded by the bucket's own
    /// deficit estimate.
    pub async fn acquire(&self, backend: &str) {
        loop {
            let wait = self.admit(backend).await;
            if wait.is_zero() {
                return;
            }
            tracing::debug!(
                backend,
                wait_ms = wait.as_millis() as u64,
                "rate budget exhausted, waiting for refill"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Per-backend bucket snapshots for the status surface.
    pub async fn stats(&self) -> BTreeMap<String, RateBucketStats> {
        let buckets: Vec<(String, Arc<tokio::sync::Mutex<RateBucket>>)> = match self.buckets.lock()
        {
            Ok(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            Err(poisoned) => poisoned
                .into_inner()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };

        let mut stats = BTreeMap::new();
        let now = Instant::now();
        for (name, bucket) in buckets {
            let mut guard = bucket.lock().await;
            guard.refill(now);
            stats.insert(
                name,
                RateBucketStats {
                    capacity: guard.capacity,
                    available: guard.tokens,
                    refill_per_sec: guard.refill_per_sec,
                },
            );
        }
        stats
    }

    fn bucket_for(&self, backend: &str) -> Arc<tokio::sync::Mutex<RateBucket>> {
        let mut map = match self.buckets.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.entry(backend.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(RateBucket::new(self.default_config))))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(capacity: f64, refill_per_sec: f64) -> RateLimiter {
        RateLimiter::new(RateBucketConfig {
            capacity,
            refill_per_sec,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn burst_up_to_capacity_then_wait() {
        let limiter = limiter(5.0, 1.0);

        for _ in 0..5 {
            assert_eq!(limiter.admit("demo").await, Duration::ZERO);
        }

        // Sixth immediate admit: ~1s wait, nothing consumed.
        let wait = limiter.admit("demo").await;
        assert_eq!(wait, Duration::from_secs(1));

        // Still nothing consumed: the same wait is quoted again.
        let wait = limiter.admit("demo").await;
        assert_eq!(wait, Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn tokens_refill_over_time() {
        let limiter = limiter(5.0, 1.0);

        for _ in 0..5 {
            limiter.admit("demo").await;
        }
        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(limiter.admit("demo").await, Duration::ZERO);
        assert_eq!(limiter.admit("demo").await, Duration::ZERO);
        assert!(limiter.admit("demo").await > Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn refill_capped_at_capacity() {
        let limiter = limiter(3.0, 10.0);

        for _ in 0..3 {
            limiter.admit("demo").await;
        }
        // A long idle period must not bank more than capacity.
        tokio::time::advance(Duration::from_secs(3600)).await;

        for _ in 0..3 {
            assert_eq!(limiter.admit("demo").await, Duration::ZERO);
        }
        assert!(limiter.admit("demo").await > Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn consumption_bounded_over_window() {
        // capacity + refill * W is the hard ceiling for any window W.
        let limiter = limiter(5.0, 2.0);
        let window = Duration::from_secs(10);
        let deadline = Instant::now() + window;

        let mut consumed = 0u32;
        loop {
            let wait = limiter.admit("demo").await;
            if wait.is_zero() {
                consumed += 1;
            } else {
                if Instant::now() + wait > deadline {
                    break;
                }
                tokio::time::advance(wait).await;
            }
        }

        assert!(
            f64::from(consumed) <= 5.0 + 2.0 * window.as_secs_f64(),
            "consumed {consumed} tokens, over the window bound"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn buckets_are_independent() {
        let limiter = limiter(1.0, 0.1);

        assert_eq!(limiter.admit("alpha").await, Duration::ZERO);
        assert!(limiter.admit("alpha").await > Duration::ZERO);

        // Draining alpha leaves beta untouched.
        assert_eq!(limiter.admit("beta").await, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_waits_for_refill() {
        let limiter = limiter(1.0, 1.0);
        limiter.admit("demo").await;

        let start = Instant::now();
        limiter.acquire("demo").await;
        let elapsed = start.elapsed();

        assert!(
            elapsed >= Duration::from_millis(990),
            "acquire returned after {elapsed:?}, expected ~1s"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn configure_sets_explicit_budget() {
        let limiter = limiter(100.0, 100.0);
        limiter.configure(
            "demo",
            RateBucketConfig {
                capacity: 1.0,
                refill_per_sec: 0.5,
            },
        );

        assert_eq!(limiter.admit("demo").await, Duration::ZERO);
        assert_eq!(limiter.admit("demo").await, Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn stats_reports_available_tokens() {
        let limiter = limiter(5.0, 1.0);
        limiter.admit("demo").await;
        limiter.admit("demo").await;

        let stats = limiter.stats().await;
        let demo = stats.get("demo").unwrap();
        assert!((demo.capacity - 5.0).abs() < f64::EPSILON);
        assert!((demo.available - 3.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn degenerate_config_is_clamped() {
        let limiter = limiter(0.0, 0.0);
        // Still admits one call and quotes a finite wait after.
        assert_eq!(limiter.admit("demo").await, Duration::ZERO);
        let wait = limiter.admit("demo").await;
        assert!(wait > Duration::ZERO);
        assert!(wait < Duration::from_secs(2000));
    }
}
