//! Call executor: admission, classification, bounded retries.
//!
//! Wraps one backend call in the per-call state machine
//! `Admitted → Calling → {Success | Classify→Retry→Calling | Classify→Fail}`.
//! Every attempt first acquires the backend's rate bucket; limiter waits
//! are budget pacing and do not count toward `max_attempts`. Only
//! `Transient` and `RateLimited` failures retry under the policy;
//! `AuthExpired` triggers at most one silent re-authentication followed by
//! a single retry, and `Fatal` returns immediately. Exhausting the attempt
//! budget returns the last classified error.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::error::{CallError, ErrorClass};
use super::rate_limit::RateLimiter;
use super::retry::RetryPolicy;

/// Executes backend calls under a rate budget and retry policy.
#[derive(Debug, Clone)]
pub struct CallExecutor {
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
}

impl CallExecutor {
    /// Create an executor sharing `limiter` across backends.
    #[must_use]
    pub const fn new(limiter: Arc<RateLimiter>, policy: RetryPolicy) -> Self {
        Self { limiter, policy }
    }

    /// The retry policy in force.
    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `call` without a re-authentication path.
    ///
    /// `AuthExpired` failures return immediately, as if the one-shot
    /// re-auth had been declined.
    pub async fn run<T, F, Fut>(
        &self,
        backend: &str,
        operation: &str,
        call: F,
    ) -> Result<T, CallError>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, CallError>> + Send,
        T: Send,
    {
        self.run_with_reauth(backend, operation, call, || std::future::ready(false))
            .await
    }

    /// Run `call` with a one-shot re-authentication hook.
    ///
    /// On the first `AuthExpired` classification, `reauth` is invoked; if
    /// it reports success the call is retried exactly once. A second
    /// `AuthExpired` (or a failed re-auth) returns the error.
    pub async fn run_with_reauth<T, F, Fut, R, RFut>(
        &self,
        backend: &str,
        operation: &str,
        call: F,
        reauth: R,
    ) -> Result<T, CallError>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, CallError>> + Send,
        R: Fn() -> RFut + Send + Sync,
        RFut: Future<Output = bool> + Send,
        T: Send,
    {
        let mut attempt: u32 = 1;
        let mut reauthed = false;

        loop {
            self.limiter.acquire(backend).await;

            let err = match call().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(backend, operation, attempt, "call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            let class = err.class();

            if class == ErrorClass::AuthExpired {
                if reauthed {
                    return Err(err);
                }
                reauthed = true;
                tracing::warn!(
                    backend,
                    operation,
                    error = %err,
                    "session rejected, attempting silent re-authentication"
                );
                if reauth().await {
                    continue;
                }
                return Err(err);
            }

            if !self.policy.is_retryable(class) {
                tracing::warn!(backend, operation, error = %err, "permanent failure, not retrying");
                return Err(err);
            }

            if attempt >= self.policy.max_attempts {
                tracing::warn!(
                    backend,
                    operation,
                    attempts = attempt,
                    error = %err,
                    "retries exhausted"
                );
                return Err(err);
            }

            let delay = retry_delay(&err, &self.policy, attempt);
            tracing::warn!(
                backend,
                operation,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retryable failure, backing off"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Backoff for failed attempt `attempt`, preferring a backend-supplied
/// Retry-After over the exponential schedule.
fn retry_delay(err: &CallError, policy: &RetryPolicy, attempt: u32) -> Duration {
    if let CallError::RateLimited {
        retry_after_secs: Some(secs),
    } = err
    {
        return Duration::from_secs(*secs);
    }
    policy.backoff_for_attempt(attempt)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicU32, Ordering};

    use tokio::time::Instant;

    use crate::broker::rate_limit::RateBucketConfig;

    fn executor(max_attempts: u32) -> CallExecutor {
        let policy = RetryPolicy::new(
            max_attempts,
            Duration::from_millis(100),
            Duration::from_secs(10),
            0.0,
        );
        CallExecutor::new(Arc::new(RateLimiter::default()), policy)
    }

    #[tokio::test(start_paused = true)]
    async fn success_on_first_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = executor(3)
            .run("demo", "quote", move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, CallError>(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_retries_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let start = Instant::now();
        let result = executor(3)
            .run("demo", "quote", move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(CallError::Network("connection reset".to_string()))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_returns_last_classified_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let start = Instant::now();
        let result: Result<(), CallError> = executor(3)
            .run("demo", "quote", move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(CallError::Status {
                        status: 503,
                        message: "unavailable".to_string(),
                    })
                }
            })
            .await;

        // Exactly max_attempts calls, last error surfaced as-is.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(
            result,
            Err(CallError::Status { status: 503, .. })
        ));
        // Backoff schedule: 100ms + 200ms between the three attempts.
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_failure_does_not_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), CallError> = executor(5)
            .run("demo", "buy_market", move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(CallError::Rejected("insufficient buying power".to_string()))
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(CallError::Rejected(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn auth_expired_triggers_single_reauth() {
        let calls = Arc::new(AtomicU32::new(0));
        let reauths = Arc::new(AtomicU32::new(0));
        let call_counter = calls.clone();
        let reauth_counter = reauths.clone();

        let result = executor(3)
            .run_with_reauth(
                "demo",
                "positions",
                move || {
                    let counter = call_counter.clone();
                    async move {
                        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                            Err(CallError::AuthExpired("token revoked".to_string()))
                        } else {
                            Ok("positions")
                        }
                    }
                },
                move || {
                    let counter = reauth_counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        true
                    }
                },
            )
            .await;

        assert_eq!(result.unwrap(), "positions");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(reauths.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn auth_expired_twice_returns_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let reauths = Arc::new(AtomicU32::new(0));
        let call_counter = calls.clone();
        let reauth_counter = reauths.clone();

        let result: Result<(), CallError> = executor(3)
            .run_with_reauth(
                "demo",
                "positions",
                move || {
                    let counter = call_counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err(CallError::AuthExpired("still revoked".to_string()))
                    }
                },
                move || {
                    let counter = reauth_counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        true
                    }
                },
            )
            .await;

        assert!(matches!(result, Err(CallError::AuthExpired(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(reauths.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_reauth_returns_original_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), CallError> = executor(3)
            .run_with_reauth(
                "demo",
                "quote",
                move || {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err(CallError::AuthExpired("token revoked".to_string()))
                    }
                },
                || std::future::ready(false),
            )
            .await;

        assert!(matches!(result, Err(CallError::AuthExpired(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_header_overrides_backoff() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let start = Instant::now();
        let result = executor(2)
            .run("demo", "quote", move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(CallError::RateLimited {
                            retry_after_secs: Some(5),
                        })
                    } else {
                        Ok(1)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 1);
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn limiter_wait_does_not_consume_attempts() {
        let limiter = Arc::new(RateLimiter::new(RateBucketConfig {
            capacity: 1.0,
            refill_per_sec: 1.0,
        }));
        // Drain the bucket so the first attempt must wait for a refill.
        limiter.admit("demo").await;

        let policy =
            RetryPolicy::new(1, Duration::from_millis(100), Duration::from_secs(1), 0.0);
        let executor = CallExecutor::new(limiter, policy);

        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let start = Instant::now();
        let result = executor
            .run("demo", "quote", move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, CallError>(())
                }
            })
            .await;

        // One attempt allowed, and it still succeeds after the ~1s
        // admission wait: the wait was not charged against max_attempts.
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() >= Duration::from_millis(990));
    }
}
