//! Retry policy for unpaid probes.
//!
//! Paid requests are never retried: resubmitting a payment could pay twice.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// The same delay before every retry.
    #[default]
    Fixed,
    /// The delay doubles after every retry.
    Exponential,
}

/// Bounded retry with fixed or exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Delay growth.
    pub strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            strategy: BackoffStrategy::Exponential,
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 0,
            strategy: BackoffStrategy::Fixed,
        }
    }

    /// Delay before retry number `retry` (1-based).
    #[must_use]
    pub fn delay_before(&self, retry: u32) -> Duration {
        let base = Duration::from_millis(self.base_delay_ms);
        match self.strategy {
            BackoffStrategy::Fixed => base,
            BackoffStrategy::Exponential => {
                let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
                base.saturating_mul(factor)
            }
        }
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts run out. Returns the last result.
    ///
    /// # Errors
    ///
    /// Returns the error of the final attempt.
    pub async fn retry<T, E, F, Fut>(&self, mut op: F, retryable: impl Fn(&E) -> bool) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Err(e) if attempt < self.max_attempts && retryable(&e) => {
                    tracing::debug!(attempt, "Retrying after transient failure");
                    tokio::time::sleep(self.delay_before(attempt)).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_exponential_doubles() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay_ms: 100,
            strategy: BackoffStrategy::Exponential,
        };
        let delays: Vec<_> = (1..=4).map(|n| policy.delay_before(n).as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 800]);
    }

    #[test]
    fn test_fixed_stays_flat() {
        let policy = RetryPolicy {
            strategy: BackoffStrategy::Fixed,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_before(1), policy.delay_before(3));
    }

    #[tokio::test]
    async fn test_stops_after_max_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
            strategy: BackoffStrategy::Fixed,
        };
        let result: Result<(), &str> = policy
            .retry(
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("down")
                },
                |_| true,
            )
            .await;
        assert_eq!(result, Err("down"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), &str> = RetryPolicy::default()
            .retry(
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("fatal")
                },
                |_| false,
            )
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recovers_on_second_attempt() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = RetryPolicy::none()
            .retry(
                move || async move { Err::<u32, _>(calls.fetch_add(1, Ordering::SeqCst)) },
                |_| true,
            )
            .await;
        assert_eq!(result, Err(0));

        let policy = RetryPolicy {
            base_delay_ms: 1,
            ..RetryPolicy::default()
        };
        let result = policy
            .retry(
                move || async move {
                    match calls.fetch_add(1, Ordering::SeqCst) {
                        1 => Err("blip"),
                        n => Ok(n),
                    }
                },
                |_| true,
            )
            .await;
        assert_eq!(result, Ok(2));
    }
}
