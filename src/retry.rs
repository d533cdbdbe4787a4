//! Bounded retry with exponential backoff.
//!
//! The receive call and the acknowledge/reject calls are all retried a fixed
//! number of times within one operation. This module provides the
//! [`RetryConfig`] type and the [`retry_with_backoff`] helper both paths share.
//!
//! # Retry Strategy
//!
//! - Only retries errors for which [`ReceiverError::is_transient`] is `true`
//! - `max_attempts` counts every call, including the first one
//! - Uses exponential backoff with randomized jitter between attempts
//! - A zero `initial_delay` retries immediately (used by tests)
//!
//! [`ReceiverError::is_transient`]: crate::ReceiverError::is_transient

use serde::{Deserialize, Serialize};
use std::collections::hash_map::RandomState;
use std::future::Future;
use std::hash::BuildHasher;
use std::time::Duration;
use tokio::time::sleep;

/// Retry configuration with exponential backoff.
///
/// # Example
///
/// ```
/// use mom_receiver::RetryConfig;
/// use std::time::Duration;
///
/// let retry = RetryConfig {
///     max_attempts: 5,
///     multiplier: 2.0,
///     initial_delay: Duration::from_millis(50),
///     max_delay: Duration::from_secs(2),
/// };
/// assert_eq!(retry.max_attempts, 5);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total number of attempts, including the first call. Must be at least 1.
    pub max_attempts: u32,

    /// Backoff multiplier applied to the delay after each failed attempt.
    pub multiplier: f32,

    /// Delay before the second attempt.
    pub initial_delay: Duration,

    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    /// Three attempts, 100ms initial delay doubling up to 2s.
    fn default() -> Self {
        // ---
        Self {
            max_attempts: 3,
            multiplier: 2.0,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryConfig {
    /// `attempts` tries with no delay in between.
    pub fn immediate(attempts: u32) -> Self {
        // ---
        Self {
            max_attempts: attempts,
            multiplier: 1.0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }
}

/// Run `operation` until it succeeds, fails permanently, or the attempt
/// budget is spent.
///
/// Returns the first success, the first non-transient error, or the error of
/// the last attempt.
pub(crate) async fn retry_with_backoff<F, Fut, T>(
    retry_config: &RetryConfig,
    mut operation: F,
) -> crate::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = crate::Result<T>>,
{
    let max_attempts = retry_config.max_attempts.max(1);
    let mut attempt = 0;
    let mut current_delay = retry_config.initial_delay;

    loop {
        attempt += 1;

        let err = match operation().await {
            Ok(result) => return Ok(result),
            Err(err) => err,
        };

        if !err.is_transient() {
            return Err(err);
        }

        if attempt >= max_attempts {
            crate::log_debug!("retry exhausted after {attempt} attempts, last error: {err}");
            return Err(err);
        }

        if !current_delay.is_zero() {
            let jittered_delay = apply_jitter(current_delay);

            crate::log_debug!(
                "attempt {attempt}/{max_attempts} failed, waiting {jittered_delay:?} (error: {err})"
            );

            sleep(jittered_delay).await;

            let next_delay = Duration::from_secs_f64(
                current_delay.as_secs_f64() * retry_config.multiplier as f64,
            );
            current_delay = next_delay.min(retry_config.max_delay);
        }
    }
}

/// Apply ±25% jitter so receivers sharing a backend do not retry in lockstep.
fn apply_jitter(delay: Duration) -> Duration {
    // ---
    let random_state = RandomState::new();
    let hash = random_state.hash_one(std::time::SystemTime::now());

    let random_factor = (hash % 1000) as f64 / 1000.0;
    let jitter_multiplier = 0.75 + (random_factor * 0.5);

    Duration::from_secs_f64(delay.as_secs_f64() * jitter_multiplier)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::ReceiverError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn success_on_first_attempt_calls_once() {
        // ---
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retry_with_backoff(&RetryConfig::immediate(3), || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ReceiverError>(7)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_failures_below_budget_recover() {
        // ---
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retry_with_backoff(&RetryConfig::immediate(3), || {
            let counter = counter.clone();
            async move {
                let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if attempt < 3 {
                    Err(ReceiverError::Backend("flaky".into()))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_stops_at_max_attempts() {
        // ---
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retry_with_backoff(&RetryConfig::immediate(3), || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ReceiverError::Backend("down".into()))
            }
        })
        .await;

        assert!(matches!(result, Err(ReceiverError::Backend(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_error_is_not_retried() {
        // ---
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retry_with_backoff(&RetryConfig::immediate(5), || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ReceiverError::UnknownToken("t-9".into()))
            }
        })
        .await;

        assert!(matches!(result, Err(ReceiverError::UnknownToken(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_attempts_still_calls_once() {
        // ---
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let _ = retry_with_backoff(&RetryConfig::immediate(0), || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ReceiverError::Backend("down".into()))
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_delays_are_capped() {
        // ---
        let retry_config = RetryConfig {
            max_attempts: 6,
            multiplier: 10.0,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
        };
        let start = tokio::time::Instant::now();

        let _ = retry_with_backoff(&retry_config, || async {
            Err::<(), _>(ReceiverError::Backend("down".into()))
        })
        .await;

        // Five sleeps, each at most 50ms * 1.25.
        assert!(start.elapsed() <= Duration::from_millis(315));
    }

    #[test]
    fn jitter_stays_in_range() {
        // ---
        let delay = Duration::from_millis(100);

        for _ in 0..100 {
            let jittered = apply_jitter(delay);
            assert!(jittered >= Duration::from_millis(75), "too low: {jittered:?}");
            assert!(jittered <= Duration::from_millis(125), "too high: {jittered:?}");
        }
    }
}
