//! Bounded exponential backoff for transient sandbox failures
//!
//! Only errors that classify themselves as retryable are retried;
//! deterministic learner-code outcomes are values, not errors, so they
//! can never reach this wrapper.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::EngineError;

/// Retry policy: bounded attempts, deterministic doubling, capped delay
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_millis(2_000),
        }
    }
}

impl BackoffPolicy {
    /// Delay before the given retry (0-based), doubling from the base and
    /// capped at the max.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Run `op`, retrying retryable failures under the policy. The last error
/// is surfaced once attempts are exhausted.
pub async fn with_backoff<T, F, Fut>(
    policy: BackoffPolicy,
    op_name: &str,
    mut op: F,
) -> Result<T, EngineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, EngineError>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut last_err = None;

    for attempt in 0..attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt + 1 < attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    op = op_name,
                    attempt = attempt + 1,
                    ?delay,
                    error = %err,
                    "Transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
                last_err = Some(err);
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_err.unwrap_or_else(|| EngineError::Internal("retry loop exhausted".into())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> BackoffPolicy {
        BackoffPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    #[tokio::test]
    async fn test_retries_transient_failures_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_backoff(fast_policy(), "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(EngineError::Provision("flaky".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_terminal_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_backoff(fast_policy(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(EngineError::UnsupportedLanguage("cobol".into())) }
        })
        .await;
        assert!(matches!(result, Err(EngineError::UnsupportedLanguage(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_attempts_surface_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_backoff(fast_policy(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(EngineError::Spawn("still down".into())) }
        })
        .await;
        assert!(matches!(result, Err(EngineError::Spawn(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = BackoffPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_millis(2_000),
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(200));
        assert_eq!(policy.delay_for(1), Duration::from_millis(400));
        assert_eq!(policy.delay_for(2), Duration::from_millis(800));
        assert_eq!(policy.delay_for(3), Duration::from_millis(1_600));
        assert_eq!(policy.delay_for(4), Duration::from_millis(2_000));
        assert_eq!(policy.delay_for(10), Duration::from_millis(2_000));
    }
}
