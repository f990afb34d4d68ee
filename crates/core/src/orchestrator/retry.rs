//! Bounded exponential backoff for provider calls.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::catalog::CatalogError;
use crate::config::RetryConfig;
use crate::matcher::MatchError;

/// Errors that can say whether another attempt may help.
pub trait Retryable: std::fmt::Display {
    fn is_transient(&self) -> bool;

    /// Server-requested delay before the next attempt.
    fn retry_after(&self) -> Option<Duration>;
}

impl Retryable for CatalogError {
    fn is_transient(&self) -> bool {
        CatalogError::is_transient(self)
    }

    fn retry_after(&self) -> Option<Duration> {
        CatalogError::retry_after(self)
    }
}

impl Retryable for MatchError {
    fn is_transient(&self) -> bool {
        MatchError::is_transient(self)
    }

    fn retry_after(&self) -> Option<Duration> {
        MatchError::retry_after(self)
    }
}

/// Delay before retry number `attempt` (1-based), doubling from the initial
/// backoff and capped at the maximum.
pub fn backoff_delay(policy: &RetryConfig, attempt: u32) -> Duration {
    let factor = 1u64 << attempt.saturating_sub(1).min(20);
    let ms = policy
        .initial_backoff_ms
        .saturating_mul(factor)
        .min(policy.max_backoff_ms);
    Duration::from_millis(ms)
}

/// Run `op` until it succeeds, fails with a non-transient error, or
/// `max_attempts` is reached. A provider `Retry-After` replaces the computed
/// delay.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryConfig,
    what: &str,
    mut op: F,
) -> Result<T, E>
where
    E: Retryable,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                let delay = e
                    .retry_after()
                    .unwrap_or_else(|| backoff_delay(policy, attempt));
                warn!(
                    "{} failed (attempt {}/{}): {}; retrying in {:?}",
                    what, attempt, policy.max_attempts, e, delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_backoff_ms: 1,
            max_backoff_ms: 4,
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryConfig {
            max_attempts: 10,
            initial_backoff_ms: 500,
            max_backoff_ms: 3000,
        };
        assert_eq!(backoff_delay(&policy, 1), Duration::from_millis(500));
        assert_eq!(backoff_delay(&policy, 2), Duration::from_millis(1000));
        assert_eq!(backoff_delay(&policy, 3), Duration::from_millis(2000));
        assert_eq!(backoff_delay(&policy, 4), Duration::from_millis(3000));
        assert_eq!(backoff_delay(&policy, 60), Duration::from_millis(3000));
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = retry_with_backoff(&policy(4), "search", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(CatalogError::Server {
                    status: 503,
                    message: "busy".into(),
                })
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = retry_with_backoff(&policy(3), "search", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CatalogError::RateLimited {
                retry_after: Some(Duration::from_millis(1)),
            })
        })
        .await;
        assert!(matches!(result, Err(CatalogError::RateLimited { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = retry_with_backoff(&policy(5), "fetch", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CatalogError::Unauthorized("expired".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
