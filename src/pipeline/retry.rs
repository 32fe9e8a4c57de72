//! Retry with exponential backoff and a per-attempt timeout.
//!
//! Transient model errors (timeouts, rate limits, 5xx) are retried up to
//! `max_retries` times, waiting `base_backoff_ms * 2^(attempt-1)` before
//! each retry: with 500 ms base and 3 retries the waits are 500 ms → 1 s →
//! 2 s. Permanent errors return immediately.

use crate::config::RunConfig;
use crate::error::ModelError;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

/// A value plus the number of attempts it took.
#[derive(Debug, Clone, PartialEq)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_backoff_ms: config.retry_backoff_ms,
            attempt_timeout: Duration::from_secs(config.api_timeout_secs),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Wait before attempt `attempt` (1-based); zero for the first.
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = 2u64.saturating_pow(attempt - 2);
        Duration::from_millis(self.base_backoff_ms.saturating_mul(factor))
    }
}

/// Run `op` until it succeeds, fails permanently or runs out of attempts.
///
/// `op` receives the 1-based attempt number. `label` only feeds the logs.
pub async fn call_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<Attempted<T>, Attempted<ModelError>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ModelError>>,
{
    let max_attempts = policy.max_attempts();
    let mut attempt = 1;

    loop {
        let wait = policy.backoff(attempt);
        if !wait.is_zero() {
            warn!(
                "{}: retry {}/{} after {}ms",
                label,
                attempt - 1,
                policy.max_retries,
                wait.as_millis()
            );
            sleep(wait).await;
        }

        let result = match timeout(policy.attempt_timeout, op(attempt)).await {
            Ok(r) => r,
            Err(_) => Err(ModelError::Timeout {
                detail: format!("no answer within {}s", policy.attempt_timeout.as_secs()),
            }),
        };

        match result {
            Ok(value) => {
                debug!("{}: succeeded on attempt {}", label, attempt);
                return Ok(Attempted {
                    value,
                    attempts: attempt,
                });
            }
            Err(e) if e.is_transient() && attempt < max_attempts => {
                warn!("{}: attempt {} failed: {}", label, attempt, e);
                attempt += 1;
            }
            Err(e) => {
                warn!("{}: giving up after {} attempt(s): {}", label, attempt, e);
                return Err(Attempted {
                    value: e,
                    attempts: attempt,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_backoff_ms: 1,
            attempt_timeout: Duration::from_millis(200),
        }
    }

    fn server() -> ModelError {
        ModelError::Server {
            detail: "503".into(),
        }
    }

    #[test]
    fn backoff_doubles() {
        let p = RetryPolicy {
            max_retries: 3,
            base_backoff_ms: 500,
            attempt_timeout: Duration::from_secs(60),
        };
        assert_eq!(p.backoff(1), Duration::ZERO);
        assert_eq!(p.backoff(2), Duration::from_millis(500));
        assert_eq!(p.backoff(3), Duration::from_millis(1000));
        assert_eq!(p.backoff(4), Duration::from_millis(2000));
    }

    #[tokio::test]
    async fn transient_then_success() {
        let calls = AtomicU32::new(0);
        let out = call_with_retry(&policy(3), "t", |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(server())
                } else {
                    Ok("ok")
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(out, Attempted { value: "ok", attempts: 3 });
    }

    #[tokio::test]
    async fn always_transient_uses_every_attempt() {
        let calls = AtomicU32::new(0);
        let err = call_with_retry::<(), _, _>(&policy(3), "t", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(server()) }
        })
        .await
        .unwrap_err();
        assert_eq!(err.attempts, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn permanent_is_not_retried() {
        let calls = AtomicU32::new(0);
        let err = call_with_retry::<(), _, _>(&policy(3), "t", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ModelError::schema("not json")) }
        })
        .await
        .unwrap_err();
        assert_eq!(err.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_attempt_times_out_as_transient() {
        let p = RetryPolicy {
            max_retries: 1,
            base_backoff_ms: 1,
            attempt_timeout: Duration::from_millis(10),
        };
        let err = call_with_retry::<(), _, _>(&p, "t", |_| async {
            sleep(Duration::from_millis(200)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err.value, ModelError::Timeout { .. }));
        assert_eq!(err.attempts, 2);
    }
}
