use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::SchedulerConfig;
use crate::error::{BackendError, ErrorClass};

/// Per-file retry rules, keyed on [`ErrorClass`].
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub transient_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&SchedulerConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            transient_delay: Duration::from_millis(config.transient_delay_ms),
        }
    }

    /// No waiting between attempts. Used by tests and dry runs.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            transient_delay: Duration::ZERO,
        }
    }

    /// Delay before the next attempt, or `None` when `error` ends the file.
    ///
    /// `attempt` is the 1-based number of the attempt that just failed.
    /// `seen_retryable` is whether an earlier attempt failed with a rate-limit
    /// or transient error; only then is an unclassified error worth retrying.
    pub fn delay_for(&self, error: &BackendError, attempt: u32, seen_retryable: bool) -> Option<Duration> {
        if attempt > self.max_retries {
            return None;
        }
        match error.class() {
            ErrorClass::Permanent => None,
            ErrorClass::RateLimit => {
                let backoff = self.backoff(attempt);
                let delay = match error.retry_after() {
                    Some(hint) => backoff.max(hint),
                    None => backoff,
                };
                Some(delay.min(self.max_delay))
            }
            ErrorClass::Transient => Some(self.transient_delay),
            ErrorClass::Unknown if seen_retryable => Some(self.transient_delay),
            ErrorClass::Unknown => None,
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Drive `op` until it succeeds or the policy gives up.
/// Returns the final result and the number of attempts made.
pub async fn run_with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> (Result<T, BackendError>, u32)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
{
    let mut attempt = 0;
    let mut seen_retryable = false;

    loop {
        attempt += 1;
        let error = match op().await {
            Ok(value) => return (Ok(value), attempt),
            Err(error) => error,
        };

        match policy.delay_for(&error, attempt, seen_retryable) {
            Some(delay) => {
                warn!(
                    "{}: attempt {} failed ({}), retrying in {:?}",
                    label, attempt, error, delay
                );
                if matches!(error.class(), ErrorClass::RateLimit | ErrorClass::Transient) {
                    seen_retryable = true;
                }
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
            None => {
                debug!("{}: giving up after {} attempt(s): {}", label, attempt, error);
                return (Err(error), attempt);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            transient_delay: Duration::from_millis(50),
        }
    }

    #[test]
    fn test_permanent_errors_never_retry() {
        let policy = policy();
        for error in [
            BackendError::Auth("401".into()),
            BackendError::Quota("402".into()),
            BackendError::PayloadTooLarge("413".into()),
            BackendError::TokenLimit("too long".into()),
        ] {
            assert_eq!(policy.delay_for(&error, 1, false), None);
            assert_eq!(policy.delay_for(&error, 1, true), None);
        }
    }

    #[test]
    fn test_rate_limit_backoff_doubles_and_caps() {
        let policy = policy();
        let error = BackendError::rate_limited("429");
        assert_eq!(policy.delay_for(&error, 1, false), Some(Duration::from_millis(100)));
        assert_eq!(policy.delay_for(&error, 2, false), Some(Duration::from_millis(200)));
        assert_eq!(policy.delay_for(&error, 3, false), Some(Duration::from_millis(400)));
        assert_eq!(policy.delay_for(&error, 4, false), None);

        let long = RetryPolicy {
            max_retries: 10,
            ..policy
        };
        assert_eq!(long.delay_for(&error, 8, false), Some(Duration::from_millis(500)));
    }

    #[test]
    fn test_retry_after_raises_delay_within_cap() {
        let policy = policy();
        let hinted = BackendError::RateLimited {
            message: "429".into(),
            retry_after: Some(Duration::from_millis(300)),
        };
        assert_eq!(policy.delay_for(&hinted, 1, false), Some(Duration::from_millis(300)));

        let huge = BackendError::RateLimited {
            message: "429".into(),
            retry_after: Some(Duration::from_secs(60)),
        };
        assert_eq!(policy.delay_for(&huge, 1, false), Some(Duration::from_millis(500)));
    }

    #[test]
    fn test_transient_uses_fixed_delay() {
        let policy = policy();
        let error = BackendError::Network("reset".into());
        assert_eq!(policy.delay_for(&error, 1, false), Some(Duration::from_millis(50)));
        assert_eq!(policy.delay_for(&error, 3, false), Some(Duration::from_millis(50)));
        assert_eq!(policy.delay_for(&error, 4, false), None);
    }

    #[test]
    fn test_unknown_only_retried_after_retryable() {
        let policy = policy();
        let error = BackendError::Other("weird".into());
        assert_eq!(policy.delay_for(&error, 1, false), None);
        assert_eq!(policy.delay_for(&error, 2, true), Some(Duration::from_millis(50)));
    }

    #[tokio::test]
    async fn test_run_with_retry_succeeds_after_transient() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let (result, attempts) = run_with_retry(&RetryPolicy::immediate(3), "a.rs", || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(BackendError::Timeout(Duration::from_secs(1)))
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_run_with_retry_exhausts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let (result, attempts) = run_with_retry(&RetryPolicy::immediate(2), "a.rs", || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(BackendError::rate_limited("429"))
            }
        })
        .await;

        assert!(matches!(result, Err(BackendError::RateLimited { .. })));
        assert_eq!(attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_unknown_after_network_is_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let (result, attempts) = run_with_retry(&RetryPolicy::immediate(3), "a.rs", || {
            let counter = Arc::clone(&counter);
            async move {
                match counter.fetch_add(1, Ordering::SeqCst) {
                    0 => Err(BackendError::Network("reset".into())),
                    1 => Err(BackendError::Other("garbled".into())),
                    _ => Ok(7),
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts, 3);
    }
}
