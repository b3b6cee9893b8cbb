//! Bounded exponential backoff for cloud calls.

use std::future::Future;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::info;
use udo_cloud::CloudApiError;

use crate::error::UdoError;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts. Ignored when a deadline is set.
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Overall time budget. When set, transient failures are retried until
    /// the next retry would land past it, however many attempts that takes.
    pub deadline: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            deadline: None,
        }
    }
}

impl RetryPolicy {
    /// Same policy with an overall time budget.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        std::cmp::min(
            self.max_delay,
            Duration::from_secs_f64(delay.as_secs_f64() * self.backoff_multiplier),
        )
    }
}

/// Why a retried call gave up.
#[derive(Debug, Error)]
pub enum RetryError {
    /// The call failed with a non-retryable error.
    #[error(transparent)]
    Permanent(CloudApiError),

    /// Transient failures persisted past the attempt or time budget.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: CloudApiError },
}

impl RetryError {
    /// The last underlying error.
    #[must_use]
    pub fn into_inner(self) -> CloudApiError {
        match self {
            Self::Permanent(e) | Self::Exhausted { last: e, .. } => e,
        }
    }
}

impl From<RetryError> for UdoError {
    fn from(e: RetryError) -> Self {
        match e.into_inner() {
            CloudApiError::NotFound(name) => Self::NotFound(name),
            CloudApiError::AlreadyExists(name) => Self::AlreadyExists(name),
            other => Self::Cloud(other),
        }
    }
}

/// Run a cloud call, retrying transient failures.
///
/// # Errors
/// Returns `Permanent` on the first non-transient error and `Exhausted` once
/// the time budget runs out, or the attempt budget when no deadline is set.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut f: F,
) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CloudApiError>>,
{
    let start = Instant::now();
    let mut attempt = 0;
    let mut delay = policy.initial_delay;

    loop {
        attempt += 1;
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_transient() => return Err(RetryError::Permanent(e)),
            Err(e) => {
                let exhausted = match policy.deadline {
                    Some(deadline) => start.elapsed() + delay > deadline,
                    None => attempt >= policy.max_attempts,
                };
                if exhausted {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: e,
                    });
                }

                match policy.deadline {
                    Some(deadline) => info!(
                        "{operation_name} failed (attempt {attempt}, {:?} of {deadline:?} used): {e}. Retrying in {delay:?}...",
                        start.elapsed()
                    ),
                    None => info!(
                        "{operation_name} failed (attempt {attempt}/{}): {e}. Retrying in {delay:?}...",
                        policy.max_attempts
                    ),
                }

                tokio::time::sleep(delay).await;
                delay = policy.next_delay(delay);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            backoff_multiplier: 2.0,
            deadline: None,
        }
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.next_delay(Duration::from_secs(20)), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_recovers_from_transient() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = with_retry(&fast(), "describe", || async move {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(CloudApiError::Throttled("Rate exceeded".to_string()))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_is_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = with_retry(&fast(), "delete", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CloudApiError::InUse("lc".to_string()))
        })
        .await;
        assert!(matches!(result, Err(RetryError::Permanent(CloudApiError::InUse(_)))));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausts_attempts() {
        let result: Result<(), _> = with_retry(&fast(), "describe", || async {
            Err(CloudApiError::Unavailable {
                status: 503,
                message: "down".to_string(),
            })
        })
        .await;
        assert!(matches!(result, Err(RetryError::Exhausted { attempts: 3, .. })));
    }

    #[tokio::test]
    async fn test_deadline_stops_early() {
        let policy = RetryPolicy {
            max_attempts: 100,
            initial_delay: Duration::from_millis(20),
            ..fast()
        }
        .with_deadline(Duration::from_millis(10));
        let result: Result<(), _> = with_retry(&policy, "status", || async {
            Err(CloudApiError::Throttled("slow down".to_string()))
        })
        .await;
        assert!(matches!(result, Err(RetryError::Exhausted { attempts: 1, .. })));
    }

    #[tokio::test]
    async fn test_deadline_outlasts_attempt_budget() {
        let policy = fast().with_deadline(Duration::from_secs(5));
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = with_retry(&policy, "status", || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 9 {
                Err(CloudApiError::Throttled("slow down".to_string()))
            } else {
                Ok("Succeeded")
            }
        })
        .await;
        assert_eq!(result.unwrap(), "Succeeded");
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_deadline_bounds_retries() {
        let policy = fast().with_deadline(Duration::from_millis(40));
        let start = Instant::now();
        let result: Result<(), _> = with_retry(&policy, "status", || async {
            Err(CloudApiError::Throttled("slow down".to_string()))
        })
        .await;
        let attempts = match result {
            Err(RetryError::Exhausted { attempts, .. }) => attempts,
            other => panic!("expected exhaustion, got {other:?}"),
        };
        assert!(attempts > 3, "stopped after {attempts} attempts");
        assert!(start.elapsed() < Duration::from_millis(500));
    }
}
