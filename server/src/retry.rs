use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, warn};

use crate::error::{StoreError, UpdateError};

/// Bounded exponential backoff for store operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            ..Self::default()
        }
    }

    /// Delay slept after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Runs `op` until it succeeds, fails with a non-transient error, or the
    /// attempt budget is spent.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, UpdateError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempts = 0;

        loop {
            attempts += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempts < max_attempts => {
                    let delay = self.delay_after(attempts);
                    warn!(
                        "Failed to {} (attempt {}/{}): {}; retrying in {:?}",
                        what, attempts, max_attempts, e, delay
                    );
                    sleep(delay).await;
                }
                Err(e) if e.is_transient() => {
                    error!("Failed to {} after {} attempts: {}", what, attempts, e);
                    return Err(UpdateError::StoreUnavailable {
                        attempts,
                        source: e,
                    });
                }
                Err(e) => {
                    error!("Failed to {}: {}", what, e);
                    return Err(UpdateError::Store(e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1))
    }

    #[test]
    fn delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(400));
        assert_eq!(policy.delay_after(4), Duration::from_millis(500));
        assert_eq!(policy.delay_after(40), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = &AtomicU32::new(0);
        let result = fast_policy(5)
            .run("write", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(StoreError::Unavailable("down".to_string()))
                } else {
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = fast_policy(5)
            .run("write", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(StoreError::Unavailable("down".to_string()))
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert!(matches!(
            result,
            Err(UpdateError::StoreUnavailable { attempts: 5, .. })
        ));
    }

    #[tokio::test]
    async fn does_not_retry_rejected_writes() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = fast_policy(5)
            .run("write", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(StoreError::Rejected {
                    player_id: "p1".to_string(),
                    reason: "overflow".to_string(),
                })
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(UpdateError::Store(_))));
    }
}
