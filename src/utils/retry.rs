//! Async retry with exponential backoff and jitter
//!
//! Retries only errors classified `Transient`; everything else surfaces
//! immediately. Delay grows as `base * 2^attempt`, capped, with +/-20%
//! jitter so concurrent workers do not thunder against a recovering
//! dependency. No call ever exceeds `max_retries + 1` attempts.

use std::time::Duration;

use rand::Rng;

use crate::data::error::Classify;

/// Retry policy for one fallible boundary.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// Backoff delay before retry number `attempt` (1-based), jittered.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
            .min(self.max_delay);
        jitter(exp)
    }
}

/// Apply +/-20% jitter to a delay.
fn jitter(delay: Duration) -> Duration {
    let millis = delay.as_millis() as u64;
    if millis == 0 {
        return delay;
    }
    let spread = millis / 5;
    if spread == 0 {
        return delay;
    }
    let offset = rand::thread_rng().gen_range(0..=spread * 2);
    Duration::from_millis(millis - spread + offset)
}

/// Retry an async operation while it fails transiently.
///
/// Returns the operation's value, or the last error once it is non-transient
/// or retries are exhausted.
pub async fn retry<T, E, F, Fut>(policy: RetryPolicy, label: &str, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: Classify + std::fmt::Display,
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if !e.kind().is_retryable() || attempt > policy.max_retries {
                    if attempt > 1 {
                        tracing::error!(
                            %label,
                            error = %e,
                            kind = %e.kind(),
                            attempts = attempt,
                            "Giving up after retries"
                        );
                    }
                    return Err(e);
                }
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    %label,
                    error = %e,
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying after transient error"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::error::ErrorKind;
    use std::cell::RefCell;

    #[derive(Debug)]
    struct TestError(ErrorKind);

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "test error ({})", self.0)
        }
    }

    impl Classify for TestError {
        fn kind(&self) -> ErrorKind {
            self.0
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(10))
    }

    #[tokio::test]
    async fn succeeds_first_try() {
        let result: Result<u32, TestError> =
            retry(fast_policy(), "test", || async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let attempts = RefCell::new(0);
        let result: Result<u32, TestError> = retry(fast_policy(), "test", || {
            *attempts.borrow_mut() += 1;
            let n = *attempts.borrow();
            async move {
                if n < 3 {
                    Err(TestError(ErrorKind::Transient))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn respects_attempt_bound() {
        let attempts = RefCell::new(0u32);
        let result: Result<(), TestError> = retry(fast_policy(), "test", || {
            *attempts.borrow_mut() += 1;
            async { Err(TestError(ErrorKind::Transient)) }
        })
        .await;
        assert!(result.is_err());
        // max_retries + 1 attempts, never more
        assert_eq!(*attempts.borrow(), 4);
    }

    #[tokio::test]
    async fn persistent_errors_fail_immediately() {
        let attempts = RefCell::new(0u32);
        let result: Result<(), TestError> = retry(fast_policy(), "test", || {
            *attempts.borrow_mut() += 1;
            async { Err(TestError(ErrorKind::Persistent)) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(*attempts.borrow(), 1);
    }

    #[test]
    fn delay_grows_and_caps() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_millis(400));
        // Jitter is +/-20%, so compare against the widened envelope.
        let d1 = policy.delay_for(1).as_millis();
        let d3 = policy.delay_for(3).as_millis();
        assert!((80..=120).contains(&d1), "d1 = {d1}");
        assert!((320..=480).contains(&d3), "d3 = {d3}");
    }
}
