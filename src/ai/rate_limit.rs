//! Token-bucket rate limiter for outbound AI requests
//!
//! Refills continuously at the configured requests-per-second; a caller
//! either takes a token, waits until one accrues, or gives up after the
//! bounded wait and fails with `RateLimited`. Cache hits never touch the
//! limiter.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::error::AiError;
use crate::core::constants::AI_RATE_LIMIT_MAX_WAIT_SECS;

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

pub struct RateLimiter {
    rate_per_sec: f64,
    capacity: f64,
    max_wait: Duration,
    state: Mutex<BucketState>,
}

impl RateLimiter {
    pub fn new(rate_per_sec: f64) -> Self {
        Self::with_max_wait(rate_per_sec, Duration::from_secs(AI_RATE_LIMIT_MAX_WAIT_SECS))
    }

    pub fn with_max_wait(rate_per_sec: f64, max_wait: Duration) -> Self {
        let capacity = rate_per_sec.max(1.0);
        Self {
            rate_per_sec,
            capacity,
            max_wait,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take one token, waiting up to the bounded maximum.
    pub async fn acquire(&self) -> Result<(), AiError> {
        let deadline = Instant::now() + self.max_wait;
        loop {
            let wait = {
                let mut state = self.state.lock();
                self.refill(&mut state);
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return Ok(());
                }
                // Time until the next whole token accrues
                let deficit = 1.0 - state.tokens;
                Duration::from_secs_f64(deficit / self.rate_per_sec)
            };

            if Instant::now() + wait > deadline {
                return Err(AiError::RateLimited);
            }
            tokio::time::sleep(wait).await;
        }
    }

    /// Take a token only if one is immediately available.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        self.refill(&mut state);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate_per_sec).min(self.capacity);
        state.last_refill = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn burst_up_to_capacity_then_blocks() {
        let limiter = RateLimiter::with_max_wait(5.0, Duration::from_millis(1));
        for _ in 0..5 {
            assert!(limiter.try_acquire());
        }
        assert!(!limiter.try_acquire());
    }

    #[tokio::test]
    async fn tokens_refill_over_time() {
        let limiter = RateLimiter::with_max_wait(100.0, Duration::from_secs(1));
        while limiter.try_acquire() {}
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(limiter.try_acquire());
    }

    #[tokio::test]
    async fn acquire_fails_after_bounded_wait() {
        let limiter = RateLimiter::with_max_wait(0.5, Duration::from_millis(10));
        assert!(limiter.acquire().await.is_ok());
        let err = limiter.acquire().await.unwrap_err();
        assert!(matches!(err, AiError::RateLimited));
    }

    #[tokio::test]
    async fn acquire_waits_for_refill_within_bound() {
        let limiter = RateLimiter::with_max_wait(50.0, Duration::from_secs(1));
        while limiter.try_acquire() {}
        // 50 rps: the next token is ~20ms away, well inside the bound
        assert!(limiter.acquire().await.is_ok());
    }
}
