//! Circuit breaker for external dependencies
//!
//! Tracks a rolling window of call outcomes (bounded by count and age) and
//! short-circuits calls once the error rate crosses the threshold:
//! `closed → open` on threshold, `open → half-open` after the cooldown,
//! `half-open → closed` on a successful probe, back to `open` on a failed
//! one. One breaker per external dependency, created at startup and shared.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::core::constants::{
    CIRCUIT_COOLDOWN_SECS, CIRCUIT_FAILURE_THRESHOLD, CIRCUIT_MIN_CALLS, CIRCUIT_WINDOW_SECS,
    CIRCUIT_WINDOW_SIZE,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitConfig {
    /// Maximum outcomes kept in the rolling window
    pub window_size: usize,
    /// Maximum age of an outcome in the window
    pub window: Duration,
    /// Error rate that trips the breaker
    pub failure_threshold: f64,
    /// Minimum calls in the window before the threshold applies
    pub min_calls: usize,
    /// Time in `open` before a half-open probe is allowed
    pub cooldown: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            window_size: CIRCUIT_WINDOW_SIZE,
            window: Duration::from_secs(CIRCUIT_WINDOW_SECS),
            failure_threshold: CIRCUIT_FAILURE_THRESHOLD,
            min_calls: CIRCUIT_MIN_CALLS,
            cooldown: Duration::from_secs(CIRCUIT_COOLDOWN_SECS),
        }
    }
}

struct CircuitInner {
    state: CircuitState,
    outcomes: VecDeque<(Instant, bool)>,
    opened_at: Option<Instant>,
    /// A half-open probe is in flight
    probing: bool,
}

/// Breaker for one external dependency.
pub struct CircuitBreaker {
    name: &'static str,
    config: CircuitConfig,
    inner: Mutex<CircuitInner>,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, config: CircuitConfig) -> Self {
        Self {
            name,
            config,
            inner: Mutex::new(CircuitInner {
                state: CircuitState::Closed,
                outcomes: VecDeque::new(),
                opened_at: None,
                probing: false,
            }),
        }
    }

    pub fn with_defaults(name: &'static str) -> Self {
        Self::new(name, CircuitConfig::default())
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Gate a call. `Ok(())` admits it; `Err(())` means the circuit is open
    /// and the caller must fail fast. In half-open state exactly one probe
    /// call is admitted at a time.
    pub fn check(&self) -> Result<(), ()> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.config.cooldown {
                    inner.state = CircuitState::HalfOpen;
                    inner.probing = true;
                    tracing::info!(breaker = self.name, "Circuit half-open, admitting probe");
                    Ok(())
                } else {
                    Err(())
                }
            }
            CircuitState::HalfOpen => {
                if inner.probing {
                    Err(())
                } else {
                    inner.probing = true;
                    Ok(())
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.probing = false;
                inner.outcomes.clear();
                inner.opened_at = None;
                tracing::info!(breaker = self.name, "Circuit closed after successful probe");
            }
            _ => self.push_outcome(&mut inner, true),
        }
    }

    /// Resolve a call whose outcome says nothing about dependency health
    /// (local rate-limiter depletion, a well-formed response with unusable
    /// content). An in-flight half-open probe re-opens conservatively so the
    /// breaker can never wedge with `probing` stuck; in any other state the
    /// rolling window is left untouched.
    pub fn record_inconclusive(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Open;
            inner.probing = false;
            inner.opened_at = Some(Instant::now());
            tracing::warn!(
                breaker = self.name,
                "Probe outcome inconclusive, circuit re-opened"
            );
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.probing = false;
                inner.opened_at = Some(Instant::now());
                tracing::warn!(breaker = self.name, "Probe failed, circuit re-opened");
            }
            CircuitState::Open => {}
            CircuitState::Closed => {
                self.push_outcome(&mut inner, false);
                let (calls, failures) = self.window_stats(&mut inner);
                if calls >= self.config.min_calls {
                    let rate = failures as f64 / calls as f64;
                    if rate >= self.config.failure_threshold {
                        inner.state = CircuitState::Open;
                        inner.opened_at = Some(Instant::now());
                        tracing::warn!(
                            breaker = self.name,
                            calls,
                            failures,
                            error_rate = rate,
                            "Circuit opened"
                        );
                    }
                }
            }
        }
    }

    fn push_outcome(&self, inner: &mut CircuitInner, ok: bool) {
        inner.outcomes.push_back((Instant::now(), ok));
        while inner.outcomes.len() > self.config.window_size {
            inner.outcomes.pop_front();
        }
    }

    fn window_stats(&self, inner: &mut CircuitInner) -> (usize, usize) {
        let horizon = Instant::now() - self.config.window;
        while let Some((t, _)) = inner.outcomes.front() {
            if *t < horizon {
                inner.outcomes.pop_front();
            } else {
                break;
            }
        }
        let calls = inner.outcomes.len();
        let failures = inner.outcomes.iter().filter(|(_, ok)| !ok).count();
        (calls, failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> CircuitConfig {
        CircuitConfig {
            window_size: 10,
            window: Duration::from_secs(60),
            failure_threshold: 0.5,
            min_calls: 4,
            cooldown: Duration::from_millis(20),
        }
    }

    #[test]
    fn stays_closed_under_min_calls() {
        let breaker = CircuitBreaker::new("test", fast_config());
        for _ in 0..3 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.check().is_ok());
    }

    #[test]
    fn opens_on_error_rate() {
        let breaker = CircuitBreaker::new("test", fast_config());
        breaker.record_success();
        for _ in 0..4 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.check().is_err());
    }

    #[test]
    fn half_open_after_cooldown_then_closes_on_probe_success() {
        let breaker = CircuitBreaker::new("test", fast_config());
        for _ in 0..5 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(30));
        assert!(breaker.check().is_ok());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        // Only one probe admitted while the first is in flight
        assert!(breaker.check().is_err());

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.check().is_ok());
    }

    #[test]
    fn failed_probe_reopens() {
        let breaker = CircuitBreaker::new("test", fast_config());
        for _ in 0..5 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(30));
        assert!(breaker.check().is_ok());
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.check().is_err());
    }

    #[test]
    fn inconclusive_probe_reopens_instead_of_wedging() {
        let breaker = CircuitBreaker::new("test", fast_config());
        for _ in 0..5 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(30));
        // Probe admitted, then resolved without a dependency verdict.
        assert!(breaker.check().is_ok());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_inconclusive();
        assert_eq!(breaker.state(), CircuitState::Open);

        // After another cooldown a fresh probe is admitted again.
        std::thread::sleep(Duration::from_millis(30));
        assert!(breaker.check().is_ok());
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn inconclusive_is_a_no_op_while_closed() {
        let breaker = CircuitBreaker::new("test", fast_config());
        breaker.record_failure();
        for _ in 0..10 {
            breaker.record_inconclusive();
        }
        // Nothing entered the rolling window, so the breaker stays closed.
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.check().is_ok());
    }

    #[test]
    fn success_clears_window_pressure() {
        let breaker = CircuitBreaker::new("test", fast_config());
        // 3 failures, then plenty of successes keep rate below threshold
        for _ in 0..3 {
            breaker.record_failure();
        }
        for _ in 0..7 {
            breaker.record_success();
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
