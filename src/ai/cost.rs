//! Token and cost accounting for AI usage
//!
//! Counts prompt, completion and embedding tokens, estimates USD from the
//! configured per-1K prices, and gates further calls once the alert
//! threshold is crossed. Token counts are pre-estimated before any network
//! activity so an over-budget request is rejected without being sent.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use super::error::AiError;
use crate::core::config::BudgetPolicy;

/// USD stored as integer micro-dollars so accumulation stays atomic.
const MICROS_PER_USD: f64 = 1_000_000.0;

/// Rough token estimate used for pre-call budgeting (chars / 4).
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4 + 1
}

#[derive(Debug, Clone, Copy)]
pub struct Pricing {
    pub prompt_per_1k: f64,
    pub completion_per_1k: f64,
    pub embedding_per_1k: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CostSnapshot {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub embedding_tokens: u64,
    pub cost_usd: f64,
}

pub struct CostTracker {
    pricing: Pricing,
    alert_threshold_usd: f64,
    policy: BudgetPolicy,
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
    embedding_tokens: AtomicU64,
    cost_micros: AtomicU64,
    alerted: AtomicBool,
}

impl CostTracker {
    pub fn new(pricing: Pricing, alert_threshold_usd: f64, policy: BudgetPolicy) -> Self {
        Self {
            pricing,
            alert_threshold_usd,
            policy,
            prompt_tokens: AtomicU64::new(0),
            completion_tokens: AtomicU64::new(0),
            embedding_tokens: AtomicU64::new(0),
            cost_micros: AtomicU64::new(0),
            alerted: AtomicBool::new(false),
        }
    }

    pub fn policy(&self) -> BudgetPolicy {
        self.policy
    }

    /// Gate a call before any network activity. `estimated_tokens` is the
    /// pre-call estimate for the request about to be sent.
    pub fn precheck(&self, estimated_tokens: usize) -> Result<(), AiError> {
        if self.policy == BudgetPolicy::HardGate && self.over_budget() {
            return Err(AiError::BudgetExceeded);
        }
        // Reject a single request that would blow through the remaining
        // budget on its own.
        if self.policy == BudgetPolicy::HardGate {
            let projected = self.total_cost_usd()
                + (estimated_tokens as f64 / 1000.0) * self.pricing.prompt_per_1k;
            if projected > self.alert_threshold_usd && self.pricing.prompt_per_1k > 0.0 {
                return Err(AiError::BudgetExceeded);
            }
        }
        Ok(())
    }

    pub fn record_chat(&self, prompt_tokens: u64, completion_tokens: u64) {
        self.prompt_tokens.fetch_add(prompt_tokens, Ordering::Relaxed);
        self.completion_tokens
            .fetch_add(completion_tokens, Ordering::Relaxed);
        let usd = (prompt_tokens as f64 / 1000.0) * self.pricing.prompt_per_1k
            + (completion_tokens as f64 / 1000.0) * self.pricing.completion_per_1k;
        self.add_cost(usd);
    }

    pub fn record_embedding(&self, tokens: u64) {
        self.embedding_tokens.fetch_add(tokens, Ordering::Relaxed);
        self.add_cost((tokens as f64 / 1000.0) * self.pricing.embedding_per_1k);
    }

    fn add_cost(&self, usd: f64) {
        if usd > 0.0 {
            self.cost_micros
                .fetch_add((usd * MICROS_PER_USD) as u64, Ordering::Relaxed);
        }
    }

    pub fn total_cost_usd(&self) -> f64 {
        self.cost_micros.load(Ordering::Relaxed) as f64 / MICROS_PER_USD
    }

    pub fn over_budget(&self) -> bool {
        self.total_cost_usd() > self.alert_threshold_usd
    }

    /// True exactly once, the first time the threshold is crossed; drives a
    /// single alert through the progress reporter.
    pub fn take_alert(&self) -> bool {
        self.over_budget()
            && self
                .alerted
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
    }

    pub fn snapshot(&self) -> CostSnapshot {
        CostSnapshot {
            prompt_tokens: self.prompt_tokens.load(Ordering::Relaxed),
            completion_tokens: self.completion_tokens.load(Ordering::Relaxed),
            embedding_tokens: self.embedding_tokens.load(Ordering::Relaxed),
            cost_usd: self.total_cost_usd(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pricing() -> Pricing {
        Pricing {
            prompt_per_1k: 0.01,
            completion_per_1k: 0.03,
            embedding_per_1k: 0.0001,
        }
    }

    #[test]
    fn token_estimate_is_quarter_chars() {
        assert_eq!(estimate_tokens(""), 1);
        assert_eq!(estimate_tokens("abcd"), 2);
        assert_eq!(estimate_tokens(&"x".repeat(400)), 101);
    }

    #[test]
    fn accumulates_cost() {
        let tracker = CostTracker::new(pricing(), 10.0, BudgetPolicy::HardGate);
        tracker.record_chat(1000, 1000);
        tracker.record_embedding(10_000);
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.prompt_tokens, 1000);
        assert_eq!(snapshot.completion_tokens, 1000);
        assert_eq!(snapshot.embedding_tokens, 10_000);
        assert!((snapshot.cost_usd - 0.041).abs() < 1e-6);
    }

    #[test]
    fn hard_gate_rejects_once_over_budget() {
        let tracker = CostTracker::new(pricing(), 0.01, BudgetPolicy::HardGate);
        assert!(tracker.precheck(100).is_ok());
        tracker.record_chat(2000, 0); // $0.02 > $0.01
        assert!(tracker.over_budget());
        assert!(matches!(
            tracker.precheck(100),
            Err(AiError::BudgetExceeded)
        ));
    }

    #[test]
    fn soft_degrade_never_rejects() {
        let tracker = CostTracker::new(pricing(), 0.01, BudgetPolicy::SoftDegrade);
        tracker.record_chat(10_000, 0);
        assert!(tracker.over_budget());
        assert!(tracker.precheck(100).is_ok());
    }

    #[test]
    fn alert_fires_exactly_once() {
        let tracker = CostTracker::new(pricing(), 0.01, BudgetPolicy::HardGate);
        assert!(!tracker.take_alert());
        tracker.record_chat(10_000, 0);
        assert!(tracker.take_alert());
        assert!(!tracker.take_alert());
    }

    #[test]
    fn precheck_rejects_single_oversized_request() {
        let tracker = CostTracker::new(pricing(), 0.005, BudgetPolicy::HardGate);
        // 1M estimated tokens at $0.01/1K ≈ $10 projected
        assert!(matches!(
            tracker.precheck(1_000_000),
            Err(AiError::BudgetExceeded)
        ));
    }
}
