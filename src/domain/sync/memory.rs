//! Adaptive batch sizing under memory pressure
//!
//! Samples resident set size between slices. Above 80% of the configured
//! budget the next slice's batch size halves; after a full window of samples
//! below 30% it doubles, up to the configured maximum.

/// Consecutive low samples required before the batch size grows
const LOW_PRESSURE_WINDOW: u32 = 3;

pub struct MemoryOptimizer {
    max_memory_mb: u64,
    low_streak: u32,
    sampler: Box<dyn Fn() -> Option<u64> + Send>,
}

impl MemoryOptimizer {
    pub fn new(max_memory_mb: u64) -> Self {
        Self::with_sampler(max_memory_mb, Box::new(resident_set_mb))
    }

    /// Inject a sampler (tests).
    pub fn with_sampler(max_memory_mb: u64, sampler: Box<dyn Fn() -> Option<u64> + Send>) -> Self {
        Self {
            max_memory_mb,
            low_streak: 0,
            sampler,
        }
    }

    /// Recommend the batch size for the next slice.
    pub fn adjust(&mut self, current: u32, min: u32, max: u32) -> u32 {
        let Some(rss_mb) = (self.sampler)() else {
            return current;
        };

        let high = self.max_memory_mb as f64 * 0.8;
        let low = self.max_memory_mb as f64 * 0.3;

        if rss_mb as f64 > high {
            self.low_streak = 0;
            let next = (current / 2).max(min);
            if next != current {
                tracing::info!(
                    rss_mb,
                    budget_mb = self.max_memory_mb,
                    from = current,
                    to = next,
                    "Memory pressure high, shrinking batch size"
                );
            }
            next
        } else if (rss_mb as f64) < low {
            self.low_streak += 1;
            if self.low_streak >= LOW_PRESSURE_WINDOW {
                self.low_streak = 0;
                let next = current.saturating_mul(2).min(max);
                if next != current {
                    tracing::debug!(
                        rss_mb,
                        from = current,
                        to = next,
                        "Memory pressure low, growing batch size"
                    );
                }
                next
            } else {
                current
            }
        } else {
            self.low_streak = 0;
            current
        }
    }
}

/// Resident set size in MB from `/proc/self/status` (Linux); `None` where
/// unavailable.
fn resident_set_mb() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let kb: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb / 1024)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn optimizer_with_rss(values: Vec<u64>) -> MemoryOptimizer {
        let idx = Arc::new(AtomicU64::new(0));
        let sampler = move || {
            let i = idx.fetch_add(1, Ordering::SeqCst) as usize;
            Some(values[i.min(values.len() - 1)])
        };
        MemoryOptimizer::with_sampler(100, Box::new(sampler))
    }

    #[test]
    fn halves_above_high_watermark() {
        let mut optimizer = optimizer_with_rss(vec![90]);
        assert_eq!(optimizer.adjust(1000, 100, 5000), 500);
    }

    #[test]
    fn halving_respects_minimum() {
        let mut optimizer = optimizer_with_rss(vec![90]);
        assert_eq!(optimizer.adjust(150, 100, 5000), 100);
    }

    #[test]
    fn doubles_only_after_sustained_low_pressure() {
        let mut optimizer = optimizer_with_rss(vec![10, 10, 10, 10]);
        assert_eq!(optimizer.adjust(1000, 100, 5000), 1000);
        assert_eq!(optimizer.adjust(1000, 100, 5000), 1000);
        assert_eq!(optimizer.adjust(1000, 100, 5000), 2000);
    }

    #[test]
    fn doubling_respects_maximum() {
        let mut optimizer = optimizer_with_rss(vec![10, 10, 10]);
        optimizer.adjust(3000, 100, 5000);
        optimizer.adjust(3000, 100, 5000);
        assert_eq!(optimizer.adjust(3000, 100, 5000), 5000);
    }

    #[test]
    fn mid_range_resets_streak_and_keeps_size() {
        let mut optimizer = optimizer_with_rss(vec![10, 10, 50, 10, 10, 10]);
        assert_eq!(optimizer.adjust(1000, 100, 5000), 1000); // low 1
        assert_eq!(optimizer.adjust(1000, 100, 5000), 1000); // low 2
        assert_eq!(optimizer.adjust(1000, 100, 5000), 1000); // mid resets
        assert_eq!(optimizer.adjust(1000, 100, 5000), 1000); // low 1
        assert_eq!(optimizer.adjust(1000, 100, 5000), 1000); // low 2
        assert_eq!(optimizer.adjust(1000, 100, 5000), 2000); // low 3 grows
    }

    #[test]
    fn missing_sample_keeps_current() {
        let mut optimizer = MemoryOptimizer::with_sampler(100, Box::new(|| None));
        assert_eq!(optimizer.adjust(1000, 100, 5000), 1000);
    }
}
