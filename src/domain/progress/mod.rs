//! Progress reporting and alert dispatch
//!
//! Counters, derived rate/ETA gauges, a sliding error-rate window, and
//! threshold alerts. Delivery is a capability: the log sink is always
//! installed, a webhook sink when configured, and the counters can be
//! rendered as Prometheus text exposition for a textfile collector.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::ai::cost::CostSnapshot;
use crate::core::constants::{PROGRESS_ERROR_RATE_THRESHOLD, PROGRESS_ERROR_WINDOW_SECS};

/// Minimum outcomes in the window before the error-rate alert can fire
const ERROR_WINDOW_MIN_CALLS: usize = 10;

// =============================================================================
// Alerts
// =============================================================================

#[derive(Debug, Clone)]
pub enum Alert {
    CostThreshold { cost_usd: f64, threshold_usd: f64 },
    ErrorRate { rate: f64 },
    CircuitOpen { dependency: &'static str },
    SloExceeded { elapsed: Duration, slo: Duration },
}

impl std::fmt::Display for Alert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Alert::CostThreshold {
                cost_usd,
                threshold_usd,
            } => write!(
                f,
                "AI cost ${:.4} exceeded threshold ${:.2}",
                cost_usd, threshold_usd
            ),
            Alert::ErrorRate { rate } => {
                write!(f, "error rate {:.1}% over the last 5 minutes", rate * 100.0)
            }
            Alert::CircuitOpen { dependency } => {
                write!(f, "circuit breaker open for {}", dependency)
            }
            Alert::SloExceeded { elapsed, slo } => write!(
                f,
                "run duration {}s exceeded SLO {}s",
                elapsed.as_secs(),
                slo.as_secs()
            ),
        }
    }
}

/// Pluggable alert delivery.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, alert: &Alert);
}

/// Always-on sink: structured log lines.
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn send(&self, alert: &Alert) {
        tracing::warn!(alert = %alert, "ALERT");
    }
}

/// Optional webhook delivery; failures are logged, never propagated.
pub struct WebhookAlertSink {
    http: reqwest::Client,
    url: String,
}

impl WebhookAlertSink {
    pub fn new(url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            url,
        }
    }
}

#[async_trait]
impl AlertSink for WebhookAlertSink {
    async fn send(&self, alert: &Alert) {
        let payload = serde_json::json!({
            "source": "notisync",
            "alert": alert.to_string(),
        });
        if let Err(e) = self.http.post(&self.url).json(&payload).send().await {
            tracing::warn!(error = %e, "Webhook alert delivery failed");
        }
    }
}

// =============================================================================
// Reporter
// =============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressSnapshot {
    pub rows_extracted: u64,
    pub rows_upserted: u64,
    pub rows_quarantined: u64,
    pub total_records: Option<u64>,
    pub rate_rows_per_sec: f64,
    pub eta_seconds: Option<f64>,
}

pub struct ProgressReporter {
    started: Instant,
    rows_extracted: AtomicU64,
    rows_upserted: AtomicU64,
    rows_quarantined: AtomicU64,
    total_records: AtomicU64,
    has_total: AtomicBool,
    outcomes: Mutex<VecDeque<(Instant, bool)>>,
    error_alerted: AtomicBool,
    sinks: Vec<Box<dyn AlertSink>>,
}

impl ProgressReporter {
    pub fn new(webhook_url: Option<String>) -> Self {
        let mut sinks: Vec<Box<dyn AlertSink>> = vec![Box::new(LogAlertSink)];
        if let Some(url) = webhook_url {
            sinks.push(Box::new(WebhookAlertSink::new(url)));
        }
        Self {
            started: Instant::now(),
            rows_extracted: AtomicU64::new(0),
            rows_upserted: AtomicU64::new(0),
            rows_quarantined: AtomicU64::new(0),
            total_records: AtomicU64::new(0),
            has_total: AtomicBool::new(false),
            outcomes: Mutex::new(VecDeque::new()),
            error_alerted: AtomicBool::new(false),
            sinks,
        }
    }

    pub fn record_extracted(&self, n: u64) {
        self.rows_extracted.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_upserted(&self, n: u64) {
        self.rows_upserted.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_quarantined(&self, n: u64) {
        self.rows_quarantined.fetch_add(n, Ordering::Relaxed);
    }

    pub fn set_total_records(&self, total: u64) {
        self.total_records.store(total, Ordering::Relaxed);
        self.has_total.store(true, Ordering::Relaxed);
    }

    /// Record one unit-of-work outcome into the sliding error window.
    pub fn record_outcome(&self, ok: bool) {
        let mut window = self.outcomes.lock();
        window.push_back((Instant::now(), ok));
        let horizon = Instant::now() - Duration::from_secs(PROGRESS_ERROR_WINDOW_SECS);
        while let Some((t, _)) = window.front() {
            if *t < horizon {
                window.pop_front();
            } else {
                break;
            }
        }
    }

    /// Error rate over the sliding window.
    pub fn error_rate(&self) -> f64 {
        let window = self.outcomes.lock();
        if window.is_empty() {
            return 0.0;
        }
        let failures = window.iter().filter(|(_, ok)| !ok).count();
        failures as f64 / window.len() as f64
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let upserted = self.rows_upserted.load(Ordering::Relaxed);
        let elapsed = self.started.elapsed().as_secs_f64();
        let rate = if elapsed > 0.0 {
            upserted as f64 / elapsed
        } else {
            0.0
        };
        let total = self
            .has_total
            .load(Ordering::Relaxed)
            .then(|| self.total_records.load(Ordering::Relaxed));
        let eta_seconds = total.and_then(|t| {
            (rate > 0.0 && t > upserted).then(|| (t - upserted) as f64 / rate)
        });

        ProgressSnapshot {
            rows_extracted: self.rows_extracted.load(Ordering::Relaxed),
            rows_upserted: upserted,
            rows_quarantined: self.rows_quarantined.load(Ordering::Relaxed),
            total_records: total,
            rate_rows_per_sec: rate,
            eta_seconds,
        }
    }

    /// Dispatch an alert to every sink.
    pub async fn alert(&self, alert: Alert) {
        for sink in &self.sinks {
            sink.send(&alert).await;
        }
    }

    /// Fire the error-rate alert once when the windowed rate crosses the
    /// threshold with enough samples to mean anything.
    pub async fn check_error_rate(&self) {
        let (rate, samples) = {
            let window = self.outcomes.lock();
            if window.is_empty() {
                return;
            }
            let failures = window.iter().filter(|(_, ok)| !ok).count();
            (failures as f64 / window.len() as f64, window.len())
        };
        if samples >= ERROR_WINDOW_MIN_CALLS
            && rate > PROGRESS_ERROR_RATE_THRESHOLD
            && self
                .error_alerted
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            self.alert(Alert::ErrorRate { rate }).await;
        }
    }

    /// Periodic progress line.
    pub fn log_progress(&self, table: &str) {
        let snapshot = self.snapshot();
        tracing::info!(
            table = %table,
            extracted = snapshot.rows_extracted,
            upserted = snapshot.rows_upserted,
            quarantined = snapshot.rows_quarantined,
            rate_rows_per_sec = format!("{:.1}", snapshot.rate_rows_per_sec),
            eta_seconds = snapshot.eta_seconds.map(|e| e as u64),
            "Progress"
        );
    }

    /// Prometheus text exposition of the counters, suitable for a textfile
    /// collector.
    pub fn render_prometheus(&self, cost: Option<&CostSnapshot>) -> String {
        let snapshot = self.snapshot();
        let mut out = String::new();
        out.push_str(&format!(
            "notisync_rows_extracted_total {}\n",
            snapshot.rows_extracted
        ));
        out.push_str(&format!(
            "notisync_rows_upserted_total {}\n",
            snapshot.rows_upserted
        ));
        out.push_str(&format!(
            "notisync_rows_quarantined_total {}\n",
            snapshot.rows_quarantined
        ));
        out.push_str(&format!(
            "notisync_rate_rows_per_sec {:.3}\n",
            snapshot.rate_rows_per_sec
        ));
        if let Some(cost) = cost {
            out.push_str(&format!(
                "notisync_ai_tokens_prompt_total {}\n",
                cost.prompt_tokens
            ));
            out.push_str(&format!(
                "notisync_ai_tokens_completion_total {}\n",
                cost.completion_tokens
            ));
            out.push_str(&format!(
                "notisync_ai_tokens_embedding_total {}\n",
                cost.embedding_tokens
            ));
            out.push_str(&format!("notisync_ai_cost_usd {:.6}\n", cost.cost_usd));
        }
        out
    }

    /// Dump the exposition to the configured textfile path.
    pub fn write_textfile(&self, path: &str, cost: Option<&CostSnapshot>) {
        if let Err(e) = std::fs::write(path, self.render_prometheus(cost)) {
            tracing::warn!(path = %path, error = %e, "Failed to write metrics textfile");
        }
    }
}

/// One CLI summary line per table.
pub fn format_table_summary(
    table: &str,
    status: &str,
    rows: u64,
    duration: Duration,
    error: Option<&str>,
) -> String {
    match error {
        None => format!(
            "table={} status={} rows={} duration={}s",
            table,
            status,
            rows,
            duration.as_secs()
        ),
        Some(error) => format!(
            "table={} status={} rows={} duration={}s error={}",
            table,
            status,
            rows,
            duration.as_secs(),
            error
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_into_snapshot() {
        let reporter = ProgressReporter::new(None);
        reporter.record_extracted(100);
        reporter.record_upserted(90);
        reporter.record_quarantined(2);
        let snapshot = reporter.snapshot();
        assert_eq!(snapshot.rows_extracted, 100);
        assert_eq!(snapshot.rows_upserted, 90);
        assert_eq!(snapshot.rows_quarantined, 2);
        assert!(snapshot.rate_rows_per_sec > 0.0);
    }

    #[test]
    fn eta_requires_total() {
        let reporter = ProgressReporter::new(None);
        reporter.record_upserted(50);
        assert!(reporter.snapshot().eta_seconds.is_none());
        reporter.set_total_records(1000);
        let snapshot = reporter.snapshot();
        assert_eq!(snapshot.total_records, Some(1000));
        assert!(snapshot.eta_seconds.is_some());
    }

    #[test]
    fn error_rate_over_window() {
        let reporter = ProgressReporter::new(None);
        assert_eq!(reporter.error_rate(), 0.0);
        for _ in 0..8 {
            reporter.record_outcome(true);
        }
        for _ in 0..2 {
            reporter.record_outcome(false);
        }
        assert!((reporter.error_rate() - 0.2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn error_alert_fires_once_over_threshold() {
        let reporter = ProgressReporter::new(None);
        for _ in 0..8 {
            reporter.record_outcome(true);
        }
        for _ in 0..4 {
            reporter.record_outcome(false);
        }
        reporter.check_error_rate().await;
        assert!(reporter.error_alerted.load(Ordering::SeqCst));
        // Second call is a no-op (flag already set)
        reporter.check_error_rate().await;
    }

    #[tokio::test]
    async fn error_alert_needs_minimum_samples() {
        let reporter = ProgressReporter::new(None);
        for _ in 0..3 {
            reporter.record_outcome(false);
        }
        reporter.check_error_rate().await;
        assert!(!reporter.error_alerted.load(Ordering::SeqCst));
    }

    #[test]
    fn prometheus_exposition_shape() {
        let reporter = ProgressReporter::new(None);
        reporter.record_upserted(7);
        let cost = CostSnapshot {
            prompt_tokens: 1000,
            completion_tokens: 500,
            embedding_tokens: 2000,
            cost_usd: 0.123,
        };
        let text = reporter.render_prometheus(Some(&cost));
        assert!(text.contains("notisync_rows_upserted_total 7"));
        assert!(text.contains("notisync_ai_tokens_prompt_total 1000"));
        assert!(text.contains("notisync_ai_cost_usd 0.123000"));
    }

    #[test]
    fn summary_line_format() {
        let line = format_table_summary(
            "notification_text",
            "completed",
            42,
            Duration::from_secs(12),
            None,
        );
        assert_eq!(
            line,
            "table=notification_text status=completed rows=42 duration=12s"
        );
        let failed = format_table_summary(
            "notification_text",
            "failed",
            0,
            Duration::from_secs(3),
            Some("lease held"),
        );
        assert!(failed.ends_with("error=lease held"));
    }

    #[test]
    fn alert_display() {
        let alert = Alert::CostThreshold {
            cost_usd: 10.5,
            threshold_usd: 10.0,
        };
        assert!(alert.to_string().contains("$10.5000"));
        assert!(
            Alert::CircuitOpen {
                dependency: "ai_endpoint"
            }
            .to_string()
            .contains("ai_endpoint")
        );
    }
}
