//! Shared row and pipeline types
//!
//! Normalized shapes flowing between the warehouse reader, the enrichment
//! stage and the sink writer, plus the typed checkpoint payload persisted in
//! `etl_metadata.checkpoint_blob`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Work order (ingested row)
// =============================================================================

/// A medical work-order record as read from the warehouse.
///
/// `notification_id` and `notified_at` are non-null by contract; everything
/// else mirrors the source columns and may be absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkOrder {
    #[serde(alias = "NOTIFICATION_ID")]
    pub notification_id: String,
    /// Watermark column
    #[serde(alias = "NOTIFIED_AT", alias = "NOTIFICATION_DATE")]
    pub notified_at: DateTime<Utc>,
    #[serde(default, alias = "ASSIGNED_AT", alias = "NOTIFICATION_ASSIGNED_DATE")]
    pub assigned_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "CLOSED_AT", alias = "NOTIFICATION_CLOSED_DATE")]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "CATEGORY", alias = "NOTI_CATEGORY_ID")]
    pub category: Option<String>,
    #[serde(default, alias = "COUNTRY", alias = "NOTI_COUNTRY_ID")]
    pub country: Option<String>,
    #[serde(default, alias = "EQ_ID", alias = "SYS_EQ_ID")]
    pub eq_id: Option<String>,
    #[serde(default, alias = "FL_ID", alias = "SYS_FL_ID")]
    pub fl_id: Option<String>,
    #[serde(default, alias = "MAT_ID", alias = "SYS_MAT_ID")]
    pub mat_id: Option<String>,
    #[serde(default, alias = "SERIAL_ID", alias = "SYS_SERIAL_ID")]
    pub serial_id: Option<String>,
    #[serde(default, alias = "TREND_L1", alias = "NOTIFICATION_TRENDCODE_L1")]
    pub trend_l1: Option<String>,
    #[serde(default, alias = "TREND_L2", alias = "NOTIFICATION_TRENDCODE_L2")]
    pub trend_l2: Option<String>,
    #[serde(default, alias = "TREND_L3", alias = "NOTIFICATION_TRENDCODE_L3")]
    pub trend_l3: Option<String>,
    #[serde(default, alias = "ISSUE_TYPE")]
    pub issue_type: Option<String>,
    /// Short summary text
    #[serde(default, alias = "MEDIUM_TEXT", alias = "NOTIFICATION_MEDIUM_TEXT")]
    pub medium_text: Option<String>,
    /// Long free-text narrative
    #[serde(default, alias = "LONG_TEXT", alias = "NOTIFICATION_TEXT")]
    pub long_text: Option<String>,
}

impl WorkOrder {
    /// Keyset boundary of this row
    pub fn boundary(&self) -> Boundary {
        Boundary {
            watermark: self.notified_at,
            id: self.notification_id.clone(),
        }
    }

    /// Text used for enrichment: the narrative, falling back to the summary.
    pub fn enrichment_text(&self) -> Option<&str> {
        self.long_text
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| self.medium_text.as_deref().filter(|t| !t.trim().is_empty()))
    }
}

// =============================================================================
// Keyset boundary
// =============================================================================

/// A point in the total `(watermark, identity)` order.
///
/// The tie-break on identity makes pagination total: rows sharing a watermark
/// are still consumed exactly once across runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Boundary {
    pub watermark: DateTime<Utc>,
    pub id: String,
}

impl Boundary {
    pub fn new(watermark: DateTime<Utc>, id: impl Into<String>) -> Self {
        Self {
            watermark,
            id: id.into(),
        }
    }
}

impl PartialOrd for Boundary {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Boundary {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.watermark
            .cmp(&other.watermark)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl std::fmt::Display for Boundary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.watermark.to_rfc3339(), self.id)
    }
}

// =============================================================================
// AI extraction record
// =============================================================================

/// Structured fields extracted from a work order's free text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiExtraction {
    pub notification_id: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub primary_symptom: Option<String>,
    pub root_cause: Option<String>,
    pub summary: Option<String>,
    pub solution: Option<String>,
    pub solution_type: Option<String>,
    #[serde(default)]
    pub components: Vec<String>,
    #[serde(default)]
    pub processes: Vec<String>,
    pub main_component: Option<String>,
    pub main_process: Option<String>,
    /// Extraction confidence in [0, 1]
    pub confidence: f64,
    pub model_version: String,
    pub extracted_at: DateTime<Utc>,
}

// =============================================================================
// Embedding record
// =============================================================================

/// A semantic embedding of a work order's post-scrub source text.
#[derive(Debug, Clone)]
pub struct EmbeddingRecord {
    pub notification_id: String,
    pub source_text: String,
    pub vector: Vec<f32>,
}

// =============================================================================
// ETL metadata
// =============================================================================

/// Per-table run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::InProgress => "in_progress",
            SyncStatus::Completed => "completed",
            SyncStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SyncStatus::Pending),
            "in_progress" => Some(SyncStatus::InProgress),
            "completed" => Some(SyncStatus::Completed),
            "failed" => Some(SyncStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `etl_metadata` row.
#[derive(Debug, Clone)]
pub struct EtlMetadata {
    pub table_name: String,
    /// Highest watermark fully committed
    pub last_watermark: Option<DateTime<Utc>>,
    pub rows_processed: i64,
    pub status: SyncStatus,
    pub error_message: Option<String>,
    pub checkpoint: Option<CheckpointData>,
    pub checkpoint_at: Option<DateTime<Utc>>,
    pub batch_size: Option<i32>,
    pub total_records: Option<i64>,
    pub processed_records: Option<i64>,
}

impl EtlMetadata {
    /// Resume boundary: the checkpointed `(watermark, id)` when present,
    /// otherwise the committed watermark with an empty identity (identities
    /// sort above the empty string, so nothing at the watermark is skipped).
    pub fn resume_boundary(&self) -> Option<Boundary> {
        if let Some(cp) = &self.checkpoint
            && let (Some(w), Some(id)) = (cp.last_watermark, cp.last_id.clone())
        {
            return Some(Boundary::new(w, id));
        }
        self.last_watermark.map(|w| Boundary::new(w, ""))
    }
}

// =============================================================================
// Checkpoint payload
// =============================================================================

/// A contiguous range that exhausted its retries during backfill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedRange {
    pub from: Boundary,
    pub to: Boundary,
    pub error: String,
}

/// Typed checkpoint payload, stored as opaque JSON at the sink.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointData {
    pub last_watermark: Option<DateTime<Utc>>,
    /// Highest identity committed at `last_watermark`
    pub last_id: Option<String>,
    #[serde(default)]
    pub failed_ranges: Vec<FailedRange>,
    pub batch_size_in_effect: Option<u32>,
}

impl CheckpointData {
    pub fn from_boundary(boundary: &Boundary) -> Self {
        Self {
            last_watermark: Some(boundary.watermark),
            last_id: Some(boundary.id.clone()),
            ..Default::default()
        }
    }
}

// =============================================================================
// Upsert result
// =============================================================================

/// Outcome of a batch upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertResult {
    pub inserted: u64,
    pub updated: u64,
    /// Rows routed to the dead-letter log
    pub quarantined: u64,
}

impl UpsertResult {
    pub fn written(&self) -> u64 {
        self.inserted + self.updated
    }

    pub fn merge(&mut self, other: UpsertResult) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.quarantined += other.quarantined;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn boundary_order_is_total() {
        let a = Boundary::new(ts(100), "a");
        let b = Boundary::new(ts(100), "b");
        let c = Boundary::new(ts(200), "a");
        assert!(a < b);
        assert!(b < c);
        assert!(a < c);
        assert_eq!(a, Boundary::new(ts(100), "a"));
    }

    #[test]
    fn checkpoint_round_trips_through_json() {
        let cp = CheckpointData {
            last_watermark: Some(ts(1_700_000_000)),
            last_id: Some("N-42".into()),
            failed_ranges: vec![FailedRange {
                from: Boundary::new(ts(1), "a"),
                to: Boundary::new(ts(2), "b"),
                error: "constraint".into(),
            }],
            batch_size_in_effect: Some(500),
        };
        let json = serde_json::to_string(&cp).unwrap();
        let back: CheckpointData = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cp);
    }

    #[test]
    fn resume_boundary_prefers_checkpoint() {
        let md = EtlMetadata {
            table_name: "notification_text".into(),
            last_watermark: Some(ts(100)),
            rows_processed: 0,
            status: SyncStatus::Completed,
            error_message: None,
            checkpoint: Some(CheckpointData {
                last_watermark: Some(ts(100)),
                last_id: Some("b".into()),
                ..Default::default()
            }),
            checkpoint_at: None,
            batch_size: None,
            total_records: None,
            processed_records: None,
        };
        assert_eq!(md.resume_boundary(), Some(Boundary::new(ts(100), "b")));
    }

    #[test]
    fn resume_boundary_falls_back_to_watermark() {
        let md = EtlMetadata {
            table_name: "notification_text".into(),
            last_watermark: Some(ts(100)),
            rows_processed: 0,
            status: SyncStatus::Completed,
            error_message: None,
            checkpoint: None,
            checkpoint_at: None,
            batch_size: None,
            total_records: None,
            processed_records: None,
        };
        assert_eq!(md.resume_boundary(), Some(Boundary::new(ts(100), "")));
        // Every identity at the same watermark sorts after the empty string.
        assert!(Boundary::new(ts(100), "A") > md.resume_boundary().unwrap());
    }

    #[test]
    fn work_order_decodes_warehouse_casing() {
        let row: WorkOrder = serde_json::from_value(serde_json::json!({
            "NOTIFICATION_ID": "N-1",
            "NOTIFIED_AT": "2024-03-01T12:00:00Z",
            "SYS_EQ_ID": "EQ-9",
            "NOTIFICATION_TEXT": "pump fails intermittently"
        }))
        .unwrap();
        assert_eq!(row.notification_id, "N-1");
        assert_eq!(row.eq_id.as_deref(), Some("EQ-9"));
        assert_eq!(row.enrichment_text(), Some("pump fails intermittently"));
    }

    #[test]
    fn enrichment_text_falls_back_to_summary() {
        let mut row: WorkOrder = serde_json::from_value(serde_json::json!({
            "notification_id": "N-1",
            "notified_at": "2024-03-01T12:00:00Z",
            "medium_text": "short summary"
        }))
        .unwrap();
        assert_eq!(row.enrichment_text(), Some("short summary"));
        row.long_text = Some("   ".into());
        assert_eq!(row.enrichment_text(), Some("short summary"));
        row.medium_text = None;
        row.long_text = None;
        assert_eq!(row.enrichment_text(), None);
    }

    #[test]
    fn sync_status_round_trip() {
        for status in [
            SyncStatus::Pending,
            SyncStatus::InProgress,
            SyncStatus::Completed,
            SyncStatus::Failed,
        ] {
            assert_eq!(SyncStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(SyncStatus::parse("unknown"), None);
    }
}
