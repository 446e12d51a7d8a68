//! Keyset-paged row stream
//!
//! The cursor contract over the statement API: each `fetch_batch` reads at
//! most `batch_size` rows strictly after the current boundary, ordered by
//! `(notified_at, notification_id)`. The identity tie-break is mandatory;
//! without it, rows sharing a watermark could be skipped when a batch edge
//! falls between them.

use chrono::{DateTime, Utc};
use serde_json::{Value, json};

use super::{WarehouseError, WarehouseService};
use crate::data::types::{Boundary, WorkOrder};

const COLUMNS: &str = "notification_id, notified_at, assigned_at, closed_at, category, country, \
     eq_id, fl_id, mat_id, serial_id, trend_l1, trend_l2, trend_l3, issue_type, \
     medium_text, long_text";

/// One streaming read over a table; exclusively owned by one task.
pub struct RowStream<'a> {
    service: &'a WarehouseService,
    table: String,
    boundary: Option<Boundary>,
    until: Option<DateTime<Utc>>,
    batch_size: u32,
    done: bool,
    /// Rows dropped because they could not be decoded
    skipped_rows: u64,
}

impl<'a> RowStream<'a> {
    pub(crate) fn new(
        service: &'a WarehouseService,
        table: String,
        since: Option<Boundary>,
        until: Option<DateTime<Utc>>,
        batch_size: u32,
    ) -> Self {
        Self {
            service,
            table,
            boundary: since,
            until,
            batch_size,
            done: false,
            skipped_rows: 0,
        }
    }

    /// Fetch the next batch; empty at EOF. Advances the internal boundary to
    /// the last returned row.
    pub async fn fetch_batch(&mut self) -> Result<Vec<WorkOrder>, WarehouseError> {
        if self.done {
            return Ok(Vec::new());
        }

        let (statement, bindings) = self.build_query();
        let raw = self.service.execute(&statement, bindings).await?;
        let raw_len = raw.len();

        let mut rows = Vec::with_capacity(raw_len);
        for object in raw {
            match serde_json::from_value::<WorkOrder>(Value::Object(object)) {
                Ok(row) => rows.push(row),
                Err(e) => {
                    // A row without a usable identity or watermark cannot be
                    // keyed downstream; drop it here rather than stalling the
                    // stream.
                    self.skipped_rows += 1;
                    tracing::warn!(table = %self.table, error = %e, "Skipping undecodable source row");
                }
            }
        }

        if (raw_len as u32) < self.batch_size {
            self.done = true;
        } else if rows.is_empty() {
            // A full page with no decodable row cannot advance the boundary;
            // bail out instead of refetching the same page forever.
            return Err(WarehouseError::Decode(format!(
                "no decodable rows in a full page of {} from '{}'",
                raw_len, self.table
            )));
        }
        if let Some(last) = rows.last() {
            self.boundary = Some(last.boundary());
        }

        Ok(rows)
    }

    fn build_query(&self) -> (String, Vec<Value>) {
        let mut clauses: Vec<String> = Vec::new();
        let mut bindings: Vec<Value> = Vec::new();

        if let Some(boundary) = &self.boundary {
            clauses
                .push("(notified_at > ? OR (notified_at = ? AND notification_id > ?))".to_string());
            let w = boundary.watermark.to_rfc3339();
            bindings.push(json!(w));
            bindings.push(json!(w));
            bindings.push(json!(boundary.id));
        }
        if let Some(until) = self.until {
            clauses.push("notified_at <= ?".to_string());
            bindings.push(json!(until.to_rfc3339()));
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };

        let statement = format!(
            "SELECT {} FROM {}{} ORDER BY notified_at ASC, notification_id ASC LIMIT {}",
            COLUMNS, self.table, where_clause, self.batch_size
        );
        (statement, bindings)
    }

    /// Current boundary (the last row handed out)
    pub fn boundary(&self) -> Option<&Boundary> {
        self.boundary.as_ref()
    }

    /// Adjust the page size for subsequent fetches (adaptive batch sizing).
    pub fn set_batch_size(&mut self, batch_size: u32) {
        self.batch_size = batch_size.max(1);
    }

    pub fn skipped_rows(&self) -> u64 {
        self.skipped_rows
    }

    /// Release the stream; idempotent.
    pub fn close(&mut self) {
        if !self.done {
            tracing::trace!(table = %self.table, "Row stream closed before EOF");
        }
        self.done = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{Authenticator, WarehouseConfig};
    use chrono::TimeZone;

    fn test_service() -> WarehouseService {
        // Construction without connect(); only used to build queries.
        WarehouseService::new_unconnected_for_tests(WarehouseConfig {
            url: "http://localhost:9999".into(),
            user: "u".into(),
            password: Some("p".into()),
            token: None,
            authenticator: Authenticator::Password,
            warehouse: "WH".into(),
            database: "DB".into(),
            schema: "PUBLIC".into(),
            role: None,
            query_timeout_secs: 5,
        })
    }

    #[test]
    fn cold_start_query_has_no_boundary() {
        let service = test_service();
        let stream = RowStream::new(&service, "notification_text".into(), None, None, 500);
        let (sql, bindings) = stream.build_query();
        assert!(sql.contains("FROM notification_text"));
        assert!(!sql.contains("WHERE"));
        assert!(sql.contains("ORDER BY notified_at ASC, notification_id ASC"));
        assert!(sql.ends_with("LIMIT 500"));
        assert!(bindings.is_empty());
    }

    #[test]
    fn boundary_produces_keyset_predicate() {
        let service = test_service();
        let since = Boundary::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap(), "N-7");
        let stream = RowStream::new(
            &service,
            "notification_text".into(),
            Some(since),
            None,
            100,
        );
        let (sql, bindings) = stream.build_query();
        assert!(sql.contains("notified_at > ? OR (notified_at = ? AND notification_id > ?)"));
        assert_eq!(bindings.len(), 3);
        assert_eq!(bindings[2], serde_json::json!("N-7"));
    }

    #[test]
    fn range_bound_is_inclusive_upper() {
        let service = test_service();
        let until = Utc.timestamp_opt(1_700_086_400, 0).unwrap();
        let stream = RowStream::new(
            &service,
            "notification_text".into(),
            None,
            Some(until),
            100,
        );
        let (sql, bindings) = stream.build_query();
        assert!(sql.contains("notified_at <= ?"));
        assert_eq!(bindings.len(), 1);
    }

    #[test]
    fn close_is_idempotent() {
        let service = test_service();
        let mut stream = RowStream::new(&service, "notification_text".into(), None, None, 100);
        stream.close();
        stream.close();
    }
}
