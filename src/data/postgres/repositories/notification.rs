//! Work-order repository
//!
//! Idempotent batch upsert keyed on `notification_id`. On conflict every
//! non-identity column is replaced from the incoming row and `updated_at`
//! moves to the transaction time, so re-applying a batch is a no-op apart
//! from the monotonic `updated_at`.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;

use crate::data::postgres::SinkError;
use crate::data::types::{UpsertResult, WorkOrder};

/// Upsert a batch of work orders inside the caller's transaction.
///
/// Uses a single multi-row `UNNEST` statement; `xmax = 0` on the returned
/// rows distinguishes inserts from updates.
pub async fn upsert_work_orders(
    conn: &mut PgConnection,
    rows: &[WorkOrder],
) -> Result<UpsertResult, SinkError> {
    if rows.is_empty() {
        return Ok(UpsertResult::default());
    }

    let mut ids: Vec<String> = Vec::with_capacity(rows.len());
    let mut notified: Vec<DateTime<Utc>> = Vec::with_capacity(rows.len());
    let mut assigned: Vec<Option<DateTime<Utc>>> = Vec::with_capacity(rows.len());
    let mut closed: Vec<Option<DateTime<Utc>>> = Vec::with_capacity(rows.len());
    let mut category: Vec<Option<String>> = Vec::with_capacity(rows.len());
    let mut country: Vec<Option<String>> = Vec::with_capacity(rows.len());
    let mut eq_id: Vec<Option<String>> = Vec::with_capacity(rows.len());
    let mut fl_id: Vec<Option<String>> = Vec::with_capacity(rows.len());
    let mut mat_id: Vec<Option<String>> = Vec::with_capacity(rows.len());
    let mut serial_id: Vec<Option<String>> = Vec::with_capacity(rows.len());
    let mut trend_l1: Vec<Option<String>> = Vec::with_capacity(rows.len());
    let mut trend_l2: Vec<Option<String>> = Vec::with_capacity(rows.len());
    let mut trend_l3: Vec<Option<String>> = Vec::with_capacity(rows.len());
    let mut issue_type: Vec<Option<String>> = Vec::with_capacity(rows.len());
    let mut medium_text: Vec<Option<String>> = Vec::with_capacity(rows.len());
    let mut long_text: Vec<Option<String>> = Vec::with_capacity(rows.len());

    for row in rows {
        ids.push(row.notification_id.clone());
        notified.push(row.notified_at);
        assigned.push(row.assigned_at);
        closed.push(row.closed_at);
        category.push(row.category.clone());
        country.push(row.country.clone());
        eq_id.push(row.eq_id.clone());
        fl_id.push(row.fl_id.clone());
        mat_id.push(row.mat_id.clone());
        serial_id.push(row.serial_id.clone());
        trend_l1.push(row.trend_l1.clone());
        trend_l2.push(row.trend_l2.clone());
        trend_l3.push(row.trend_l3.clone());
        issue_type.push(row.issue_type.clone());
        medium_text.push(row.medium_text.clone());
        long_text.push(row.long_text.clone());
    }

    let outcomes: Vec<(bool,)> = sqlx::query_as(
        r#"
        INSERT INTO notification_text (
            notification_id, notified_at, assigned_at, closed_at, category, country,
            eq_id, fl_id, mat_id, serial_id, trend_l1, trend_l2, trend_l3, issue_type,
            medium_text, long_text
        )
        SELECT * FROM UNNEST(
            $1::text[], $2::timestamptz[], $3::timestamptz[], $4::timestamptz[],
            $5::text[], $6::text[], $7::text[], $8::text[], $9::text[], $10::text[],
            $11::text[], $12::text[], $13::text[], $14::text[], $15::text[], $16::text[]
        )
        ON CONFLICT (notification_id) DO UPDATE SET
            notified_at = EXCLUDED.notified_at,
            assigned_at = EXCLUDED.assigned_at,
            closed_at = EXCLUDED.closed_at,
            category = EXCLUDED.category,
            country = EXCLUDED.country,
            eq_id = EXCLUDED.eq_id,
            fl_id = EXCLUDED.fl_id,
            mat_id = EXCLUDED.mat_id,
            serial_id = EXCLUDED.serial_id,
            trend_l1 = EXCLUDED.trend_l1,
            trend_l2 = EXCLUDED.trend_l2,
            trend_l3 = EXCLUDED.trend_l3,
            issue_type = EXCLUDED.issue_type,
            medium_text = EXCLUDED.medium_text,
            long_text = EXCLUDED.long_text,
            updated_at = now()
        RETURNING (xmax = 0)
        "#,
    )
    .bind(&ids)
    .bind(&notified)
    .bind(&assigned)
    .bind(&closed)
    .bind(&category)
    .bind(&country)
    .bind(&eq_id)
    .bind(&fl_id)
    .bind(&mat_id)
    .bind(&serial_id)
    .bind(&trend_l1)
    .bind(&trend_l2)
    .bind(&trend_l3)
    .bind(&issue_type)
    .bind(&medium_text)
    .bind(&long_text)
    .fetch_all(&mut *conn)
    .await?;

    let inserted = outcomes.iter().filter(|(fresh,)| *fresh).count() as u64;
    let updated = outcomes.len() as u64 - inserted;

    Ok(UpsertResult {
        inserted,
        updated,
        quarantined: 0,
    })
}
