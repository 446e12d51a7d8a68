//! Dead-letter repository
//!
//! Quarantined rows keep their original source identifier, the sink error
//! code and the full payload, so a future replay tool has everything it
//! needs.

use sqlx::PgPool;

use crate::data::postgres::SinkError;
use crate::data::types::WorkOrder;

/// Quarantine a single poison row.
pub async fn quarantine_row(
    pool: &PgPool,
    table: &str,
    row: &WorkOrder,
    error_code: Option<&str>,
    error_message: &str,
) -> Result<(), SinkError> {
    let payload = serde_json::to_value(row)
        .map_err(|e| SinkError::Database(format!("dead-letter payload encode: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO dead_letter (table_name, source_id, error_code, error_message, payload)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(table)
    .bind(&row.notification_id)
    .bind(error_code)
    .bind(error_message)
    .bind(payload)
    .execute(pool)
    .await?;

    tracing::warn!(
        table = %table,
        source_id = %row.notification_id,
        error_code = ?error_code,
        "Row quarantined to dead letter"
    );
    Ok(())
}

/// Count quarantined rows for a table (reporting).
pub async fn count_for_table(pool: &PgPool, table: &str) -> Result<i64, SinkError> {
    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM dead_letter WHERE table_name = $1")
            .bind(table)
            .fetch_one(pool)
            .await?;
    Ok(count)
}
