//! AI extraction repository
//!
//! Replace-by-version policy: at most one current extraction per work order
//! per model version; re-running an extraction with the same model version
//! overwrites the previous row.

use sqlx::PgConnection;

use crate::data::postgres::SinkError;
use crate::data::types::AiExtraction;

/// Upsert extraction rows inside the caller's transaction.
pub async fn upsert_extractions(
    conn: &mut PgConnection,
    rows: &[AiExtraction],
) -> Result<u64, SinkError> {
    let mut written = 0u64;

    for row in rows {
        let confidence = row.confidence.clamp(0.0, 1.0);

        sqlx::query(
            r#"
            INSERT INTO ai_extracted (
                notification_id, keywords, primary_symptom, root_cause, summary,
                solution, solution_type, components, processes, main_component,
                main_process, confidence, model_version, extracted_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11,
                    CAST($12::float8 AS numeric(5,4)), $13, $14)
            ON CONFLICT (notification_id, model_version) DO UPDATE SET
                keywords = EXCLUDED.keywords,
                primary_symptom = EXCLUDED.primary_symptom,
                root_cause = EXCLUDED.root_cause,
                summary = EXCLUDED.summary,
                solution = EXCLUDED.solution,
                solution_type = EXCLUDED.solution_type,
                components = EXCLUDED.components,
                processes = EXCLUDED.processes,
                main_component = EXCLUDED.main_component,
                main_process = EXCLUDED.main_process,
                confidence = EXCLUDED.confidence,
                extracted_at = EXCLUDED.extracted_at
            "#,
        )
        .bind(&row.notification_id)
        .bind(serde_json::json!(row.keywords))
        .bind(&row.primary_symptom)
        .bind(&row.root_cause)
        .bind(&row.summary)
        .bind(&row.solution)
        .bind(&row.solution_type)
        .bind(serde_json::json!(row.components))
        .bind(serde_json::json!(row.processes))
        .bind(&row.main_component)
        .bind(&row.main_process)
        .bind(confidence)
        .bind(&row.model_version)
        .bind(row.extracted_at)
        .execute(&mut *conn)
        .await?;

        written += 1;
    }

    Ok(written)
}
