//! ETL metadata store: watermarks, run leases and checkpoints
//!
//! One row per managed table is the single source of recovery truth. A run
//! claims a table by taking a session advisory lock keyed on the table name
//! over a dedicated connection; the `RunLease` owns that connection for the
//! run's lifetime. If a lease is dropped without an explicit release the
//! connection is detached and closed so the server frees the lock; it must
//! never travel back into the pool still holding it.

use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use crate::data::postgres::SinkError;
use crate::data::types::{Boundary, CheckpointData, EtlMetadata, SyncStatus};
use crate::data::warehouse::validate_identifier;

type MetadataRow = (
    String,
    Option<DateTime<Utc>>,
    i64,
    String,
    Option<String>,
    Option<serde_json::Value>,
    Option<DateTime<Utc>>,
    Option<i32>,
    Option<i64>,
    Option<i64>,
);

/// Watermark / metadata store over the sink pool.
pub struct MetadataStore {
    pool: PgPool,
    table: String,
}

/// Exclusive claim on a table's metadata row for the duration of a run.
pub struct RunLease {
    conn: Option<PoolConnection<Postgres>>,
    pub table_name: String,
    pub metadata: EtlMetadata,
    pub run_id: Uuid,
    store_table: String,
    released: bool,
}

impl MetadataStore {
    /// `table` is the metadata table name (configurable, default
    /// `etl_metadata`).
    pub fn new(pool: PgPool, table: &str) -> Result<Self, SinkError> {
        validate_identifier(table)
            .map_err(|_| SinkError::Config(format!("invalid watermark table name '{}'", table)))?;
        Ok(Self {
            pool,
            table: table.to_string(),
        })
    }

    /// Read the current metadata row, creating it as `pending` when absent.
    pub async fn read(&self, table_name: &str) -> Result<EtlMetadata, SinkError> {
        sqlx::query(&format!(
            "INSERT INTO {} (table_name, status) VALUES ($1, 'pending') ON CONFLICT (table_name) DO NOTHING",
            self.table
        ))
        .bind(table_name)
        .execute(&self.pool)
        .await?;

        let row: MetadataRow = sqlx::query_as(&format!(
            "SELECT table_name, last_watermark, rows_processed, status, error_message, \
             checkpoint_blob, checkpoint_at, batch_size, total_records, processed_records \
             FROM {} WHERE table_name = $1",
            self.table
        ))
        .bind(table_name)
        .fetch_one(&self.pool)
        .await?;

        decode_row(row)
    }

    /// Begin a run: acquire the advisory lock and mark the row in progress.
    pub async fn begin_run(&self, table_name: &str) -> Result<RunLease, SinkError> {
        let mut conn = self.pool.acquire().await?;

        let (locked,): (bool,) =
            sqlx::query_as("SELECT pg_try_advisory_lock(hashtext($1)::bigint)")
                .bind(table_name)
                .fetch_one(&mut *conn)
                .await?;
        if !locked {
            return Err(SinkError::LeaseConflict(format!(
                "table '{}' is owned by another run",
                table_name
            )));
        }

        // Any failure past this point must not return the connection to the
        // pool still holding the lock; detaching closes the session and the
        // server frees it.
        let metadata = match Self::mark_in_progress(&self.table, table_name, &mut conn).await {
            Ok(metadata) => metadata,
            Err(e) => {
                drop(conn.detach());
                return Err(e);
            }
        };
        let run_id = Uuid::new_v4();
        tracing::debug!(
            table = %table_name,
            %run_id,
            watermark = ?metadata.last_watermark,
            "Run lease acquired"
        );

        Ok(RunLease {
            conn: Some(conn),
            table_name: table_name.to_string(),
            metadata,
            run_id,
            store_table: self.table.clone(),
            released: false,
        })
    }

    /// Create-if-absent and flip the row to in-progress on the lock-holding
    /// connection.
    async fn mark_in_progress(
        store_table: &str,
        table_name: &str,
        conn: &mut PoolConnection<Postgres>,
    ) -> Result<EtlMetadata, SinkError> {
        sqlx::query(&format!(
            "INSERT INTO {} (table_name, status) VALUES ($1, 'pending') ON CONFLICT (table_name) DO NOTHING",
            store_table
        ))
        .bind(table_name)
        .execute(&mut **conn)
        .await?;

        let row: MetadataRow = sqlx::query_as(&format!(
            "UPDATE {} SET status = 'in_progress', error_message = NULL, updated_at = now() \
             WHERE table_name = $1 \
             RETURNING table_name, last_watermark, rows_processed, status, error_message, \
             checkpoint_blob, checkpoint_at, batch_size, total_records, processed_records",
            store_table
        ))
        .bind(table_name)
        .fetch_one(&mut **conn)
        .await?;

        decode_row(row)
    }
}

impl RunLease {
    fn conn(&mut self) -> Result<&mut PoolConnection<Postgres>, SinkError> {
        self.conn
            .as_mut()
            .ok_or_else(|| SinkError::Database("lease connection already released".into()))
    }

    /// Persist incremental progress without ending the run.
    ///
    /// The committed watermark only ever moves forward; a checkpoint carrying
    /// an older boundary cannot rewind it.
    pub async fn checkpoint(
        &mut self,
        boundary: Option<&Boundary>,
        processed_delta: i64,
        checkpoint: &CheckpointData,
    ) -> Result<(), SinkError> {
        let table = self.store_table.clone();
        let table_name = self.table_name.clone();
        let blob = serde_json::to_value(checkpoint)
            .map_err(|e| SinkError::Database(format!("checkpoint encode: {}", e)))?;
        let watermark = boundary.map(|b| b.watermark);
        let batch_size = checkpoint.batch_size_in_effect.map(|b| b as i32);

        sqlx::query(&format!(
            "UPDATE {} SET \
             last_watermark = GREATEST(COALESCE(last_watermark, '-infinity'::timestamptz), COALESCE($2, '-infinity'::timestamptz)), \
             rows_processed = rows_processed + $3, \
             processed_records = COALESCE(processed_records, 0) + $3, \
             checkpoint_blob = $4, \
             checkpoint_at = now(), \
             batch_size = COALESCE($5, batch_size), \
             updated_at = now() \
             WHERE table_name = $1",
            table
        ))
        .bind(&table_name)
        .bind(watermark)
        .bind(processed_delta)
        .bind(blob)
        .bind(batch_size)
        .execute(&mut **self.conn()?)
        .await?;

        tracing::trace!(
            table = %table_name,
            boundary = ?boundary.map(|b| b.to_string()),
            processed_delta,
            "Checkpoint persisted"
        );
        Ok(())
    }

    /// Record the total row count for progress/ETA reporting.
    pub async fn set_total_records(&mut self, total: i64) -> Result<(), SinkError> {
        let table = self.store_table.clone();
        let table_name = self.table_name.clone();
        sqlx::query(&format!(
            "UPDATE {} SET total_records = $2, processed_records = COALESCE(processed_records, 0), updated_at = now() WHERE table_name = $1",
            table
        ))
        .bind(&table_name)
        .bind(total)
        .execute(&mut **self.conn()?)
        .await?;
        Ok(())
    }

    /// Complete the run and release the lease.
    pub async fn commit_run(
        mut self,
        final_boundary: Option<&Boundary>,
        processed_delta: i64,
    ) -> Result<(), SinkError> {
        let table = self.store_table.clone();
        let table_name = self.table_name.clone();
        let watermark = final_boundary.map(|b| b.watermark);

        sqlx::query(&format!(
            "UPDATE {} SET \
             status = 'completed', \
             last_watermark = GREATEST(COALESCE(last_watermark, '-infinity'::timestamptz), COALESCE($2, '-infinity'::timestamptz)), \
             rows_processed = rows_processed + $3, \
             error_message = NULL, \
             updated_at = now() \
             WHERE table_name = $1",
            table
        ))
        .bind(&table_name)
        .bind(watermark)
        .bind(processed_delta)
        .execute(&mut **self.conn()?)
        .await?;

        let run_id = self.run_id;
        self.release().await;
        tracing::debug!(table = %table_name, %run_id, boundary = ?final_boundary.map(|b| b.to_string()), "Run committed");
        Ok(())
    }

    /// Fail the run, record the error and release the lease. The committed
    /// watermark is left untouched.
    pub async fn abort_run(mut self, error: &str) -> Result<(), SinkError> {
        let table = self.store_table.clone();
        let table_name = self.table_name.clone();

        sqlx::query(&format!(
            "UPDATE {} SET status = 'failed', error_message = $2, updated_at = now() WHERE table_name = $1",
            table
        ))
        .bind(&table_name)
        .bind(error)
        .execute(&mut **self.conn()?)
        .await?;

        self.release().await;
        tracing::warn!(table = %table_name, %error, "Run aborted");
        Ok(())
    }

    /// Unlock and hand the connection back to the pool.
    async fn release(&mut self) {
        if self.released {
            return;
        }
        if let Some(mut conn) = self.conn.take() {
            let unlock = sqlx::query("SELECT pg_advisory_unlock(hashtext($1)::bigint)")
                .bind(&self.table_name)
                .execute(&mut *conn)
                .await;
            match unlock {
                Ok(_) => {
                    // Clean unlock: the connection may be reused.
                    drop(conn);
                }
                Err(e) => {
                    tracing::warn!(table = %self.table_name, error = %e, "Advisory unlock failed, closing connection");
                    drop(conn.detach());
                }
            }
        }
        self.released = true;
    }
}

impl Drop for RunLease {
    fn drop(&mut self) {
        if !self.released
            && let Some(conn) = self.conn.take()
        {
            // Unclean drop: close the session so the server frees the lock.
            tracing::debug!(table = %self.table_name, "Lease dropped without release, detaching connection");
            drop(conn.detach());
        }
    }
}

fn decode_row(row: MetadataRow) -> Result<EtlMetadata, SinkError> {
    let (
        table_name,
        last_watermark,
        rows_processed,
        status,
        error_message,
        checkpoint_blob,
        checkpoint_at,
        batch_size,
        total_records,
        processed_records,
    ) = row;

    let status = SyncStatus::parse(&status)
        .ok_or_else(|| SinkError::Database(format!("unknown sync status '{}'", status)))?;
    let checkpoint = checkpoint_blob
        .map(serde_json::from_value::<CheckpointData>)
        .transpose()
        .map_err(|e| SinkError::Database(format!("checkpoint decode: {}", e)))?;

    Ok(EtlMetadata {
        table_name,
        last_watermark,
        rows_processed,
        status,
        error_message,
        checkpoint,
        checkpoint_at,
        batch_size,
        total_records,
        processed_records,
    })
}

#[cfg(test)]
mod tests {
    // Lease acquisition and watermark advancement require a running
    // PostgreSQL instance; covered by integration tests. The checkpoint
    // payload codec is covered in `data::types`.
}
