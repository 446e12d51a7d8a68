//! Sync orchestration
//!
//! `incremental` runs the watermark-driven per-table loop; `backfill` runs
//! the partitioned historical pipeline over a worker pool. Both drive the
//! same extract → scrub/enrich → upsert → checkpoint stages.

pub mod backfill;
pub mod incremental;
pub mod memory;

use thiserror::Error;

use crate::ai::AiError;
use crate::data::error::{Classify, ErrorKind};
use crate::data::postgres::SinkError;
use crate::data::types::WorkOrder;
use crate::data::warehouse::{RowStream, WarehouseError};
use crate::utils::retry::RetryPolicy;

/// Run-level error for the orchestrators.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Ai(#[from] AiError),

    #[error("run cancelled by shutdown signal")]
    Cancelled,

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Classify for SyncError {
    fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Warehouse(e) => e.kind(),
            SyncError::Sink(e) => e.kind(),
            SyncError::Ai(e) => e.kind(),
            SyncError::Cancelled => ErrorKind::Persistent,
            SyncError::InvalidArguments(_) => ErrorKind::Persistent,
            SyncError::Internal(_) => ErrorKind::Persistent,
        }
    }
}

/// Fetch the next batch from a stream, retrying transient warehouse errors
/// with the run's backoff policy. A stream is exclusively owned, so the
/// retry loop is written out here instead of going through the generic
/// closure-based helper.
pub(crate) async fn fetch_batch_with_retry(
    stream: &mut RowStream<'_>,
    policy: RetryPolicy,
) -> Result<Vec<WorkOrder>, WarehouseError> {
    let mut attempt = 0u32;
    loop {
        match stream.fetch_batch().await {
            Ok(batch) => return Ok(batch),
            Err(e) if e.kind().is_retryable() && attempt < policy.max_retries => {
                attempt += 1;
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    error = %e,
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying warehouse fetch after transient error"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
