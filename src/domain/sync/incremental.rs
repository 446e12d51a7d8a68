//! Incremental sync orchestrator
//!
//! Per-table loop: lease the metadata row, resume from the committed
//! `(watermark, identity)` boundary, stream batches in total order, enrich,
//! upsert transactionally, checkpoint, commit. One writer per table (the
//! advisory lock enforces it), which keeps watermark advance monotone.
//!
//! Watermark edge cases:
//! - Rows sharing a watermark can straddle batches; the checkpoint carries
//!   the max identity at the watermark so the next run filters
//!   `(w, id) > (since_w, since_id)` and nothing is read twice or skipped.
//! - Rows at or below the stored boundary are dropped defensively (source
//!   clock skew).
//! - An empty run commits with the watermark unchanged.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;

use super::SyncError;
use crate::ai::EnrichmentService;
use crate::data::WarehouseService;
use crate::data::error::Classify;
use crate::data::postgres::repositories::{EmbeddingStore, MetadataStore};
use crate::data::postgres::writer::SinkWriter;
use crate::data::types::{SyncStatus, WorkOrder};
use crate::domain::progress::{Alert, ProgressReporter};
use crate::utils::retry::RetryPolicy;

/// Outcome of one table's run, feeding the CLI summary line.
#[derive(Debug)]
pub struct TableRunSummary {
    pub table: String,
    pub status: SyncStatus,
    pub rows: u64,
    pub quarantined: u64,
    pub duration: Duration,
    pub error: Option<String>,
}

pub struct IncrementalSync {
    warehouse: Arc<WarehouseService>,
    writer: SinkWriter,
    metadata: MetadataStore,
    embeddings: Arc<dyn EmbeddingStore>,
    enrichment: Option<Arc<EnrichmentService>>,
    progress: Arc<ProgressReporter>,
    retry_policy: RetryPolicy,
    shutdown: watch::Receiver<bool>,
    dry_run: bool,
}

impl IncrementalSync {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        warehouse: Arc<WarehouseService>,
        writer: SinkWriter,
        metadata: MetadataStore,
        embeddings: Arc<dyn EmbeddingStore>,
        enrichment: Option<Arc<EnrichmentService>>,
        progress: Arc<ProgressReporter>,
        retry_policy: RetryPolicy,
        shutdown: watch::Receiver<bool>,
        dry_run: bool,
    ) -> Self {
        Self {
            warehouse,
            writer,
            metadata,
            embeddings,
            enrichment,
            progress,
            retry_policy,
            shutdown,
            dry_run,
        }
    }

    /// Sync every requested table sequentially; tables are independent and a
    /// failure in one never stops the others.
    pub async fn run(&self, tables: &[String], batch_size: u32) -> Vec<TableRunSummary> {
        let mut summaries = Vec::with_capacity(tables.len());
        for table in tables {
            if *self.shutdown.borrow() {
                tracing::info!(table = %table, "Skipping table, shutdown in progress");
                break;
            }
            let summary = self.run_table(table, batch_size).await;
            tracing::info!(
                table = %summary.table,
                status = %summary.status,
                rows = summary.rows,
                duration_secs = summary.duration.as_secs(),
                "Table run finished"
            );
            summaries.push(summary);
        }
        summaries
    }

    async fn run_table(&self, table: &str, batch_size: u32) -> TableRunSummary {
        let started = Instant::now();
        match self.sync_table(table, batch_size).await {
            Ok((rows, quarantined)) => TableRunSummary {
                table: table.to_string(),
                status: SyncStatus::Completed,
                rows,
                quarantined,
                duration: started.elapsed(),
                error: None,
            },
            Err(e) => TableRunSummary {
                table: table.to_string(),
                status: SyncStatus::Failed,
                rows: 0,
                quarantined: 0,
                duration: started.elapsed(),
                error: Some(e.to_string()),
            },
        }
    }

    async fn sync_table(&self, table: &str, batch_size: u32) -> Result<(u64, u64), SyncError> {
        tracing::info!(table = %table, batch_size, dry_run = self.dry_run, "Starting incremental sync");

        let mut lease = match self.metadata.begin_run(table).await {
            Ok(lease) => lease,
            Err(e) => {
                tracing::warn!(table = %table, error = %e, "Could not lease table");
                return Err(e.into());
            }
        };

        let since = lease.metadata.resume_boundary();
        tracing::debug!(table = %table, since = ?since.as_ref().map(|b| b.to_string()), "Resume boundary");

        let mut stream = match self
            .warehouse
            .open_stream(table, since.clone(), None, batch_size)
        {
            Ok(stream) => stream,
            Err(e) => {
                let _ = lease.abort_run(&e.to_string()).await;
                return Err(e.into());
            }
        };

        let mut shutdown = self.shutdown.clone();
        let mut total_rows = 0u64;
        let mut total_quarantined = 0u64;
        let mut last_boundary = since.clone();

        let result: Result<(), SyncError> = loop {
            if *shutdown.borrow_and_update() {
                stream.close();
                break Err(SyncError::Cancelled);
            }

            let batch = match super::fetch_batch_with_retry(&mut stream, self.retry_policy).await {
                Ok(batch) => batch,
                Err(e) => break Err(e.into()),
            };
            if batch.is_empty() {
                break Ok(());
            }

            // Defensive clock-skew filter: nothing at or below the stored
            // boundary gets written twice.
            let batch: Vec<WorkOrder> = match &since {
                Some(boundary) => batch
                    .into_iter()
                    .filter(|row| row.boundary() > *boundary)
                    .collect(),
                None => batch,
            };
            if batch.is_empty() {
                continue;
            }

            self.progress.record_extracted(batch.len() as u64);
            let batch_boundary = batch
                .last()
                .map(|row| row.boundary())
                .expect("non-empty batch");

            match self.process_batch(table, &batch).await {
                Ok(quarantined) => {
                    total_rows += batch.len() as u64 - quarantined;
                    total_quarantined += quarantined;
                    self.progress.record_outcome(true);
                }
                Err(e) => {
                    self.progress.record_outcome(false);
                    self.progress.check_error_rate().await;
                    break Err(e);
                }
            }

            if !self.dry_run {
                let mut checkpoint =
                    crate::data::types::CheckpointData::from_boundary(&batch_boundary);
                checkpoint.batch_size_in_effect = Some(batch_size);
                if let Err(e) = lease
                    .checkpoint(Some(&batch_boundary), batch.len() as i64, &checkpoint)
                    .await
                {
                    break Err(e.into());
                }
            }
            last_boundary = Some(batch_boundary);
            self.progress.log_progress(table);
            self.progress.check_error_rate().await;
        };

        match result {
            Ok(()) => {
                if self.dry_run {
                    // No checkpoints were written; status flips to completed
                    // with the watermark untouched.
                    lease.commit_run(None, 0).await?;
                } else {
                    // Counters were added per checkpoint; the commit only
                    // flips status and re-asserts the final boundary.
                    lease.commit_run(last_boundary.as_ref(), 0).await?;
                }
                tracing::info!(
                    table = %table,
                    rows = total_rows,
                    quarantined = total_quarantined,
                    skipped_source_rows = stream.skipped_rows(),
                    "Incremental sync completed"
                );
                Ok((total_rows, total_quarantined))
            }
            Err(e) => {
                if e.kind() == crate::data::error::ErrorKind::CircuitOpen {
                    self.progress
                        .alert(Alert::CircuitOpen {
                            dependency: "ai_endpoint",
                        })
                        .await;
                }
                let _ = lease.abort_run(&e.to_string()).await;
                Err(e)
            }
        }
    }

    /// Enrich and persist one batch. Returns the quarantined-row count.
    async fn process_batch(&self, table: &str, batch: &[WorkOrder]) -> Result<u64, SyncError> {
        let enrichment_outcome = match &self.enrichment {
            Some(service) if !self.dry_run => Some(service.enrich_rows(batch).await),
            _ => None,
        };

        if self.dry_run {
            tracing::info!(table = %table, rows = batch.len(), "Dry run: batch skipped");
            return Ok(0);
        }

        let extractions = enrichment_outcome
            .as_ref()
            .map(|o| o.extractions.as_slice())
            .unwrap_or(&[]);

        let result = self.writer.upsert_batch(table, batch, extractions).await?;
        self.progress.record_upserted(result.written());
        self.progress.record_quarantined(result.quarantined);

        if let Some(outcome) = &enrichment_outcome {
            if !outcome.embeddings.is_empty() {
                self.embeddings.put_batch(&outcome.embeddings).await?;
            }
            if outcome.skipped > 0 || outcome.failures > 0 || outcome.degraded > 0 {
                tracing::debug!(
                    table = %table,
                    skipped = outcome.skipped,
                    failures = outcome.failures,
                    degraded = outcome.degraded,
                    "Enrichment gaps in batch"
                );
            }
            // Budget alert surfaces through the reporter exactly once.
            if let Some(service) = &self.enrichment
                && service.cost().take_alert()
            {
                let snapshot = service.cost().snapshot();
                self.progress
                    .alert(Alert::CostThreshold {
                        cost_usd: snapshot.cost_usd,
                        threshold_usd: service.cost_alert_usd(),
                    })
                    .await;
            }
        }

        Ok(result.quarantined)
    }
}
