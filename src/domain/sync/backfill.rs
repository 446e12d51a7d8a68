//! Historical backfill orchestrator
//!
//! Partitions a date range into record-count batches through the same keyset
//! stream the incremental path uses, fans the batches out to a bounded
//! worker pool, and serializes checkpoint writes through a single task so
//! the persisted boundary stays monotonic under concurrency.
//!
//! ```text
//!  producer ──► bounded channel (2 × workers) ──► worker pool ──► sink
//!                                                   │
//!                                                   └─► checkpoint task ──► etl_metadata
//! ```
//!
//! The backfill never advances `last_watermark` (that belongs to the
//! incremental path); its progress lives entirely in the checkpoint blob,
//! which `--resume` reads to continue from the highest committed
//! `(watermark, identity)`. Idempotent upserts make overlap harmless.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, mpsc, watch};

use super::memory::MemoryOptimizer;
use super::{SyncError, fetch_batch_with_retry};
use crate::ai::EnrichmentService;
use crate::core::config::{BackfillConfig, EtlConfig};
use crate::core::constants::MIN_BACKFILL_BATCH_SIZE;
use crate::data::WarehouseService;
use crate::data::postgres::repositories::{EmbeddingStore, MetadataStore, RunLease};
use crate::data::postgres::writer::SinkWriter;
use crate::data::types::{Boundary, CheckpointData, FailedRange, SyncStatus, WorkOrder};
use crate::domain::progress::ProgressReporter;
use crate::utils::retry::RetryPolicy;

pub struct BackfillParams {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub resume: bool,
    pub max_workers: Option<usize>,
    pub max_records: Option<u64>,
    pub dry_run: bool,
    pub verbose: bool,
}

#[derive(Debug)]
pub struct BackfillSummary {
    pub table: String,
    pub status: SyncStatus,
    pub total_records: u64,
    pub processed: u64,
    pub quarantined: u64,
    pub failed_ranges: usize,
    pub duration: Duration,
    pub error: Option<String>,
}

/// Message to the checkpoint task; a single consumer keeps the persisted
/// boundary monotonic.
enum CheckpointMsg {
    Completed { boundary: Boundary, rows: u64, quarantined: u64 },
    Failed(FailedRange),
}

/// Everything a worker needs, cloned per task.
#[derive(Clone)]
struct WorkerContext {
    writer: Arc<SinkWriter>,
    embeddings: Arc<dyn EmbeddingStore>,
    enrichment: Option<Arc<EnrichmentService>>,
    progress: Arc<ProgressReporter>,
    table: String,
    dry_run: bool,
    verbose: bool,
}

pub struct BackfillOrchestrator {
    warehouse: Arc<WarehouseService>,
    writer: Arc<SinkWriter>,
    metadata: MetadataStore,
    embeddings: Arc<dyn EmbeddingStore>,
    enrichment: Option<Arc<EnrichmentService>>,
    progress: Arc<ProgressReporter>,
    etl: EtlConfig,
    backfill: BackfillConfig,
    retry_policy: RetryPolicy,
    shutdown: watch::Receiver<bool>,
}

impl BackfillOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        warehouse: Arc<WarehouseService>,
        writer: Arc<SinkWriter>,
        metadata: MetadataStore,
        embeddings: Arc<dyn EmbeddingStore>,
        enrichment: Option<Arc<EnrichmentService>>,
        progress: Arc<ProgressReporter>,
        etl: EtlConfig,
        backfill: BackfillConfig,
        retry_policy: RetryPolicy,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            warehouse,
            writer,
            metadata,
            embeddings,
            enrichment,
            progress,
            etl,
            backfill,
            retry_policy,
            shutdown,
        }
    }

    pub async fn run(
        &self,
        table: &str,
        params: BackfillParams,
    ) -> Result<BackfillSummary, SyncError> {
        if params.start > params.end {
            return Err(SyncError::InvalidArguments(format!(
                "start date {} is after end date {}",
                params.start, params.end
            )));
        }
        let started = Instant::now();

        let mut lease = self.metadata.begin_run(table).await?;

        let total = match self
            .warehouse
            .count_range(table, params.start, params.end)
            .await
        {
            Ok(total) => total,
            Err(e) => {
                let _ = lease.abort_run(&e.to_string()).await;
                return Err(e.into());
            }
        };
        if !params.dry_run {
            lease.set_total_records(total as i64).await?;
        }
        self.progress.set_total_records(params.max_records.map_or(total, |m| total.min(m)));

        // Range start boundary: identities are non-empty, so an empty id at
        // the start watermark admits every row at that instant.
        let range_start = Boundary::new(params.start, String::new());
        let mut since = range_start.clone();
        let mut checkpoint = CheckpointData {
            batch_size_in_effect: Some(self.etl.batch_size),
            ..Default::default()
        };
        if params.resume
            && let Some(cp) = &lease.metadata.checkpoint
        {
            checkpoint.failed_ranges = cp.failed_ranges.clone();
            if let (Some(w), Some(id)) = (cp.last_watermark, cp.last_id.clone()) {
                let committed = Boundary::new(w, id);
                if committed > since {
                    tracing::info!(
                        table = %table,
                        boundary = %committed,
                        "Resuming backfill from committed checkpoint"
                    );
                    since = committed;
                }
            }
        }

        let workers = if self.backfill.enable_parallel {
            params
                .max_workers
                .unwrap_or(self.backfill.max_workers)
                .max(1)
        } else {
            1
        };
        tracing::info!(
            table = %table,
            start = %params.start,
            end = %params.end,
            total_records = total,
            workers,
            dry_run = params.dry_run,
            "Starting backfill"
        );

        // Backpressure: producers stall once 2 × workers batches are queued.
        let (batch_tx, batch_rx) = mpsc::channel::<Vec<WorkOrder>>(workers * 2);
        let batch_rx = Arc::new(Mutex::new(batch_rx));
        let (ckpt_tx, ckpt_rx) = mpsc::channel::<CheckpointMsg>(workers * 2);

        let checkpoint_handle = tokio::spawn(checkpoint_loop(
            lease,
            ckpt_rx,
            checkpoint,
            params.dry_run,
        ));

        let context = WorkerContext {
            writer: Arc::clone(&self.writer),
            embeddings: Arc::clone(&self.embeddings),
            enrichment: self.enrichment.clone(),
            progress: Arc::clone(&self.progress),
            table: table.to_string(),
            dry_run: params.dry_run,
            verbose: params.verbose,
        };
        let mut worker_handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            worker_handles.push(tokio::spawn(worker_loop(
                worker_id,
                context.clone(),
                Arc::clone(&batch_rx),
                ckpt_tx.clone(),
            )));
        }
        drop(ckpt_tx);

        // Producer: stream batches in total order with adaptive sizing.
        let produce_result = self
            .produce(table, since, params.end, params.max_records, batch_tx)
            .await;
        let cancelled = *self.shutdown.borrow();

        let mut processed = 0u64;
        let mut quarantined = 0u64;
        let mut worker_failures = 0u64;
        for handle in worker_handles {
            match handle.await {
                Ok(stats) => {
                    processed += stats.processed;
                    quarantined += stats.quarantined;
                    worker_failures += stats.failed_batches;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Backfill worker panicked");
                    worker_failures += 1;
                }
            }
        }

        let (lease, final_checkpoint) = checkpoint_handle
            .await
            .map_err(|e| SyncError::Internal(format!("checkpoint task failed: {}", e)))?;

        let failed_ranges = final_checkpoint.failed_ranges.len();
        let duration = started.elapsed();

        if params.dry_run {
            lease.commit_run(None, 0).await?;
            return Ok(BackfillSummary {
                table: table.to_string(),
                status: SyncStatus::Completed,
                total_records: total,
                processed,
                quarantined,
                failed_ranges,
                duration,
                error: None,
            });
        }

        if cancelled {
            lease.abort_run("cancelled by shutdown signal").await?;
            return Ok(BackfillSummary {
                table: table.to_string(),
                status: SyncStatus::Failed,
                total_records: total,
                processed,
                quarantined,
                failed_ranges,
                duration,
                error: Some("cancelled by shutdown signal".into()),
            });
        }
        if let Err(e) = produce_result {
            lease.abort_run(&e.to_string()).await?;
            return Err(e);
        }

        if failed_ranges > 0 || worker_failures > 0 {
            let error = format!(
                "{} batch range(s) exhausted retries; re-run with a narrowed range",
                failed_ranges.max(worker_failures as usize)
            );
            lease.abort_run(&error).await?;
            return Ok(BackfillSummary {
                table: table.to_string(),
                status: SyncStatus::Failed,
                total_records: total,
                processed,
                quarantined,
                failed_ranges,
                duration,
                error: Some(error),
            });
        }

        lease.commit_run(None, 0).await?;
        tracing::info!(
            table = %table,
            processed,
            quarantined,
            duration_secs = duration.as_secs(),
            "Backfill completed"
        );
        Ok(BackfillSummary {
            table: table.to_string(),
            status: SyncStatus::Completed,
            total_records: total,
            processed,
            quarantined,
            failed_ranges,
            duration,
            error: None,
        })
    }

    /// Stream batches into the worker channel until EOF, the record cap, a
    /// non-retryable source error, or shutdown.
    async fn produce(
        &self,
        table: &str,
        since: Boundary,
        until: DateTime<Utc>,
        max_records: Option<u64>,
        batch_tx: mpsc::Sender<Vec<WorkOrder>>,
    ) -> Result<(), SyncError> {
        let mut batch_size = self.etl.batch_size;
        let mut stream = self
            .warehouse
            .open_stream(table, Some(since), Some(until), batch_size)?;
        let mut optimizer = MemoryOptimizer::new(self.backfill.max_memory_mb);
        let mut shutdown = self.shutdown.clone();
        let mut produced = 0u64;

        loop {
            if *shutdown.borrow_and_update() {
                tracing::info!(table = %table, "Backfill producer stopping on shutdown");
                stream.close();
                return Ok(());
            }

            let mut batch = match fetch_batch_with_retry(&mut stream, self.retry_policy).await {
                Ok(batch) => batch,
                Err(e) => {
                    stream.close();
                    return Err(e.into());
                }
            };
            if batch.is_empty() {
                return Ok(());
            }

            if let Some(cap) = max_records {
                let remaining = cap.saturating_sub(produced);
                if remaining == 0 {
                    return Ok(());
                }
                if (batch.len() as u64) > remaining {
                    batch.truncate(remaining as usize);
                }
            }
            produced += batch.len() as u64;
            self.progress.record_extracted(batch.len() as u64);

            if batch_tx.send(batch).await.is_err() {
                // All workers are gone; nothing left to feed.
                return Ok(());
            }

            let next = optimizer.adjust(
                batch_size,
                MIN_BACKFILL_BATCH_SIZE,
                self.backfill.max_batch_size,
            );
            if next != batch_size {
                batch_size = next;
                stream.set_batch_size(next);
            }
        }
    }
}

// =============================================================================
// Worker and checkpoint tasks
// =============================================================================

#[derive(Default)]
struct WorkerStats {
    processed: u64,
    quarantined: u64,
    failed_batches: u64,
}

async fn worker_loop(
    worker_id: usize,
    context: WorkerContext,
    batch_rx: Arc<Mutex<mpsc::Receiver<Vec<WorkOrder>>>>,
    ckpt_tx: mpsc::Sender<CheckpointMsg>,
) -> WorkerStats {
    let mut stats = WorkerStats::default();

    loop {
        let batch = {
            let mut rx = batch_rx.lock().await;
            rx.recv().await
        };
        let Some(batch) = batch else { break };

        let from = batch.first().map(|r| r.boundary()).expect("non-empty batch");
        let boundary = batch.last().map(|r| r.boundary()).expect("non-empty batch");
        let rows = batch.len() as u64;

        match process_batch(&context, &batch).await {
            Ok(quarantined) => {
                stats.processed += rows - quarantined;
                stats.quarantined += quarantined;
                context.progress.record_outcome(true);
                if context.verbose {
                    tracing::info!(worker_id, rows, boundary = %boundary, "Batch committed");
                }
                let _ = ckpt_tx
                    .send(CheckpointMsg::Completed {
                        boundary,
                        rows,
                        quarantined,
                    })
                    .await;
            }
            Err(e) => {
                // The writer already retried transient failures; the range is
                // quarantined and the pool keeps going.
                stats.failed_batches += 1;
                context.progress.record_outcome(false);
                context.progress.check_error_rate().await;
                tracing::error!(worker_id, from = %from, to = %boundary, error = %e, "Batch failed, recording range");
                let _ = ckpt_tx
                    .send(CheckpointMsg::Failed(FailedRange {
                        from,
                        to: boundary,
                        error: e.to_string(),
                    }))
                    .await;
            }
        }
    }

    stats
}

/// Enrich and persist one batch (shared with the worker pool only; the
/// incremental path has its own copy with checkpoint interleaving).
async fn process_batch(context: &WorkerContext, batch: &[WorkOrder]) -> Result<u64, SyncError> {
    if context.dry_run {
        tracing::debug!(table = %context.table, rows = batch.len(), "Dry run: batch skipped");
        return Ok(0);
    }

    let enrichment_outcome = match &context.enrichment {
        Some(service) => Some(service.enrich_rows(batch).await),
        None => None,
    };
    let extractions = enrichment_outcome
        .as_ref()
        .map(|o| o.extractions.as_slice())
        .unwrap_or(&[]);

    let result = context
        .writer
        .upsert_batch(&context.table, batch, extractions)
        .await?;
    context.progress.record_upserted(result.written());
    context.progress.record_quarantined(result.quarantined);

    if let Some(outcome) = &enrichment_outcome
        && !outcome.embeddings.is_empty()
    {
        context.embeddings.put_batch(&outcome.embeddings).await?;
    }

    Ok(result.quarantined)
}

/// Single consumer of completion/failure messages; keeps the persisted
/// boundary monotonic and returns the lease for finalization.
async fn checkpoint_loop(
    mut lease: RunLease,
    mut rx: mpsc::Receiver<CheckpointMsg>,
    mut checkpoint: CheckpointData,
    dry_run: bool,
) -> (RunLease, CheckpointData) {
    while let Some(msg) = rx.recv().await {
        match msg {
            CheckpointMsg::Completed {
                boundary,
                rows,
                quarantined,
            } => {
                let current = match (checkpoint.last_watermark, &checkpoint.last_id) {
                    (Some(w), Some(id)) => Some(Boundary::new(w, id.clone())),
                    _ => None,
                };
                // Workers finish out of order; only a higher boundary moves
                // the blob forward.
                if current.is_none_or(|c| boundary > c) {
                    checkpoint.last_watermark = Some(boundary.watermark);
                    checkpoint.last_id = Some(boundary.id.clone());
                }
                if !dry_run
                    && let Err(e) = lease
                        .checkpoint(None, (rows - quarantined) as i64, &checkpoint)
                        .await
                {
                    tracing::warn!(error = %e, "Checkpoint persist failed; progress will be replayed on resume");
                }
            }
            CheckpointMsg::Failed(range) => {
                checkpoint.failed_ranges.push(range);
                if !dry_run
                    && let Err(e) = lease.checkpoint(None, 0, &checkpoint).await
                {
                    tracing::warn!(error = %e, "Failed-range checkpoint persist failed");
                }
            }
        }
    }
    (lease, checkpoint)
}
