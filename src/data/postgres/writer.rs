//! Sink writer: transactional batch upsert with poison-row containment
//!
//! A batch commits atomically or not at all. Transient failures retry the
//! whole batch with jittered backoff. Constraint failures mark the batch as
//! poison: it is bisected, the clean halves commit, and the offending single
//! rows land in the dead-letter log. A single bad row never blocks the
//! pipeline and a data error never escapes a batch.

use std::collections::HashSet;

use futures::FutureExt;
use futures::future::BoxFuture;
use sqlx::PgPool;

use super::repositories::{extraction, notification};
use super::{SinkError, repositories::dead_letter};
use crate::data::error::{Classify, ErrorKind};
use crate::data::types::{AiExtraction, UpsertResult, WorkOrder};
use crate::utils::retry::{RetryPolicy, retry};

/// Writes prepared batches into the sink.
pub struct SinkWriter {
    pool: PgPool,
    policy: RetryPolicy,
}

impl SinkWriter {
    pub fn new(pool: PgPool, policy: RetryPolicy) -> Self {
        Self { pool, policy }
    }

    /// Upsert a batch of work orders plus their extraction rows.
    ///
    /// Extractions ride the same transaction as their work orders so a batch
    /// is visible either fully enriched or not at all.
    pub async fn upsert_batch(
        &self,
        table: &str,
        rows: &[WorkOrder],
        extractions: &[AiExtraction],
    ) -> Result<UpsertResult, SinkError> {
        if table != "notification_text" {
            return Err(SinkError::Config(format!("unsupported sink table '{}'", table)));
        }
        if rows.is_empty() {
            return Ok(UpsertResult::default());
        }

        let attempt = |lo: usize, hi: usize| {
            async move {
                retry(self.policy, "sink_upsert", || {
                    self.try_upsert(&rows[lo..hi], extractions)
                })
                .await
            }
            .boxed()
        };
        let quarantine = |idx: usize, error: &SinkError| {
            let code = match error {
                SinkError::Constraint { code, .. } => code.clone(),
                _ => None,
            };
            let message = error.to_string();
            async move {
                dead_letter::quarantine_row(
                    &self.pool,
                    table,
                    &rows[idx],
                    code.as_deref(),
                    &message,
                )
                .await
            }
            .boxed()
        };

        bisect_upsert(rows.len(), attempt, quarantine).await
    }

    /// One transactional attempt over a slice of the batch.
    async fn try_upsert(
        &self,
        rows: &[WorkOrder],
        extractions: &[AiExtraction],
    ) -> Result<UpsertResult, SinkError> {
        let ids: HashSet<&str> = rows.iter().map(|r| r.notification_id.as_str()).collect();
        let matching: Vec<AiExtraction> = extractions
            .iter()
            .filter(|e| ids.contains(e.notification_id.as_str()))
            .cloned()
            .collect();

        let mut tx = self.pool.begin().await?;
        let result = notification::upsert_work_orders(&mut tx, rows).await?;
        extraction::upsert_extractions(&mut tx, &matching).await?;
        tx.commit().await?;
        Ok(result)
    }
}

/// Bisection driver, separated from the database so the containment logic is
/// testable: commit what succeeds, split what fails on a data error, and
/// quarantine single poison rows. Non-data errors abort the whole batch.
pub(crate) async fn bisect_upsert<'a, A, Q>(
    len: usize,
    mut attempt: A,
    mut quarantine: Q,
) -> Result<UpsertResult, SinkError>
where
    A: FnMut(usize, usize) -> BoxFuture<'a, Result<UpsertResult, SinkError>>,
    Q: FnMut(usize, &SinkError) -> BoxFuture<'a, Result<(), SinkError>>,
{
    let mut total = UpsertResult::default();
    let mut stack: Vec<(usize, usize)> = vec![(0, len)];

    while let Some((lo, hi)) = stack.pop() {
        if lo >= hi {
            continue;
        }
        match attempt(lo, hi).await {
            Ok(result) => total.merge(result),
            Err(e) if e.kind() == ErrorKind::Data => {
                if hi - lo == 1 {
                    quarantine(lo, &e).await?;
                    total.quarantined += 1;
                } else {
                    let mid = lo + (hi - lo) / 2;
                    tracing::debug!(
                        lo,
                        hi,
                        mid,
                        error = %e,
                        "Poison batch, bisecting"
                    );
                    stack.push((mid, hi));
                    stack.push((lo, mid));
                }
            }
            Err(e) => return Err(e),
        }
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::BTreeSet;

    /// Drive the bisection with a fake attempt that fails on any range
    /// containing a poison index.
    async fn run(len: usize, poison: &[usize]) -> (UpsertResult, BTreeSet<usize>, usize) {
        let poison: BTreeSet<usize> = poison.iter().copied().collect();
        let quarantined = RefCell::new(BTreeSet::new());
        let attempts = RefCell::new(0usize);

        let result = {
            let poison_ref = &poison;
            let attempts_ref = &attempts;
            let quarantined_ref = &quarantined;
            bisect_upsert(
                len,
                move |lo, hi| {
                    *attempts_ref.borrow_mut() += 1;
                    let bad = (lo..hi).any(|i| poison_ref.contains(&i));
                    async move {
                        if bad {
                            Err(SinkError::Constraint {
                                code: Some("23502".into()),
                                message: "null value".into(),
                            })
                        } else {
                            Ok(UpsertResult {
                                inserted: (hi - lo) as u64,
                                updated: 0,
                                quarantined: 0,
                            })
                        }
                    }
                    .boxed()
                },
                move |idx, _e| {
                    quarantined_ref.borrow_mut().insert(idx);
                    async { Ok(()) }.boxed()
                },
            )
            .await
            .unwrap()
        };

        let q = quarantined.into_inner();
        (result, q, attempts.into_inner())
    }

    #[tokio::test]
    async fn clean_batch_commits_in_one_attempt() {
        let (result, quarantined, attempts) = run(8, &[]).await;
        assert_eq!(result.inserted, 8);
        assert_eq!(result.quarantined, 0);
        assert!(quarantined.is_empty());
        assert_eq!(attempts, 1);
    }

    #[tokio::test]
    async fn single_poison_row_is_isolated() {
        let (result, quarantined, _) = run(8, &[3]).await;
        assert_eq!(result.inserted, 7);
        assert_eq!(result.quarantined, 1);
        assert_eq!(quarantined.into_iter().collect::<Vec<_>>(), vec![3]);
    }

    #[tokio::test]
    async fn multiple_poison_rows_are_all_isolated() {
        let (result, quarantined, _) = run(10, &[0, 5, 9]).await;
        assert_eq!(result.inserted, 7);
        assert_eq!(result.quarantined, 3);
        assert_eq!(
            quarantined.into_iter().collect::<Vec<_>>(),
            vec![0, 5, 9]
        );
    }

    #[tokio::test]
    async fn fully_poison_batch_quarantines_everything() {
        let (result, quarantined, _) = run(4, &[0, 1, 2, 3]).await;
        assert_eq!(result.inserted, 0);
        assert_eq!(result.quarantined, 4);
        assert_eq!(quarantined.len(), 4);
    }

    #[tokio::test]
    async fn single_row_batch_with_poison() {
        let (result, quarantined, attempts) = run(1, &[0]).await;
        assert_eq!(result.quarantined, 1);
        assert_eq!(quarantined.len(), 1);
        assert_eq!(attempts, 1);
    }

    #[tokio::test]
    async fn non_data_errors_abort_the_batch() {
        let result = bisect_upsert(
            4,
            |_lo, _hi| {
                async { Err(SinkError::Transient("connection reset".into())) }.boxed()
            },
            |_idx, _e| async { Ok(()) }.boxed(),
        )
        .await;
        assert!(matches!(result, Err(SinkError::Transient(_))));
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let (result, quarantined, attempts) = run(0, &[]).await;
        assert_eq!(result, UpsertResult::default());
        assert!(quarantined.is_empty());
        // (0, 0) range is skipped before any attempt
        assert_eq!(attempts, 0);
    }
}
