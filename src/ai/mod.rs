//! AI enrichment sub-pipeline
//!
//! `EnrichmentService` wraps the raw endpoint client with every discipline
//! layer the pipeline requires: PII scrubbing before any text leaves the
//! process, pre-call token budgeting, a token-bucket rate limiter, a circuit
//! breaker around all outbound calls, an embedding cache that bypasses both,
//! and validation retries with a stiffened prompt before a response is
//! quarantined.

pub mod cache;
pub mod circuit;
pub mod client;
pub mod cost;
pub mod error;
pub mod prompts;
pub mod rate_limit;
pub mod scrubber;

pub use error::AiError;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::StreamExt;

use self::cache::EmbeddingCache;
use self::circuit::CircuitBreaker;
use self::client::AiHttpClient;
use self::cost::{CostTracker, Pricing, estimate_tokens};
use self::prompts::{ExtractionPayload, build_messages, fallback_extraction, parse_extraction};
use self::rate_limit::RateLimiter;
use self::scrubber::Scrubber;
use crate::core::config::{AiConfig, BudgetPolicy};
use crate::core::constants::{
    AI_EXTRACTION_VALIDATION_RETRIES, AI_MAX_TOKENS_PER_EMBED_REQUEST, EMBEDDING_DIMENSION,
};
use crate::data::types::{AiExtraction, EmbeddingRecord, WorkOrder};
use crate::utils::retry::{RetryPolicy, retry};

/// What a batch of rows produced.
#[derive(Default)]
pub struct EnrichmentOutcome {
    pub extractions: Vec<AiExtraction>,
    pub embeddings: Vec<EmbeddingRecord>,
    /// Rows whose enrichment failed terminally this run
    pub failures: u64,
    /// Rows skipped fast (circuit open or hard-gated budget)
    pub skipped: u64,
    /// Rows filled by the rule-based fallback (degraded mode)
    pub degraded: u64,
}

pub struct EnrichmentService {
    client: AiHttpClient,
    scrubber: Scrubber,
    limiter: RateLimiter,
    breaker: Arc<CircuitBreaker>,
    cost: Arc<CostTracker>,
    cache: EmbeddingCache,
    config: AiConfig,
    policy: RetryPolicy,
    calls: AtomicU64,
}

impl EnrichmentService {
    pub fn new(config: AiConfig, policy: RetryPolicy) -> Result<Self, AiError> {
        let client = AiHttpClient::new(&config)?;
        let pricing = Pricing {
            prompt_per_1k: config.prompt_price_per_1k,
            completion_per_1k: config.completion_price_per_1k,
            embedding_per_1k: config.embedding_price_per_1k,
        };
        Ok(Self {
            client,
            scrubber: Scrubber::new(),
            limiter: RateLimiter::new(config.rate_limit_rps),
            breaker: Arc::new(CircuitBreaker::with_defaults("ai_endpoint")),
            cost: Arc::new(CostTracker::new(
                pricing,
                config.cost_alert_usd,
                config.budget_policy,
            )),
            cache: EmbeddingCache::new(config.cache_max_entries, &config.model_version),
            config,
            policy,
            calls: AtomicU64::new(0),
        })
    }

    pub fn cost(&self) -> &Arc<CostTracker> {
        &self.cost
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn model_version(&self) -> &str {
        &self.config.model_version
    }

    pub fn cost_alert_usd(&self) -> f64 {
        self.config.cost_alert_usd
    }

    pub fn total_calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    // ========================================================================
    // SINGLE OPERATIONS
    // ========================================================================

    /// Structured extraction over already-scrubbed text. Responses failing
    /// validation are retried with a stiffened prompt, then quarantined.
    pub async fn extract(&self, redacted_text: &str) -> Result<ExtractionPayload, AiError> {
        self.cost.precheck(estimate_tokens(redacted_text))?;

        let mut last_error = String::new();
        for attempt in 0..=AI_EXTRACTION_VALIDATION_RETRIES {
            let messages = build_messages(redacted_text, attempt > 0);
            let outcome = self.guarded_chat(&messages).await?;
            match parse_extraction(&outcome.content) {
                Ok(payload) => return Ok(payload),
                Err(e) => {
                    tracing::warn!(
                        attempt,
                        error = %e,
                        "Extraction response failed validation"
                    );
                    last_error = e;
                }
            }
        }
        Err(AiError::InvalidResponse(last_error))
    }

    /// Embed a batch of texts, serving cache hits without touching the
    /// network or the rate limiter and chunking misses by token budget.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AiError> {
        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut misses: Vec<usize> = Vec::new();

        for (i, text) in texts.iter().enumerate() {
            match self.cache.get(text).await {
                Some(vector) => results[i] = Some(vector),
                None => misses.push(i),
            }
        }
        if !misses.is_empty() {
            tracing::debug!(
                total = texts.len(),
                cache_hits = texts.len() - misses.len(),
                misses = misses.len(),
                "Embedding batch"
            );
        }

        // Chunk misses so no single request exceeds the token budget.
        let mut chunk: Vec<usize> = Vec::new();
        let mut chunk_tokens = 0usize;
        let mut flushes: Vec<Vec<usize>> = Vec::new();
        for idx in misses {
            let tokens = estimate_tokens(&texts[idx]);
            if !chunk.is_empty() && chunk_tokens + tokens > AI_MAX_TOKENS_PER_EMBED_REQUEST {
                flushes.push(std::mem::take(&mut chunk));
                chunk_tokens = 0;
            }
            chunk.push(idx);
            chunk_tokens += tokens;
        }
        if !chunk.is_empty() {
            flushes.push(chunk);
        }

        for indices in flushes {
            let chunk_texts: Vec<String> = indices.iter().map(|&i| texts[i].clone()).collect();
            let estimated: usize = chunk_texts.iter().map(|t| estimate_tokens(t)).sum();
            self.cost.precheck(estimated)?;

            let outcome = self.guarded_embed(&chunk_texts).await?;
            for (&idx, vector) in indices.iter().zip(outcome.vectors.into_iter()) {
                if vector.len() != EMBEDDING_DIMENSION {
                    return Err(AiError::InvalidResponse(format!(
                        "embedding dimension mismatch: expected {}, got {}",
                        EMBEDDING_DIMENSION,
                        vector.len()
                    )));
                }
                self.cache.insert(&texts[idx], vector.clone()).await;
                results[idx] = Some(vector);
            }
        }

        Ok(results.into_iter().map(|v| v.expect("all slots filled")).collect())
    }

    // ========================================================================
    // BATCH ENRICHMENT
    // ========================================================================

    /// Scrub, extract and embed a batch of rows with a bounded in-flight
    /// window. Per-row failures are contained: the raw row still flows to
    /// the sink, only its enrichment is skipped or degraded.
    pub async fn enrich_rows(&self, rows: &[WorkOrder]) -> EnrichmentOutcome {
        let mut outcome = EnrichmentOutcome::default();

        let candidates: Vec<(String, String)> = rows
            .iter()
            .filter_map(|row| {
                row.enrichment_text()
                    .map(|text| (row.notification_id.clone(), self.scrubber.scrub(text).text))
            })
            .collect();
        if candidates.is_empty() {
            return outcome;
        }

        // Budget already blown under soft-degrade: no network at all, every
        // row gets the rule-based fallback.
        if self.config.budget_policy == BudgetPolicy::SoftDegrade && self.cost.over_budget() {
            for (id, text) in &candidates {
                outcome
                    .extractions
                    .push(self.to_extraction(id, fallback_extraction(text)));
                outcome.degraded += 1;
            }
            return outcome;
        }

        let extracted: Vec<(String, String, Result<ExtractionPayload, AiError>)> =
            futures::stream::iter(candidates.into_iter().map(|(id, text)| async move {
                let result = self.extract(&text).await;
                (id, text, result)
            }))
            .buffer_unordered(self.config.max_in_flight)
            .collect()
            .await;

        let mut embed_ids: Vec<String> = Vec::new();
        let mut embed_texts: Vec<String> = Vec::new();
        for (id, text, result) in extracted {
            match result {
                Ok(payload) => {
                    outcome.extractions.push(self.to_extraction(&id, payload));
                    embed_ids.push(id);
                    embed_texts.push(text);
                }
                Err(AiError::BudgetExceeded) if self.config.budget_policy == BudgetPolicy::SoftDegrade => {
                    outcome
                        .extractions
                        .push(self.to_extraction(&id, fallback_extraction(&text)));
                    outcome.degraded += 1;
                }
                Err(AiError::BudgetExceeded) | Err(AiError::CircuitOpen) => {
                    outcome.skipped += 1;
                }
                Err(e) => {
                    tracing::warn!(notification_id = %id, error = %e, "Enrichment failed for row");
                    outcome.failures += 1;
                }
            }
        }

        if !embed_texts.is_empty() {
            match self.embed_batch(&embed_texts).await {
                Ok(vectors) => {
                    for ((id, text), vector) in
                        embed_ids.into_iter().zip(embed_texts).zip(vectors)
                    {
                        outcome.embeddings.push(EmbeddingRecord {
                            notification_id: id,
                            source_text: text,
                            vector,
                        });
                    }
                }
                Err(e) => {
                    // Extractions still persist; embeddings will be filled by
                    // a later run (the cache makes re-work cheap).
                    tracing::warn!(error = %e, "Embedding stage failed for batch");
                    outcome.failures += 1;
                }
            }
        }

        outcome
    }

    fn to_extraction(&self, notification_id: &str, payload: ExtractionPayload) -> AiExtraction {
        AiExtraction {
            notification_id: notification_id.to_string(),
            keywords: payload.keywords,
            primary_symptom: payload.primary_symptom,
            root_cause: payload.root_cause,
            summary: payload.summary,
            solution: payload.solution,
            solution_type: payload.solution_type,
            components: payload.components,
            processes: payload.processes,
            main_component: payload.main_component,
            main_process: payload.main_process,
            confidence: payload.confidence,
            model_version: self.config.model_version.clone(),
            extracted_at: chrono::Utc::now(),
        }
    }

    // ========================================================================
    // GUARDED CALLS
    // ========================================================================

    /// Once `check()` admits a call, every outcome must reach the breaker:
    /// a half-open probe that is never resolved would wedge the breaker in
    /// `HalfOpen` for the life of the process.
    async fn guarded_chat(
        &self,
        messages: &[serde_json::Value],
    ) -> Result<client::ChatOutcome, AiError> {
        retry(self.policy, "ai_chat", || async {
            self.breaker.check().map_err(|_| AiError::CircuitOpen)?;
            let result = self.limited_chat(messages).await;
            self.settle_breaker(&result);
            result
        })
        .await
    }

    async fn guarded_embed(&self, texts: &[String]) -> Result<client::EmbedOutcome, AiError> {
        retry(self.policy, "ai_embed", || async {
            self.breaker.check().map_err(|_| AiError::CircuitOpen)?;
            let result = self.limited_embed(texts).await;
            self.settle_breaker(&result);
            result
        })
        .await
    }

    async fn limited_chat(
        &self,
        messages: &[serde_json::Value],
    ) -> Result<client::ChatOutcome, AiError> {
        self.limiter.acquire().await?;
        self.calls.fetch_add(1, Ordering::Relaxed);
        let outcome = self.client.chat(messages).await?;
        self.cost
            .record_chat(outcome.prompt_tokens, outcome.completion_tokens);
        Ok(outcome)
    }

    async fn limited_embed(&self, texts: &[String]) -> Result<client::EmbedOutcome, AiError> {
        self.limiter.acquire().await?;
        self.calls.fetch_add(1, Ordering::Relaxed);
        let outcome = self.client.embed(texts).await?;
        self.cost.record_embedding(outcome.tokens);
        Ok(outcome)
    }

    fn settle_breaker<T>(&self, result: &Result<T, AiError>) {
        match result {
            Ok(_) => self.breaker.record_success(),
            Err(e) if dependency_failure(e) => self.breaker.record_failure(),
            Err(_) => self.breaker.record_inconclusive(),
        }
    }
}

/// Whether an error gauges dependency health and belongs in the breaker's
/// rolling window. Rate pushback and well-formed-but-unusable responses do
/// not; they still resolve an in-flight probe via `record_inconclusive`.
fn dependency_failure(e: &AiError) -> bool {
    matches!(
        e,
        AiError::Timeout(_) | AiError::Transient(_) | AiError::Persistent(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(policy: BudgetPolicy) -> AiConfig {
        AiConfig {
            enabled: true,
            endpoint: "http://localhost:1".into(),
            api_key: "test".into(),
            api_version: "2024-10-21".into(),
            chat_deployment: "chat".into(),
            embedding_deployment: "embed".into(),
            model_version: "v-test".into(),
            rate_limit_rps: 100.0,
            timeout_ms: 50,
            max_in_flight: 2,
            cost_alert_usd: 0.01,
            budget_policy: policy,
            prompt_price_per_1k: 0.01,
            completion_price_per_1k: 0.01,
            embedding_price_per_1k: 0.001,
            cache_max_entries: 100,
            alert_webhook_url: None,
            prometheus_textfile: None,
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(0, std::time::Duration::from_millis(1), std::time::Duration::from_millis(1))
    }

    fn row(id: &str, text: &str) -> WorkOrder {
        serde_json::from_value(serde_json::json!({
            "notification_id": id,
            "notified_at": "2024-03-01T00:00:00Z",
            "long_text": text,
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn hard_gate_rejects_extract_without_network() {
        let service = EnrichmentService::new(test_config(BudgetPolicy::HardGate), fast_policy())
            .unwrap();
        // Push the accumulator over the threshold
        service.cost.record_chat(10_000, 0);
        let err = service.extract("pump failed").await.unwrap_err();
        assert!(matches!(err, AiError::BudgetExceeded));
        assert_eq!(service.total_calls(), 0);
    }

    #[tokio::test]
    async fn soft_degrade_falls_back_without_network() {
        let service =
            EnrichmentService::new(test_config(BudgetPolicy::SoftDegrade), fast_policy()).unwrap();
        service.cost.record_chat(10_000, 0);

        let rows = vec![row("N-1", "compressor failure observed"), row("N-2", "valve leaking badly")];
        let outcome = service.enrich_rows(&rows).await;

        assert_eq!(outcome.degraded, 2);
        assert_eq!(outcome.extractions.len(), 2);
        assert!(outcome.extractions.iter().all(|e| e.confidence < 0.5));
        assert!(outcome.embeddings.is_empty());
        assert_eq!(service.total_calls(), 0);
    }

    #[tokio::test]
    async fn rows_without_text_are_not_candidates() {
        let service =
            EnrichmentService::new(test_config(BudgetPolicy::SoftDegrade), fast_policy()).unwrap();
        service.cost.record_chat(10_000, 0);

        let no_text: WorkOrder = serde_json::from_value(serde_json::json!({
            "notification_id": "N-3",
            "notified_at": "2024-03-01T00:00:00Z",
        }))
        .unwrap();
        let outcome = service.enrich_rows(&[no_text]).await;
        assert!(outcome.extractions.is_empty());
        assert_eq!(outcome.degraded, 0);
    }

    #[tokio::test]
    async fn embed_batch_serves_pure_cache_hits_without_network() {
        let service =
            EnrichmentService::new(test_config(BudgetPolicy::HardGate), fast_policy()).unwrap();
        let text = "cached narrative".to_string();
        service
            .cache
            .insert(&text, vec![0.0; EMBEDDING_DIMENSION])
            .await;

        let vectors = service.embed_batch(std::slice::from_ref(&text)).await.unwrap();
        assert_eq!(vectors.len(), 1);
        assert_eq!(vectors[0].len(), EMBEDDING_DIMENSION);
        assert_eq!(service.total_calls(), 0);
    }
}
