//! Embedding storage
//!
//! Capability interface over the two storage modes decided by the startup
//! probe: native `vector` columns with ANN search, or fixed-length
//! little-endian f32 bytes with an in-process scan. Callers never observe
//! which one is active.

use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;

use crate::core::constants::EMBEDDING_DIMENSION;
use crate::data::postgres::{SinkError, VectorMode};
use crate::data::types::EmbeddingRecord;

/// Vector persistence capability.
#[async_trait]
pub trait EmbeddingStore: Send + Sync {
    /// Upsert one embedding per work order (regenerations replace).
    async fn put_batch(&self, rows: &[EmbeddingRecord]) -> Result<u64, SinkError>;

    /// Fetch the stored vector for an identity.
    async fn get(&self, notification_id: &str) -> Result<Option<Vec<f32>>, SinkError>;

    /// Approximate nearest neighbors: `(notification_id, cosine similarity)`.
    async fn ann_search(&self, query: &[f32], k: usize) -> Result<Vec<(String, f32)>, SinkError>;
}

/// Build the store matching the probed capability.
pub fn embedding_store(pool: PgPool, mode: VectorMode) -> Arc<dyn EmbeddingStore> {
    match mode {
        VectorMode::Native => Arc::new(VectorStore { pool }),
        VectorMode::Bytes => Arc::new(ByteStore { pool }),
    }
}

fn check_dimension(vector: &[f32]) -> Result<(), SinkError> {
    if vector.len() != EMBEDDING_DIMENSION {
        return Err(SinkError::Database(format!(
            "embedding dimension mismatch: expected {}, got {}",
            EMBEDDING_DIMENSION,
            vector.len()
        )));
    }
    Ok(())
}

// =============================================================================
// Native vector storage
// =============================================================================

struct VectorStore {
    pool: PgPool,
}

#[async_trait]
impl EmbeddingStore for VectorStore {
    async fn put_batch(&self, rows: &[EmbeddingRecord]) -> Result<u64, SinkError> {
        let mut tx = self.pool.begin().await?;
        for row in rows {
            check_dimension(&row.vector)?;
            sqlx::query(
                r#"
                INSERT INTO embedding (notification_id, source_text, vector)
                VALUES ($1, $2, $3::vector)
                ON CONFLICT (notification_id) DO UPDATE SET
                    source_text = EXCLUDED.source_text,
                    vector = EXCLUDED.vector,
                    created_at = now()
                "#,
            )
            .bind(&row.notification_id)
            .bind(&row.source_text)
            .bind(vector_literal(&row.vector))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(rows.len() as u64)
    }

    async fn get(&self, notification_id: &str) -> Result<Option<Vec<f32>>, SinkError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT vector::text FROM embedding WHERE notification_id = $1")
                .bind(notification_id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(|(text,)| parse_vector_literal(&text)).transpose()
    }

    async fn ann_search(&self, query: &[f32], k: usize) -> Result<Vec<(String, f32)>, SinkError> {
        check_dimension(query)?;
        let rows: Vec<(String, f64)> = sqlx::query_as(
            r#"
            SELECT notification_id, 1 - (vector <=> $1::vector) AS similarity
            FROM embedding
            ORDER BY vector <=> $1::vector
            LIMIT $2
            "#,
        )
        .bind(vector_literal(query))
        .bind(k as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id, s)| (id, s as f32)).collect())
    }
}

// =============================================================================
// Byte storage fallback
// =============================================================================

struct ByteStore {
    pool: PgPool,
}

#[async_trait]
impl EmbeddingStore for ByteStore {
    async fn put_batch(&self, rows: &[EmbeddingRecord]) -> Result<u64, SinkError> {
        let mut tx = self.pool.begin().await?;
        for row in rows {
            check_dimension(&row.vector)?;
            sqlx::query(
                r#"
                INSERT INTO embedding (notification_id, source_text, vector)
                VALUES ($1, $2, $3)
                ON CONFLICT (notification_id) DO UPDATE SET
                    source_text = EXCLUDED.source_text,
                    vector = EXCLUDED.vector,
                    created_at = now()
                "#,
            )
            .bind(&row.notification_id)
            .bind(&row.source_text)
            .bind(encode_vector(&row.vector))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(rows.len() as u64)
    }

    async fn get(&self, notification_id: &str) -> Result<Option<Vec<f32>>, SinkError> {
        let row: Option<(Vec<u8>,)> =
            sqlx::query_as("SELECT vector FROM embedding WHERE notification_id = $1")
                .bind(notification_id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(|(bytes,)| decode_vector(&bytes)).transpose()
    }

    async fn ann_search(&self, query: &[f32], k: usize) -> Result<Vec<(String, f32)>, SinkError> {
        check_dimension(query)?;
        // No index support in byte mode: linear scan over the stored vectors.
        let rows: Vec<(String, Vec<u8>)> =
            sqlx::query_as("SELECT notification_id, vector FROM embedding")
                .fetch_all(&self.pool)
                .await?;

        let mut scored: Vec<(String, f32)> = Vec::with_capacity(rows.len());
        for (id, bytes) in rows {
            let vector = decode_vector(&bytes)?;
            scored.push((id, cosine_similarity(query, &vector)));
        }
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }
}

// =============================================================================
// Encoding helpers
// =============================================================================

/// Render a vector as the extension's text literal, e.g. `[0.1,0.2]`.
fn vector_literal(vector: &[f32]) -> String {
    let mut out = String::with_capacity(vector.len() * 10 + 2);
    out.push('[');
    for (i, v) in vector.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&format!("{}", v));
    }
    out.push(']');
    out
}

fn parse_vector_literal(text: &str) -> Result<Vec<f32>, SinkError> {
    text.trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .map(|s| {
            s.trim()
                .parse::<f32>()
                .map_err(|e| SinkError::Database(format!("vector literal: {}", e)))
        })
        .collect()
}

/// Fixed-length little-endian f32 encoding for byte mode.
fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

fn decode_vector(bytes: &[u8]) -> Result<Vec<f32>, SinkError> {
    if bytes.len() % 4 != 0 {
        return Err(SinkError::Database(format!(
            "embedding byte length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_encoding_round_trips() {
        let vector = vec![0.5f32, -1.25, 3.75, 0.0];
        let bytes = encode_vector(&vector);
        assert_eq!(bytes.len(), 16);
        assert_eq!(decode_vector(&bytes).unwrap(), vector);
    }

    #[test]
    fn decode_rejects_truncated_bytes() {
        assert!(decode_vector(&[0u8, 1, 2]).is_err());
    }

    #[test]
    fn vector_literal_round_trips() {
        let vector = vec![0.1f32, -2.5, 4.0];
        let literal = vector_literal(&vector);
        assert!(literal.starts_with('[') && literal.ends_with(']'));
        assert_eq!(parse_vector_literal(&literal).unwrap(), vector);
    }

    #[test]
    fn cosine_similarity_bounds() {
        let a = vec![1.0f32, 0.0];
        let b = vec![1.0f32, 0.0];
        let c = vec![0.0f32, 1.0];
        let d = vec![-1.0f32, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&a, &c).abs() < 1e-6);
        assert!((cosine_similarity(&a, &d) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&a, &[]), 0.0);
    }

    #[test]
    fn dimension_check_enforced() {
        assert!(check_dimension(&vec![0.0; EMBEDDING_DIMENSION]).is_ok());
        assert!(check_dimension(&vec![0.0; 3]).is_err());
    }
}
