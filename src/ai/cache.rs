//! Embedding cache
//!
//! Keyed by the SHA-256 of the post-scrub source text plus the model
//! version, so a model bump never serves stale vectors. Hits bypass both the
//! network and the rate limiter. Bounded by entry count with LRU-style
//! eviction (moka).

use moka::future::Cache;
use sha2::{Digest, Sha256};

pub struct EmbeddingCache {
    cache: Cache<String, Vec<f32>>,
    model_version: String,
}

impl EmbeddingCache {
    pub fn new(max_entries: u64, model_version: &str) -> Self {
        Self {
            cache: Cache::builder().max_capacity(max_entries).build(),
            model_version: model_version.to_string(),
        }
    }

    fn key(&self, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        format!("{:x}:{}", hasher.finalize(), self.model_version)
    }

    pub async fn get(&self, text: &str) -> Option<Vec<f32>> {
        self.cache.get(&self.key(text)).await
    }

    pub async fn insert(&self, text: &str, vector: Vec<f32>) {
        self.cache.insert(self.key(text), vector).await;
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hit_after_insert() {
        let cache = EmbeddingCache::new(100, "v1");
        assert!(cache.get("pump failed").await.is_none());
        cache.insert("pump failed", vec![0.1, 0.2]).await;
        assert_eq!(cache.get("pump failed").await, Some(vec![0.1, 0.2]));
    }

    #[tokio::test]
    async fn model_version_partitions_keys() {
        let v1 = EmbeddingCache::new(100, "v1");
        let v2 = EmbeddingCache::new(100, "v2");
        v1.insert("text", vec![1.0]).await;
        assert!(v2.get("text").await.is_none());
    }

    #[tokio::test]
    async fn stable_across_rereads() {
        let cache = EmbeddingCache::new(100, "v1");
        cache.insert("t", vec![0.5; 4]).await;
        let a = cache.get("t").await.unwrap();
        let b = cache.get("t").await.unwrap();
        assert_eq!(a, b);
    }
}
