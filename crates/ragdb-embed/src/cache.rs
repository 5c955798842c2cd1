use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use moka::future::Cache;
use serde::Serialize;

#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: u64,
    pub hit_rate: f64,
}

/// LRU-style vector cache keyed by `blake3(model:text)`.
pub struct EmbeddingCache {
    inner: Cache<String, Arc<Vec<f32>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl EmbeddingCache {
    pub fn new(capacity: u64) -> Self {
        Self { inner: Cache::new(capacity), hits: AtomicU64::new(0), misses: AtomicU64::new(0) }
    }

    pub fn key(model: &str, text: &str) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(model.as_bytes());
        hasher.update(b":");
        hasher.update(text.as_bytes());
        hasher.finalize().to_hex().to_string()
    }

    pub async fn get(&self, model: &str, text: &str) -> Option<Vec<f32>> {
        match self.inner.get(&Self::key(model, text)).await {
            Some(v) => { self.hits.fetch_add(1, Ordering::Relaxed); Some(v.as_ref().clone()) }
            None => { self.misses.fetch_add(1, Ordering::Relaxed); None }
        }
    }

    pub async fn put(&self, model: &str, text: &str, vector: Vec<f32>) {
        self.inner.insert(Self::key(model, text), Arc::new(vector)).await;
    }

    pub fn clear(&self) {
        self.inner.invalidate_all();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    pub async fn stats(&self) -> CacheStats {
        self.inner.run_pending_tasks().await;
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            entries: self.inner.entry_count(),
            hit_rate: if total == 0 { 0.0 } else { hits as f64 / total as f64 },
        }
    }
}
