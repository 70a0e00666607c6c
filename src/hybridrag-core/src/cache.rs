use lru::LruCache;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use tokio::sync::RwLock;

/// Compute SHA256 hash of content
pub fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Default, Clone)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// In-memory LRU of embeddings, keyed by model and content hash.
///
/// Re-ingesting a document or repeating a query skips the embedding call.
pub struct EmbeddingCache {
    entries: RwLock<LruCache<String, Vec<f32>>>,
    model: String,
    stats: RwLock<CacheStats>,
}

impl EmbeddingCache {
    /// Returns `None` for a zero capacity
    pub fn new(model: impl Into<String>, capacity: usize) -> Option<Self> {
        let capacity = NonZeroUsize::new(capacity)?;
        Some(Self {
            entries: RwLock::new(LruCache::new(capacity)),
            model: model.into(),
            stats: RwLock::new(CacheStats::default()),
        })
    }

    fn key(&self, content: &str) -> String {
        format!("{}:{}", self.model, hash_content(content))
    }

    pub async fn get(&self, content: &str) -> Option<Vec<f32>> {
        let key = self.key(content);

        let found = self.entries.write().await.get(&key).cloned();
        let mut stats = self.stats.write().await;
        if found.is_some() {
            stats.hits += 1;
            tracing::debug!("Embedding cache hit: {}", &key[key.len() - 8..]);
        } else {
            stats.misses += 1;
        }
        found
    }

    pub async fn put(&self, content: &str, vector: Vec<f32>) {
        let key = self.key(content);
        self.entries.write().await.put(key, vector);
    }

    pub async fn stats(&self) -> CacheStats {
        self.stats.read().await.clone()
    }
}
