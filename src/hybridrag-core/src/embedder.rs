use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::cache::EmbeddingCache;
use crate::config::EmbeddingConfig;
use crate::{Error, Result};

/// Embedder trait for converting text to vectors
#[async_trait::async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// OpenAI-compatible embedding client (Ollama, llama.cpp and LM Studio all
/// serve `/v1/embeddings`)
pub struct OpenAIEmbedder {
    client: Client,
    base_url: String,
    dimensions: usize,
    model: String,
    cache: Option<Arc<EmbeddingCache>>,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a str,
    model: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl OpenAIEmbedder {
    pub fn new(
        base_url: String,
        model: String,
        dimensions: usize,
        insecure_skip_verify: bool,
    ) -> Result<Self> {
        let client = if insecure_skip_verify {
            reqwest::Client::builder()
                .danger_accept_invalid_certs(true)
                .build()?
        } else {
            reqwest::Client::new()
        };

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            dimensions,
            model,
            cache: None,
        })
    }

    /// Build from configuration, attaching a cache when one is configured
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let embedder = Self::new(
            config.url.clone(),
            config.model.clone(),
            config.dimensions,
            config.insecure_skip_verify,
        )?;

        Ok(match EmbeddingCache::new(&config.model, config.cache_capacity) {
            Some(cache) => embedder.with_cache(Arc::new(cache)),
            None => embedder,
        })
    }

    /// Enable caching with specified cache instance
    pub fn with_cache(mut self, cache: Arc<EmbeddingCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    async fn embed_uncached(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbeddingRequest {
            input: text,
            model: &self.model,
        };

        let response = self
            .client
            .post(format!("{}/v1/embeddings", self.base_url))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::ServiceUnavailable(format!(
                "Embedding service returned status {}: {}",
                status, body
            )));
        }

        let embedding_response: EmbeddingResponse = response.json().await.map_err(|e| {
            Error::ServiceUnavailable(format!("Failed to parse embedding response: {}", e))
        })?;

        let embedding = embedding_response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| Error::ServiceUnavailable("No embedding data in response".into()))?;

        if embedding.len() != self.dimensions {
            return Err(Error::DimensionMismatch {
                expected: self.dimensions,
                actual: embedding.len(),
            });
        }

        Ok(embedding)
    }
}

#[async_trait::async_trait]
impl Embedder for OpenAIEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(cache) = &self.cache {
            if let Some(vector) = cache.get(text).await {
                return Ok(vector);
            }
        }

        let vector = self.embed_uncached(text).await?;

        if let Some(cache) = &self.cache {
            cache.put(text, vector.clone()).await;
        }

        Ok(vector)
    }
}
