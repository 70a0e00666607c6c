//! Deterministic stand-ins for the model services, shared by the test suites.

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::embedder::Embedder;
use crate::llm::{LanguageModel, OutputMode};
use crate::{Error, Result};

type Responder = Box<dyn Fn(&str, OutputMode) -> Result<String> + Send + Sync>;

/// Language model answering from a closure
pub struct ScriptedModel {
    respond: Responder,
    calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn new(
        respond: impl Fn(&str, OutputMode) -> Result<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            respond: Box::new(respond),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl LanguageModel for ScriptedModel {
    async fn generate(&self, prompt: &str, mode: OutputMode) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.respond)(prompt, mode)
    }
}

/// Bag-of-words embedder: each lowercase word bumps one hashed bucket, then
/// the vector is L2-normalised. Texts sharing words end up close.
pub struct KeywordEmbedder {
    dimensions: usize,
    fail_on: Option<String>,
    calls: AtomicUsize,
}

impl KeywordEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            fail_on: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Fail every text containing `marker`
    pub fn failing_on(mut self, marker: &str) -> Self {
        self.fail_on = Some(marker.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Embedder for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(marker) = &self.fail_on {
            if text.contains(marker.as_str()) {
                return Err(Error::ServiceUnavailable("embedding backend down".into()));
            }
        }

        let mut vector = vec![0.0f32; self.dimensions];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let bucket = word
                .to_lowercase()
                .bytes()
                .fold(2166136261u32, |h, b| (h ^ b as u32).wrapping_mul(16777619));
            vector[bucket as usize % self.dimensions] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        Ok(vector)
    }
}

/// Single-connection in-memory SQLite pool that lives as long as the pool
pub async fn memory_pool() -> SqlitePool {
    SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite")
}
