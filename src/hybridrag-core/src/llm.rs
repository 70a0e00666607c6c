//! Client for the generative model used for extraction and answer synthesis.

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::{Error, Result};

/// Shape the model is asked to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Text,
    /// Constrain generation to a JSON value (still returned as raw text)
    Json,
}

/// Generative model capability.
#[async_trait::async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, prompt: &str, mode: OutputMode) -> Result<String>;
}

/// Ollama client speaking `/api/generate`.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    http: Client,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

impl OllamaClient {
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }

    pub fn from_config(config: &LlmConfig) -> Self {
        Self::new(&config.url, &config.model)
    }
}

#[async_trait::async_trait]
impl LanguageModel for OllamaClient {
    async fn generate(&self, prompt: &str, mode: OutputMode) -> Result<String> {
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            format: match mode {
                OutputMode::Text => None,
                OutputMode::Json => Some("json"),
            },
        };

        let response = self
            .http
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::ServiceUnavailable(format!(
                "Ollama error {}: {}",
                status, text
            )));
        }

        let result: GenerateResponse = response
            .json()
            .await
            .map_err(|e| Error::ServiceUnavailable(format!("Invalid Ollama response: {}", e)))?;

        Ok(result.response)
    }
}
