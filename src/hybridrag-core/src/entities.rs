use std::sync::Arc;
use tracing::debug;

use crate::llm::{LanguageModel, OutputMode};
use crate::Result;

/// Pulls candidate entity names out of a user query
#[derive(Clone)]
pub struct EntityExtractor {
    llm: Arc<dyn LanguageModel>,
}

impl EntityExtractor {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }

    /// Comma-separated candidates, trimmed, empties dropped.
    /// Service errors propagate; a blank query never reaches the model.
    pub async fn extract(&self, query: &str) -> Result<Vec<String>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let prompt = format!(
            "Extract key entities (nouns) from this query. Return as a comma-separated list: {}",
            query
        );
        let raw = self.llm.generate(&prompt, OutputMode::Text).await?;
        let entities = parse_entities(&raw);

        debug!("Extracted {} entities from query", entities.len());
        Ok(entities)
    }
}

/// Split a comma-separated model reply into distinct, non-empty names
pub fn parse_entities(raw: &str) -> Vec<String> {
    let mut entities: Vec<String> = Vec::new();
    for candidate in raw.split(',').map(str::trim).filter(|c| !c.is_empty()) {
        if !entities.iter().any(|e| e == candidate) {
            entities.push(candidate.to_string());
        }
    }
    entities
}
