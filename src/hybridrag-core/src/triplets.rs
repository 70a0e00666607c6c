use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::warn;

use crate::llm::{LanguageModel, OutputMode};
use crate::models::{Relationship, Triplet};

/// Shapes the model is known to answer with
#[derive(Deserialize)]
#[serde(untagged)]
enum TripletPayload {
    List(Vec<Value>),
    Wrapped { triplets: Vec<Value> },
}

/// Turns chunk text into (subject, predicate, object) triplets via the model
#[derive(Clone)]
pub struct TripletExtractor {
    llm: Arc<dyn LanguageModel>,
}

impl TripletExtractor {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }

    /// Never fails: service errors and malformed output both yield no triplets
    pub async fn extract(&self, text: &str) -> Vec<Triplet> {
        let prompt = build_prompt(text);

        match self.llm.generate(&prompt, OutputMode::Json).await {
            Ok(raw) => parse_triplets(&raw),
            Err(e) => {
                warn!("Triplet extraction failed: {}", e);
                Vec::new()
            }
        }
    }
}

fn build_prompt(text: &str) -> String {
    format!(
        "Extract semantic triplets (Subject, Predicate, Object) from the following text.\n\
         Return ONLY a JSON list of objects with \"subject\", \"predicate\", and \"object\" keys.\n\
         Do not include any explanation.\n\n\
         Text: {}",
        text
    )
}

/// Decode a model response, accepting a bare list or `{"triplets": [...]}`.
/// Anything else decodes to an empty list; list items that are not objects
/// are skipped.
pub fn parse_triplets(raw: &str) -> Vec<Triplet> {
    let items = match serde_json::from_str::<TripletPayload>(raw.trim()) {
        Ok(TripletPayload::List(items)) | Ok(TripletPayload::Wrapped { triplets: items }) => items,
        Err(e) => {
            warn!("Discarding malformed triplet output: {}", e);
            return Vec::new();
        }
    };

    items
        .iter()
        .filter_map(|item| {
            let obj = item.as_object()?;
            Some(Triplet {
                subject: field_text(obj.get("subject")),
                predicate: field_text(obj.get("predicate")),
                object: field_text(obj.get("object")),
            })
        })
        .collect()
}

fn field_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Normalize raw triplets into relationships, dropping incomplete ones and
/// duplicates while keeping first-seen order
pub fn normalize(triplets: &[Triplet]) -> Vec<Relationship> {
    let mut seen = HashSet::new();
    triplets
        .iter()
        .filter_map(Relationship::from_triplet)
        .filter(|rel| seen.insert(rel.clone()))
        .collect()
}
