use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A bounded unit of document text with provenance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub source_id: String,
    /// Position in the source document; provenance only, not a processing order
    pub index: usize,
}

impl Chunk {
    pub fn new(text: impl Into<String>, source_id: impl Into<String>, index: usize) -> Self {
        Self {
            text: text.into(),
            source_id: source_id.into(),
            index,
        }
    }
}

/// Provenance stored alongside every vector record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub source: String,
    pub chunk_index: usize,
}

/// VectorRecord is the durable form of an embedded chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub content: String,
    pub metadata: ChunkMetadata,
    pub embedding: Vec<f32>,
}

impl VectorRecord {
    pub fn from_chunk(chunk: &Chunk, embedding: Vec<f32>) -> Self {
        Self {
            content: chunk.text.clone(),
            metadata: ChunkMetadata {
                source: chunk.source_id.clone(),
                chunk_index: chunk.index,
            },
            embedding,
        }
    }
}

/// A nearest-neighbour match, nearest first
#[derive(Debug, Clone, Serialize)]
pub struct VectorHit {
    pub content: String,
    pub metadata: ChunkMetadata,
    /// Cosine distance to the query embedding
    pub distance: f64,
}

/// Candidate fact extracted from text, before normalization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Triplet {
    pub subject: String,
    pub predicate: String,
    pub object: String,
}

impl Triplet {
    pub fn new(
        subject: impl Into<String>,
        predicate: impl Into<String>,
        object: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
        }
    }
}

/// Edge type derived from a predicate.
///
/// Only letters, digits and underscores survive construction, so the value is
/// safe to use wherever a store treats it as a schema identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RelationType(String);

impl RelationType {
    /// Uppercase, turn whitespace runs into `_`, drop everything outside
    /// ASCII `[A-Z0-9_]`, collapse repeated underscores and trim them from
    /// both ends. `None` when nothing is left.
    pub fn sanitize(predicate: &str) -> Option<Self> {
        let mut out = String::with_capacity(predicate.len());
        for c in predicate.trim().to_uppercase().chars() {
            let mapped = if c.is_whitespace() || c == '_' {
                '_'
            } else if c.is_ascii_alphanumeric() {
                c
            } else {
                continue;
            };

            if mapped == '_' && (out.is_empty() || out.ends_with('_')) {
                continue;
            }
            out.push(mapped);
        }

        while out.ends_with('_') {
            out.pop();
        }

        if out.is_empty() {
            None
        } else {
            Some(Self(out))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalized triplet, ready for the graph store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Relationship {
    pub source: String,
    pub relation_type: RelationType,
    pub target: String,
}

impl Relationship {
    /// Normalize a raw triplet; `None` when any field is empty afterwards
    pub fn from_triplet(triplet: &Triplet) -> Option<Self> {
        let source = triplet.subject.trim();
        let target = triplet.object.trim();
        if source.is_empty() || target.is_empty() {
            return None;
        }

        let relation_type = RelationType::sanitize(&triplet.predicate)?;

        Some(Self {
            source: source.to_string(),
            relation_type,
            target: target.to_string(),
        })
    }
}

/// One traversal result: seed entity, type of the first edge walked, endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct GraphHit {
    pub source: String,
    pub relation_type: String,
    pub target: String,
}

impl fmt::Display for GraphHit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.source, self.relation_type, self.target)
    }
}

/// Result of a hybrid query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryAnswer {
    pub answer: String,
    pub vector_hit_count: usize,
    pub graph_hit_count: usize,
    pub entities_found: Vec<String>,
}

/// Outcome of processing a single chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum ChunkOutcome {
    Ok,
    Failed(String),
}

impl ChunkOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, ChunkOutcome::Ok)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkReport {
    pub index: usize,
    pub outcome: ChunkOutcome,
    /// Triplets written to the graph (zero when extraction degraded)
    pub triplets: usize,
}

/// Aggregate of one document's ingestion
#[derive(Debug, Clone, Serialize)]
pub struct DocumentReport {
    pub source: String,
    pub chunks: Vec<ChunkReport>,
    pub ingested_at: DateTime<Utc>,
}

impl DocumentReport {
    pub fn failed_chunks(&self) -> impl Iterator<Item = &ChunkReport> {
        self.chunks.iter().filter(|c| !c.outcome.is_ok())
    }

    pub fn is_success(&self) -> bool {
        self.failed_chunks().next().is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub node_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphEdge {
    pub source: String,
    pub label: String,
    pub target: String,
}

/// Bounded view of the graph for visualisation
#[derive(Debug, Clone, Default, Serialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GraphStatistics {
    pub entity_count: i64,
    pub relationship_count: i64,
    pub sample_entities: Vec<String>,
}

/// Combined status of both stores
#[derive(Debug, Clone, Serialize)]
pub struct StoreStatus {
    pub vector_records: i64,
    pub graph: GraphStatistics,
}
