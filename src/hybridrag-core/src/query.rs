use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::QueryConfig;
use crate::embedder::Embedder;
use crate::entities::EntityExtractor;
use crate::graph::GraphStore;
use crate::llm::{LanguageModel, OutputMode};
use crate::models::{GraphHit, QueryAnswer, StoreStatus, VectorHit};
use crate::vector_store::VectorStore;
use crate::{Error, Result};

/// Answers questions from vector evidence and graph evidence combined.
///
/// Every step runs in sequence; concurrent callers only share the stores.
pub struct HybridQueryEngine {
    embedder: Arc<dyn Embedder>,
    vectors: Arc<dyn VectorStore>,
    graph: Arc<dyn GraphStore>,
    llm: Arc<dyn LanguageModel>,
    entities: EntityExtractor,
    config: QueryConfig,
}

impl HybridQueryEngine {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        vectors: Arc<dyn VectorStore>,
        graph: Arc<dyn GraphStore>,
        llm: Arc<dyn LanguageModel>,
        config: QueryConfig,
    ) -> Self {
        Self {
            embedder,
            vectors,
            graph,
            entities: EntityExtractor::new(llm.clone()),
            llm,
            config,
        }
    }

    pub fn default_top_k(&self) -> usize {
        self.config.top_k
    }

    #[tracing::instrument(skip(self))]
    pub async fn answer(&self, query: &str, top_k: usize) -> Result<QueryAnswer> {
        if top_k == 0 {
            return Err(Error::InvalidInput("top_k must be positive".into()));
        }

        let embedding = self.embedder.embed(query).await?;
        let vector_hits = self.vectors.nearest_neighbors(&embedding, top_k).await?;

        let entities = self.entities.extract(query).await?;
        let graph_hits = if entities.is_empty() {
            Vec::new()
        } else {
            self.graph_search(&entities).await?
        };

        let context = fuse_context(&vector_hits, &graph_hits);
        debug!("Fused context:\n{}", context);

        let answer = self
            .llm
            .generate(&answer_prompt(query, &context), OutputMode::Text)
            .await?;

        info!(
            vector_hits = vector_hits.len(),
            graph_hits = graph_hits.len(),
            entities = entities.len(),
            "Query answered"
        );

        Ok(QueryAnswer {
            answer,
            vector_hit_count: vector_hits.len(),
            graph_hit_count: graph_hits.len(),
            entities_found: entities,
        })
    }

    /// Traverse from every entity, then dedup the whole set by rendered triple
    async fn graph_search(&self, entities: &[String]) -> Result<Vec<GraphHit>> {
        let mut accumulated = Vec::new();
        for entity in entities {
            let hits = self
                .graph
                .traverse(entity, self.config.max_hops, self.config.per_entity_limit)
                .await?;
            accumulated.extend(hits);
        }
        Ok(dedup_hits(accumulated))
    }

    /// Counts from both stores
    pub async fn status(&self) -> Result<StoreStatus> {
        Ok(StoreStatus {
            vector_records: self.vectors.count().await?,
            graph: self.graph.stats().await?,
        })
    }
}

/// Validate a caller-supplied `top_k` at the boundary
pub fn validate_top_k(top_k: i64) -> Result<usize> {
    if top_k <= 0 {
        return Err(Error::InvalidInput(format!(
            "top_k must be a positive integer, got {}",
            top_k
        )));
    }
    usize::try_from(top_k).map_err(|_| Error::InvalidInput(format!("top_k {} is too large", top_k)))
}

/// Keep the first occurrence of every distinct rendered triple
pub fn dedup_hits(hits: Vec<GraphHit>) -> Vec<GraphHit> {
    let mut seen = HashSet::new();
    hits.into_iter()
        .filter(|hit| seen.insert(hit.to_string()))
        .collect()
}

/// Vector evidence in ranked order, then graph evidence
pub fn fuse_context(vector_hits: &[VectorHit], graph_hits: &[GraphHit]) -> String {
    let mut context = String::from("### Vector Context:\n");
    for hit in vector_hits {
        context.push_str(&format!("- {}\n", hit.content));
    }

    context.push_str("\n### Graph Context:\n");
    for hit in graph_hits {
        context.push_str(&format!("- {}\n", hit));
    }
    context
}

fn answer_prompt(query: &str, context: &str) -> String {
    format!(
        "You are a helpful assistant. Use only the following context to answer the user query.\n\
         If the context does not contain enough information, say so.\n\n\
         Context:\n{}\n\
         User Query: {}\n",
        context, query
    )
}
