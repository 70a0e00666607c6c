//! HybridRag Core Library
//!
//! This crate provides the core functionality for HybridRag, including:
//! - Concurrent document ingestion (chunk, embed, extract triplets, persist)
//! - Vector storage with exact cosine ranking
//! - Knowledge-graph storage and bounded-hop traversal
//! - Hybrid query answering over fused vector and graph evidence
//! - Embedding and language-model clients with caching

pub mod cache;
pub mod chunking;
pub mod config;
pub mod embedder;
pub mod entities;
pub mod error;
pub mod graph;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod query;
pub mod triplets;
pub mod vector_store;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use cache::EmbeddingCache;
pub use chunking::{DocumentConverter, TextDocumentConverter};
pub use config::Config;
pub use embedder::{Embedder, OpenAIEmbedder};
pub use error::{Error, Result};
pub use graph::{GraphStore, SqliteGraphStore};
pub use ingest::IngestionCoordinator;
pub use llm::{LanguageModel, OllamaClient, OutputMode};
pub use models::*;
pub use query::HybridQueryEngine;
pub use vector_store::{SqliteVectorStore, VectorStore};
