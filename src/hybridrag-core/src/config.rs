use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
    #[serde(default)]
    pub graph_store: GraphStoreConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default = "default_port")]
    pub port: String,

    // CORS configuration
    #[serde(default)]
    pub cors: CorsConfig,
}

fn default_port() -> String {
    "8080".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Base URL of an OpenAI-compatible server; `/v1/embeddings` is appended
    #[serde(default = "default_service_url")]
    pub url: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Fixed for the lifetime of the vector store
    #[serde(default = "default_embedding_dimensions")]
    pub dimensions: usize,
    /// In-memory LRU entries; 0 disables the cache
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    #[serde(default)]
    pub insecure_skip_verify: bool,
}

fn default_service_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}

fn default_embedding_dimensions() -> usize {
    768
}

fn default_cache_capacity() -> usize {
    10_000
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            url: default_service_url(),
            model: default_embedding_model(),
            dimensions: default_embedding_dimensions(),
            cache_capacity: default_cache_capacity(),
            insecure_skip_verify: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    #[serde(default = "default_service_url")]
    pub url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
}

fn default_llm_model() -> String {
    "llama3.1:8b".to_string()
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            url: default_service_url(),
            model: default_llm_model(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VectorStoreConfig {
    #[serde(default = "default_vector_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_vector_url() -> String {
    "sqlite://./data/vectors.db?mode=rwc".to_string()
}

fn default_max_connections() -> u32 {
    10
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            url: default_vector_url(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GraphStoreConfig {
    #[serde(default = "default_graph_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Connection attempts on first use before giving up
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    /// Fixed delay between connection attempts
    #[serde(default = "default_connect_backoff_ms")]
    pub connect_backoff_ms: u64,
}

fn default_graph_url() -> String {
    "sqlite://./data/graph.db?mode=rwc".to_string()
}

fn default_connect_attempts() -> u32 {
    5
}

fn default_connect_backoff_ms() -> u64 {
    2000
}

impl GraphStoreConfig {
    pub fn connect_backoff(&self) -> Duration {
        Duration::from_millis(self.connect_backoff_ms)
    }
}

impl Default for GraphStoreConfig {
    fn default() -> Self {
        Self {
            url: default_graph_url(),
            max_connections: default_max_connections(),
            connect_attempts: default_connect_attempts(),
            connect_backoff_ms: default_connect_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestionConfig {
    /// Chunks processed in parallel per document
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Target chunk size in tokens
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Overlap between chunks in tokens
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Only files under this directory may be ingested
    #[serde(default = "default_root_dir")]
    pub root_dir: String,
}

fn default_concurrency() -> usize {
    4
}

fn default_chunk_size() -> usize {
    512
}

fn default_chunk_overlap() -> usize {
    50
}

fn default_root_dir() -> String {
    "./documents".to_string()
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            root_dir: default_root_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueryConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_max_hops")]
    pub max_hops: usize,
    /// Traversal rows kept per extracted entity
    #[serde(default = "default_per_entity_limit")]
    pub per_entity_limit: usize,
}

fn default_top_k() -> usize {
    5
}

fn default_max_hops() -> usize {
    2
}

fn default_per_entity_limit() -> usize {
    15
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            max_hops: default_max_hops(),
            per_entity_limit: default_per_entity_limit(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CorsConfig {
    #[serde(default = "default_cors_enabled")]
    pub enabled: bool,
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

fn default_cors_enabled() -> bool {
    true
}

fn default_allowed_origins() -> Vec<String> {
    vec!["http://localhost:5173".to_string(), "http://localhost:8501".to_string()]
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: default_cors_enabled(),
            allowed_origins: default_allowed_origins(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> crate::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&contents)?;
        Ok(config)
    }

    /// Let the environment point the service at different endpoints
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup("HYBRIDRAG_EMBEDDING_URL") {
            self.embedding.url = url;
        }
        if let Some(url) = lookup("HYBRIDRAG_LLM_URL") {
            self.llm.url = url;
        }
        if let Some(url) = lookup("HYBRIDRAG_VECTOR_DB_URL") {
            self.vector_store.url = url;
        }
        if let Some(url) = lookup("HYBRIDRAG_GRAPH_DB_URL") {
            self.graph_store.url = url;
        }
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
            vector_store: VectorStoreConfig::default(),
            graph_store: GraphStoreConfig::default(),
            ingestion: IngestionConfig::default(),
            query: QueryConfig::default(),
            port: default_port(),
            cors: CorsConfig::default(),
        }
    }
}
