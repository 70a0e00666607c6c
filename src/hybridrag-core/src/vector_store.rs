use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

use crate::config::VectorStoreConfig;
use crate::models::{ChunkMetadata, VectorHit, VectorRecord};
use crate::{Error, Result};

/// Storage and nearest-neighbour lookup over chunk embeddings
#[async_trait::async_trait]
pub trait VectorStore: Send + Sync {
    async fn insert(&self, record: &VectorRecord) -> Result<()>;

    /// The `k` nearest records by ascending cosine distance
    async fn nearest_neighbors(&self, embedding: &[f32], k: usize) -> Result<Vec<VectorHit>>;

    async fn count(&self) -> Result<i64>;
}

/// SQLite-backed vector store with exact (brute-force) search.
///
/// The pool hands out a connection per operation and takes it back on every
/// exit path.
pub struct SqliteVectorStore {
    pool: SqlitePool,
    dimensions: usize,
}

impl SqliteVectorStore {
    pub async fn connect(config: &VectorStoreConfig, dimensions: usize) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await
            .map_err(|e| Error::ServiceUnavailable(format!("Vector store: {}", e)))?;

        let store = Self::from_pool(pool, dimensions).await?;
        info!(
            "Vector store ready (dims={}, max_connections={})",
            dimensions, config.max_connections
        );
        Ok(store)
    }

    pub async fn from_pool(pool: SqlitePool, dimensions: usize) -> Result<Self> {
        let store = Self { pool, dimensions };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create tables and pin the store's dimensionality on first use
    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                content TEXT NOT NULL,
                metadata TEXT NOT NULL,
                embedding BLOB NOT NULL
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS vector_store_meta (
                key TEXT PRIMARY KEY,
                value INTEGER NOT NULL
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("INSERT OR IGNORE INTO vector_store_meta (key, value) VALUES ('dimensions', ?)")
            .bind(self.dimensions as i64)
            .execute(&self.pool)
            .await?;

        let (stored,): (i64,) =
            sqlx::query_as("SELECT value FROM vector_store_meta WHERE key = 'dimensions'")
                .fetch_one(&self.pool)
                .await?;

        if stored as usize != self.dimensions {
            return Err(Error::DimensionMismatch {
                expected: stored as usize,
                actual: self.dimensions,
            });
        }

        Ok(())
    }

    fn check_dimensions(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimensions {
            return Err(Error::DimensionMismatch {
                expected: self.dimensions,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait::async_trait]
impl VectorStore for SqliteVectorStore {
    async fn insert(&self, record: &VectorRecord) -> Result<()> {
        self.check_dimensions(&record.embedding)?;

        let metadata_json = serde_json::to_string(&record.metadata)?;

        sqlx::query("INSERT INTO chunks (content, metadata, embedding) VALUES (?, ?, ?)")
            .bind(&record.content)
            .bind(&metadata_json)
            .bind(serialize_vector(&record.embedding))
            .execute(&self.pool)
            .await?;

        debug!(
            source = %record.metadata.source,
            chunk_index = record.metadata.chunk_index,
            "Stored vector record"
        );
        Ok(())
    }

    async fn nearest_neighbors(&self, embedding: &[f32], k: usize) -> Result<Vec<VectorHit>> {
        if k == 0 {
            return Err(Error::InvalidInput("k must be positive".into()));
        }
        self.check_dimensions(embedding)?;

        let rows: Vec<(String, String, Vec<u8>)> =
            sqlx::query_as("SELECT content, metadata, embedding FROM chunks ORDER BY id")
                .fetch_all(&self.pool)
                .await?;

        let mut hits = Vec::with_capacity(rows.len());
        for (content, metadata_json, bytes) in rows {
            let metadata: ChunkMetadata = serde_json::from_str(&metadata_json)?;
            let distance = cosine_distance(embedding, &deserialize_vector(&bytes));
            hits.push(VectorHit {
                content,
                metadata,
                distance,
            });
        }

        // Stable sort: equal distances keep insertion order
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(k);

        Ok(hits)
    }

    async fn count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

/// Serialize vector to bytes (little-endian Float32)
fn serialize_vector(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for &v in vector {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

fn deserialize_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// `1 - cosine similarity`; a zero vector is maximally distant from everything
fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64) * (*x as f64);
        norm_b += (*y as f64) * (*y as f64);
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }

    1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
}
