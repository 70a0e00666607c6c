use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::chunking::DocumentConverter;
use crate::embedder::Embedder;
use crate::graph::GraphStore;
use crate::llm::LanguageModel;
use crate::models::{Chunk, ChunkOutcome, ChunkReport, DocumentReport, VectorRecord};
use crate::triplets::{normalize, TripletExtractor};
use crate::vector_store::VectorStore;
use crate::{Error, Result};

pub const DEFAULT_CONCURRENCY: usize = 4;

/// Per-chunk pipeline shared by every worker
#[derive(Clone)]
struct ChunkWorker {
    embedder: Arc<dyn Embedder>,
    vectors: Arc<dyn VectorStore>,
    graph: Arc<dyn GraphStore>,
    extractor: TripletExtractor,
}

impl ChunkWorker {
    /// embed -> store vector -> extract -> normalize -> upsert.
    /// Returns the number of relationships written.
    async fn process(&self, chunk: &Chunk) -> Result<usize> {
        let embedding = self.embedder.embed(&chunk.text).await?;
        self.vectors
            .insert(&VectorRecord::from_chunk(chunk, embedding))
            .await?;

        let triplets = self.extractor.extract(&chunk.text).await;
        let relationships = normalize(&triplets);
        for relationship in &relationships {
            self.graph.upsert(relationship).await?;
        }

        Ok(relationships.len())
    }
}

/// Fans a document's chunks out to a bounded worker pool
pub struct IngestionCoordinator {
    worker: ChunkWorker,
    converter: Arc<dyn DocumentConverter>,
    concurrency: usize,
    /// Canonical directory that `ingest_file` may read from; unrestricted when `None`
    root: Option<PathBuf>,
}

impl IngestionCoordinator {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        vectors: Arc<dyn VectorStore>,
        graph: Arc<dyn GraphStore>,
        llm: Arc<dyn LanguageModel>,
        converter: Arc<dyn DocumentConverter>,
    ) -> Self {
        Self {
            worker: ChunkWorker {
                embedder,
                vectors,
                graph,
                extractor: TripletExtractor::new(llm),
            },
            converter,
            concurrency: DEFAULT_CONCURRENCY,
            root: None,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Confine `ingest_file` to files under `root`, which must exist
    pub fn with_root_dir(mut self, root: impl AsRef<Path>) -> Result<Self> {
        self.root = Some(std::fs::canonicalize(root)?);
        Ok(self)
    }

    /// Resolve a requested path against the root, rejecting anything that
    /// escapes it (`..`, symlinks, absolute paths elsewhere)
    async fn resolve(&self, path: &str) -> Result<PathBuf> {
        let Some(root) = &self.root else {
            return Ok(PathBuf::from(path));
        };

        let requested = Path::new(path);
        let candidate = if requested.is_absolute() {
            requested.to_path_buf()
        } else {
            root.join(requested)
        };

        let resolved = tokio::fs::canonicalize(&candidate)
            .await
            .map_err(|e| Error::InvalidInput(format!("cannot resolve {}: {}", path, e)))?;

        if !resolved.starts_with(root) {
            return Err(Error::InvalidInput(format!(
                "{} is outside the ingestion root",
                path
            )));
        }
        Ok(resolved)
    }

    /// Process every chunk and return one report per chunk, ordered by index.
    ///
    /// A failing chunk never aborts the others; its error lands in its own
    /// report.
    pub async fn ingest(&self, chunks: Vec<Chunk>) -> Vec<ChunkReport> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = FuturesUnordered::new();
        let mut reports = Vec::with_capacity(chunks.len());

        for chunk in chunks {
            let index = chunk.index;
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    reports.push(failed(index, e.to_string()));
                    continue;
                }
            };
            let worker = self.worker.clone();

            let handle = tokio::spawn(async move {
                let result = worker.process(&chunk).await;
                drop(permit); // Release worker slot
                result
            });
            tasks.push(async move { (index, handle.await) });
        }

        while let Some((index, joined)) = tasks.next().await {
            let report = match joined {
                Ok(Ok(triplets)) => ChunkReport {
                    index,
                    outcome: ChunkOutcome::Ok,
                    triplets,
                },
                Ok(Err(e)) => {
                    warn!(chunk_index = index, "Chunk ingestion failed: {}", e);
                    failed(index, e.to_string())
                }
                Err(e) => {
                    warn!(chunk_index = index, "Chunk worker aborted: {}", e);
                    failed(index, format!("worker aborted: {}", e))
                }
            };
            reports.push(report);
        }

        reports.sort_by_key(|r| r.index);
        reports
    }

    /// Convert a file and ingest its chunks.
    ///
    /// Conversion errors are returned as `Err`; chunk-level failures are
    /// reported inside the `DocumentReport`.
    #[tracing::instrument(skip(self))]
    pub async fn ingest_file(&self, path: &str) -> Result<DocumentReport> {
        if path.trim().is_empty() {
            return Err(Error::InvalidInput("document path must not be empty".into()));
        }

        let resolved = self.resolve(path).await?;
        let chunks = self.converter.convert(&resolved).await?;
        if chunks.is_empty() {
            warn!("Document produced no chunks");
        }

        let total = chunks.len();
        let reports = self.ingest(chunks).await;
        let report = DocumentReport {
            source: path.to_string(),
            chunks: reports,
            ingested_at: Utc::now(),
        };

        info!(
            "Ingested {}: {} chunks, {} failed",
            path,
            total,
            report.failed_chunks().count()
        );
        Ok(report)
    }
}

fn failed(index: usize, reason: String) -> ChunkReport {
    ChunkReport {
        index,
        outcome: ChunkOutcome::Failed(reason),
        triplets: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::TextDocumentConverter;
    use crate::graph::SqliteGraphStore;
    use crate::llm::OutputMode;
    use crate::testing::{memory_pool, KeywordEmbedder, ScriptedModel};
    use crate::vector_store::SqliteVectorStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const DIMS: usize = 32;

    struct Harness {
        coordinator: IngestionCoordinator,
        vectors: Arc<SqliteVectorStore>,
        graph: Arc<SqliteGraphStore>,
    }

    async fn harness(embedder: Arc<dyn Embedder>, llm: Arc<dyn LanguageModel>) -> Harness {
        let vectors = Arc::new(
            SqliteVectorStore::from_pool(memory_pool().await, DIMS)
                .await
                .unwrap(),
        );
        let graph = Arc::new(SqliteGraphStore::from_pool(memory_pool().await).await.unwrap());
        let converter = Arc::new(TextDocumentConverter::new(512, 50).unwrap());

        let coordinator = IngestionCoordinator::new(
            embedder,
            vectors.clone(),
            graph.clone(),
            llm,
            converter,
        );
        Harness {
            coordinator,
            vectors,
            graph,
        }
    }

    fn paris_model() -> Arc<ScriptedModel> {
        Arc::new(ScriptedModel::new(|_, _| {
            Ok(r#"[{"subject": "Paris", "predicate": "capital of", "object": "France"}]"#.into())
        }))
    }

    #[tokio::test]
    async fn test_failed_chunk_does_not_block_others() {
        let embedder = Arc::new(KeywordEmbedder::new(DIMS).failing_on("beta"));
        let h = harness(embedder, paris_model()).await;

        let chunks = vec![
            Chunk::new("alpha text", "doc.txt", 0),
            Chunk::new("beta text", "doc.txt", 1),
            Chunk::new("gamma text", "doc.txt", 2),
        ];
        let reports = h.coordinator.ingest(chunks).await;

        assert_eq!(reports.len(), 3);
        assert!(reports[0].outcome.is_ok());
        assert!(matches!(reports[1].outcome, ChunkOutcome::Failed(_)));
        assert!(reports[2].outcome.is_ok());
        assert_eq!(reports[0].triplets, 1);
        assert_eq!(reports[1].triplets, 0);
        assert_eq!(reports[2].triplets, 1);
        assert_eq!(h.vectors.count().await.unwrap(), 2);

        let hits = h.graph.traverse("Paris", 1, 15).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].to_string(), "Paris CAPITAL_OF France");
    }

    #[tokio::test]
    async fn test_malformed_extraction_keeps_vector_record() {
        let llm = Arc::new(ScriptedModel::new(|_, _| Ok("not json at all".into())));
        let h = harness(Arc::new(KeywordEmbedder::new(DIMS)), llm).await;

        let reports = h
            .coordinator
            .ingest(vec![Chunk::new("Paris is lovely.", "doc.txt", 0)])
            .await;

        assert!(reports[0].outcome.is_ok());
        assert_eq!(reports[0].triplets, 0);
        assert_eq!(h.vectors.count().await.unwrap(), 1);
        assert_eq!(h.graph.stats().await.unwrap().entity_count, 0);
    }

    #[tokio::test]
    async fn test_extraction_service_error_degrades_to_no_triplets() {
        let llm = Arc::new(ScriptedModel::new(|_, _| {
            Err(Error::ServiceUnavailable("llm down".into()))
        }));
        let h = harness(Arc::new(KeywordEmbedder::new(DIMS)), llm).await;

        let reports = h
            .coordinator
            .ingest(vec![Chunk::new("Paris is lovely.", "doc.txt", 0)])
            .await;

        assert!(reports[0].outcome.is_ok());
        assert_eq!(h.vectors.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_repeated_ingest_keeps_graph_unique() {
        let h = harness(Arc::new(KeywordEmbedder::new(DIMS)), paris_model()).await;

        let chunks: Vec<_> = (0..5)
            .map(|i| Chunk::new("Paris is the capital of France.", "doc.txt", i))
            .collect();
        let reports = h.coordinator.ingest(chunks).await;
        assert!(reports.iter().all(|r| r.outcome.is_ok()));

        let stats = h.graph.stats().await.unwrap();
        assert_eq!(stats.entity_count, 2);
        assert_eq!(stats.relationship_count, 1);
        assert_eq!(h.vectors.count().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_reports_are_ordered_by_chunk_index() {
        let h = harness(Arc::new(KeywordEmbedder::new(DIMS)), paris_model()).await;

        let chunks = vec![
            Chunk::new("third", "doc.txt", 2),
            Chunk::new("first", "doc.txt", 0),
            Chunk::new("second", "doc.txt", 1),
        ];
        let reports = h.coordinator.ingest(chunks).await;
        let indexes: Vec<_> = reports.iter().map(|r| r.index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);
    }

    /// Tracks the peak number of concurrent embed calls
    struct GaugedEmbedder {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Embedder for GaugedEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let mut v = vec![0.0; DIMS];
            v[0] = 1.0;
            Ok(v)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_worker_pool_is_bounded() {
        let embedder = Arc::new(GaugedEmbedder {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let llm = Arc::new(ScriptedModel::new(|_, _| Ok("[]".into())));
        let mut h = harness(embedder.clone(), llm).await;
        h.coordinator = h.coordinator.with_concurrency(2);

        let chunks: Vec<_> = (0..8)
            .map(|i| Chunk::new(format!("chunk {}", i), "doc.txt", i))
            .collect();
        let reports = h.coordinator.ingest(chunks).await;

        assert_eq!(reports.len(), 8);
        assert!(reports.iter().all(|r| r.outcome.is_ok()));
        let peak = embedder.peak.load(Ordering::SeqCst);
        assert!(peak >= 1 && peak <= 2, "peak concurrency was {}", peak);
    }

    #[tokio::test]
    async fn test_ingest_file_rejects_empty_path() {
        let llm = paris_model();
        let embedder = Arc::new(KeywordEmbedder::new(DIMS));
        let h = harness(embedder.clone(), llm.clone()).await;

        let err = h.coordinator.ingest_file("  ").await.unwrap_err();
        assert!(err.is_invalid_input());
        assert_eq!(embedder.calls(), 0);
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_ingest_file_end_to_end() {
        let path = std::env::temp_dir().join(format!("hybridrag-ingest-{}.txt", std::process::id()));
        tokio::fs::write(&path, "Paris is the capital of France.")
            .await
            .unwrap();

        let llm = Arc::new(ScriptedModel::new(|prompt, mode| {
            assert_eq!(mode, OutputMode::Json);
            assert!(prompt.contains("Paris is the capital of France."));
            Ok(r#"{"triplets": [{"subject": "Paris", "predicate": "is capital of", "object": "France"}]}"#.into())
        }));
        let h = harness(Arc::new(KeywordEmbedder::new(DIMS)), llm).await;

        let report = h
            .coordinator
            .ingest_file(&path.to_string_lossy())
            .await
            .unwrap();
        tokio::fs::remove_file(&path).await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.chunks.len(), 1);
        assert_eq!(report.chunks[0].triplets, 1);

        let hits = h.graph.traverse("paris", 2, 15).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].to_string(), "Paris IS_CAPITAL_OF France");
    }

    #[tokio::test]
    async fn test_ingest_file_is_confined_to_root_dir() {
        let base = std::env::temp_dir().join(format!("hybridrag-root-{}", std::process::id()));
        let root = base.join("documents");
        tokio::fs::create_dir_all(&root).await.unwrap();
        tokio::fs::write(root.join("inside.txt"), "Paris is the capital of France.")
            .await
            .unwrap();
        tokio::fs::write(base.join("config.json"), r#"{"secret": true}"#)
            .await
            .unwrap();

        let llm = paris_model();
        let embedder = Arc::new(KeywordEmbedder::new(DIMS));
        let mut h = harness(embedder.clone(), llm.clone()).await;
        h.coordinator = h.coordinator.with_root_dir(&root).unwrap();

        let outside = base.join("config.json");
        let err = h
            .coordinator
            .ingest_file(&outside.to_string_lossy())
            .await
            .unwrap_err();
        assert!(err.is_invalid_input());

        let err = h.coordinator.ingest_file("../config.json").await.unwrap_err();
        assert!(err.is_invalid_input());

        let err = h.coordinator.ingest_file("missing.txt").await.unwrap_err();
        assert!(err.is_invalid_input());

        assert_eq!(embedder.calls(), 0);
        assert_eq!(llm.calls(), 0);

        let report = h.coordinator.ingest_file("inside.txt").await.unwrap();
        tokio::fs::remove_dir_all(&base).await.unwrap();

        assert!(report.is_success());
        assert_eq!(h.vectors.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_ingest_file_surfaces_conversion_errors() {
        let h = harness(Arc::new(KeywordEmbedder::new(DIMS)), paris_model()).await;
        let err = h.coordinator.ingest_file("/tmp/slides.pptx").await.unwrap_err();
        assert!(matches!(err, Error::UnsupportedDocument(_)));
    }
}
