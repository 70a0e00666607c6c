use actix_web::{web, HttpResponse, Result as ActixResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use hybridrag_core::config::Config;
use hybridrag_core::query::validate_top_k;
use hybridrag_core::{
    Error, GraphStore, HybridQueryEngine, IngestionCoordinator, OllamaClient, OpenAIEmbedder,
    SqliteGraphStore, SqliteVectorStore, TextDocumentConverter,
};

const DEFAULT_GRAPH_LIMIT: usize = 100;

/// Shared application state
pub struct AppState {
    pub coordinator: Arc<IngestionCoordinator>,
    pub engine: Arc<HybridQueryEngine>,
    pub graph: Arc<dyn GraphStore>,
    pub config: Arc<Config>,
}

/// Concrete stores, kept so they can be closed on shutdown
pub struct Backends {
    pub vectors: Arc<SqliteVectorStore>,
    pub graph: Arc<SqliteGraphStore>,
}

impl Backends {
    pub async fn close(&self) {
        self.vectors.close().await;
        self.graph.close().await;
    }
}

/// Wire the providers named in `config` into the ingestion and query pipelines
pub async fn build_state(config: Config) -> anyhow::Result<(AppState, Backends)> {
    let embedder = Arc::new(OpenAIEmbedder::from_config(&config.embedding)?);
    let llm = Arc::new(OllamaClient::from_config(&config.llm));
    let converter = Arc::new(TextDocumentConverter::from_config(&config.ingestion)?);

    let vectors =
        Arc::new(SqliteVectorStore::connect(&config.vector_store, config.embedding.dimensions).await?);
    // Connects lazily, with retry, on first use
    let graph = Arc::new(SqliteGraphStore::new(&config.graph_store));

    let coordinator = IngestionCoordinator::new(
        embedder.clone(),
        vectors.clone(),
        graph.clone(),
        llm.clone(),
        converter,
    )
    .with_concurrency(config.ingestion.concurrency)
    .with_root_dir(&config.ingestion.root_dir)?;

    let engine = HybridQueryEngine::new(
        embedder,
        vectors.clone(),
        graph.clone(),
        llm,
        config.query.clone(),
    );

    let state = AppState {
        coordinator: Arc::new(coordinator),
        engine: Arc::new(engine),
        graph: graph.clone(),
        config: Arc::new(config),
    };
    Ok((state, Backends { vectors, graph }))
}

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: Option<String>,
}

fn error_response(context: &str, err: &Error) -> HttpResponse {
    let body = ErrorResponse {
        error: context.to_string(),
        message: Some(err.to_string()),
    };
    if err.is_invalid_input() {
        HttpResponse::BadRequest().json(body)
    } else {
        tracing::error!("{}: {}", context, err);
        HttpResponse::InternalServerError().json(body)
    }
}

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub paths: Vec<String>,
}

/// Per-file ingestion outcome
#[derive(Debug, Serialize, Deserialize)]
pub struct FileOutcome {
    pub path: String,
    pub success: bool,
    pub chunks: usize,
    pub failed_chunks: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IngestResponse {
    pub files: Vec<FileOutcome>,
    pub succeeded: usize,
    pub failed: usize,
}

/// Ingest documents from local paths
/// POST /ingest
#[tracing::instrument(skip(req, state), fields(files = req.paths.len()))]
pub async fn ingest(
    req: web::Json<IngestRequest>,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    if req.paths.is_empty() {
        return Ok(HttpResponse::BadRequest().json(ErrorResponse {
            error: "paths is required".to_string(),
            message: None,
        }));
    }

    let mut files = Vec::with_capacity(req.paths.len());
    for path in &req.paths {
        let outcome = match state.coordinator.ingest_file(path).await {
            Ok(report) => {
                let failed_chunks = report.failed_chunks().count();
                FileOutcome {
                    path: path.clone(),
                    success: report.is_success(),
                    chunks: report.chunks.len(),
                    failed_chunks,
                    error: (failed_chunks > 0)
                        .then(|| format!("{} of {} chunks failed", failed_chunks, report.chunks.len())),
                }
            }
            Err(e) => {
                tracing::warn!(path = %path, "Ingestion failed: {}", e);
                FileOutcome {
                    path: path.clone(),
                    success: false,
                    chunks: 0,
                    failed_chunks: 0,
                    error: Some(e.to_string()),
                }
            }
        };
        files.push(outcome);
    }

    let succeeded = files.iter().filter(|f| f.success).count();
    Ok(HttpResponse::Ok().json(IngestResponse {
        failed: files.len() - succeeded,
        succeeded,
        files,
    }))
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    pub top_k: Option<i64>,
}

/// Answer a question from the knowledge base
/// POST /query
#[tracing::instrument(skip(req, state))]
pub async fn query(
    req: web::Json<QueryRequest>,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let top_k = match validate_top_k(
        req.top_k
            .unwrap_or(state.engine.default_top_k() as i64),
    ) {
        Ok(top_k) => top_k,
        Err(e) => return Ok(error_response("invalid top_k", &e)),
    };

    match state.engine.answer(&req.query, top_k).await {
        Ok(answer) => Ok(HttpResponse::Ok().json(answer)),
        Err(e) => Ok(error_response("query failed", &e)),
    }
}

#[derive(Debug, Deserialize)]
pub struct GraphParams {
    pub limit: Option<usize>,
}

/// Bounded node/edge snapshot for visualisation
/// GET /graph
#[tracing::instrument(skip(params, state))]
pub async fn graph(
    params: web::Query<GraphParams>,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let limit = params.limit.unwrap_or(DEFAULT_GRAPH_LIMIT);
    match state.graph.snapshot(limit).await {
        Ok(snapshot) => Ok(HttpResponse::Ok().json(snapshot)),
        Err(e) => Ok(error_response("failed to read graph", &e)),
    }
}

/// Store counts
/// GET /stats
#[tracing::instrument(skip(state))]
pub async fn stats(state: web::Data<AppState>) -> ActixResult<HttpResponse> {
    match state.engine.status().await {
        Ok(status) => Ok(HttpResponse::Ok().json(status)),
        Err(e) => Ok(error_response("failed to read store status", &e)),
    }
}

/// GET /health
pub async fn health(state: web::Data<AppState>) -> ActixResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "embedding_model": state.config.embedding.model,
        "llm_model": state.config.llm.model,
    })))
}

/// Configure API routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/ingest", web::post().to(ingest))
        .route("/query", web::post().to(query))
        .route("/graph", web::get().to(graph))
        .route("/stats", web::get().to(stats))
        .route("/health", web::get().to(health));
}
