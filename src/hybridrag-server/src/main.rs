use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use std::path::Path;
use tracing_actix_web::TracingLogger;

use hybridrag_core::config::Config;
use hybridrag_server::{api, telemetry};

#[actix_web::main]
async fn main() -> Result<()> {
    let guard = telemetry::init_telemetry(Path::new("./logs"))?;

    let config = Config::load("config.json")
        .unwrap_or_else(|e| {
            tracing::warn!("Failed to load config.json ({}), using defaults", e);
            Config::default()
        })
        .with_env_overrides();

    tracing::info!("hybridrag starting");
    tracing::info!("  Port: {}", config.port);
    tracing::info!(
        "  Embedding: {} ({} dims) at {}",
        config.embedding.model,
        config.embedding.dimensions,
        config.embedding.url
    );
    tracing::info!("  LLM: {} at {}", config.llm.model, config.llm.url);
    tracing::info!("  Vector store: {}", config.vector_store.url);
    tracing::info!("  Graph store: {}", config.graph_store.url);
    tracing::info!(
        "  Ingestion: root={}, concurrency={}, chunk_size={}, overlap={}",
        config.ingestion.root_dir,
        config.ingestion.concurrency,
        config.ingestion.chunk_size,
        config.ingestion.chunk_overlap
    );
    tracing::info!(
        "  Query: top_k={}, max_hops={}, per_entity_limit={}",
        config.query.top_k,
        config.query.max_hops,
        config.query.per_entity_limit
    );
    tracing::info!(
        "  CORS: enabled={}, origins={:?}",
        config.cors.enabled,
        config.cors.allowed_origins
    );

    // Default store URLs live under ./data
    std::fs::create_dir_all("./data")?;
    std::fs::create_dir_all(&config.ingestion.root_dir)?;

    let bind_addr = format!("0.0.0.0:{}", config.port);
    let cors_config = config.cors.clone();

    let (state, backends) = api::build_state(config).await?;
    let app_state = web::Data::new(state);
    tracing::info!("✓ Stores and model clients initialized");

    tracing::info!("🚀 Starting HTTP server on {}", bind_addr);
    let server = HttpServer::new(move || {
        let mut cors = Cors::default();

        if cors_config.enabled {
            for origin in &cors_config.allowed_origins {
                cors = cors.allowed_origin(origin);
            }
            cors = cors
                .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                .allowed_headers(vec![
                    actix_web::http::header::ACCEPT,
                    actix_web::http::header::CONTENT_TYPE,
                ])
                .max_age(3600);
        }

        App::new()
            .app_data(app_state.clone())
            .wrap(cors)
            .wrap(TracingLogger::default())
            .configure(api::configure)
    })
    .bind(&bind_addr)?
    .run();

    tracing::info!("Server running, press Ctrl+C to stop");
    server.await?;

    tracing::info!("Closing stores...");
    backends.close().await;

    telemetry::shutdown_telemetry(guard);
    Ok(())
}
