//! hybridrag - hybrid vector + knowledge-graph retrieval over your documents
//!
//! This crate provides both a library and binary for running hybridrag.
//!
//! # Embedded Usage
//!
//! ```rust,no_run
//! use hybridrag_core::config::Config;
//! use hybridrag_server::api::build_state;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let (state, backends) = build_state(Config::default()).await?;
//!     let report = state.coordinator.ingest_file("notes.md").await?;
//!     println!("{} chunks ingested", report.chunks.len());
//!
//!     let answer = state.engine.answer("What do my notes say about Paris?", 5).await?;
//!     println!("{}", answer.answer);
//!
//!     backends.close().await;
//!     Ok(())
//! }
//! ```
//!
//! # Server Usage
//!
//! Run the binary to start the REST API server:
//! ```bash
//! hybridrag-server
//! ```

pub use hybridrag_core;

pub mod api;
pub mod telemetry;
