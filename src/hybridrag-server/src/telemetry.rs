//! Structured logging to console and a rotating JSON log file
//!
//! - `logs/hybridrag.log`, rotated daily or at 10MB, whichever comes first
//! - Span open/close events so each ingestion and query is traceable
//! - `RUST_LOG` overrides the default filter

use anyhow::Result;
use rolling_file::{RollingConditionBasic, RollingFileAppender};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

pub const LOG_FILE: &str = "hybridrag.log";

const DEFAULT_FILTER: &str = "hybridrag_server=debug,hybridrag_core=debug,actix_web=info";

const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;

/// Numbered files kept per day
const MAX_LOG_FILES: usize = 9;

fn file_appender(log_dir: &Path) -> Result<RollingFileAppender<RollingConditionBasic>> {
    std::fs::create_dir_all(log_dir)?;
    let appender = RollingFileAppender::new(
        log_dir.join(LOG_FILE),
        RollingConditionBasic::new().daily().max_size(MAX_LOG_BYTES),
        MAX_LOG_FILES,
    )?;
    Ok(appender)
}

/// Install the global subscriber.
///
/// Keep the returned guard alive for the life of the process; dropping it
/// flushes buffered log lines.
pub fn init_telemetry(log_dir: &Path) -> Result<WorkerGuard> {
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender(log_dir)?);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let file_layer = fmt::layer()
        .json()
        .with_writer(non_blocking_file)
        .with_span_events(FmtSpan::CLOSE)
        .with_current_span(true)
        .with_target(true)
        .with_thread_ids(true);

    let console_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()?;

    tracing::info!(
        "Logging to {:?} (daily rotation, {}MB max per file)",
        log_dir.join(LOG_FILE),
        MAX_LOG_BYTES / (1024 * 1024)
    );

    Ok(guard)
}

pub fn shutdown_telemetry(guard: WorkerGuard) {
    tracing::info!("Telemetry shutdown complete");
    drop(guard);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_appender_creates_log_dir() {
        let dir = std::env::temp_dir().join(format!("hybridrag-logs-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);

        let appender = file_appender(&dir).unwrap();
        drop(appender);

        assert!(dir.is_dir());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
