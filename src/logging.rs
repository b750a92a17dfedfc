//! Logging initialization.
//!
//! Always logs to stderr; with `BOT_LOG_FILE` set, also appends plain-text
//! logs to that file through a non-blocking writer.

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LogConfig;

/// Result of logging initialization
pub struct LoggingHandle {
    /// Guard that must be kept alive for the duration of the program.
    /// When dropped, ensures all buffered logs are flushed.
    pub _guard: Option<WorkerGuard>,

    /// Path to the log file, when file logging is enabled.
    pub log_file_path: Option<PathBuf>,
}

/// Initialize the global subscriber. Call once.
pub fn init_logging(config: &LogConfig) -> Result<LoggingHandle> {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| config.level.clone()),
    );

    let (file_layer, guard) = match &config.file {
        Some(path) => {
            let (dir, file_name) = split_log_path(path)?;
            std::fs::create_dir_all(&dir)?;
            let file_appender = tracing_appender::rolling::never(&dir, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false) // No ANSI codes in log files
                .with_writer(non_blocking);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(file_layer)
        .init();

    Ok(LoggingHandle {
        _guard: guard,
        log_file_path: config.file.clone(),
    })
}

/// Split a log file path into its directory and file name.
fn split_log_path(path: &Path) -> Result<(PathBuf, String)> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow::anyhow!("log file path has no file name: {}", path.display()))?
        .to_string();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((dir, file_name))
}
