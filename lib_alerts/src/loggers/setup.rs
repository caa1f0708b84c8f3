//! # Logging Setup
//!
//! Installs the process-wide `tracing` subscriber: an `EnvFilter` (a set
//! `RUST_LOG` wins over the configured level), a human-readable console layer,
//! and a JSON file layer on a daily rolling, non-blocking appender.
//!
//! The returned [`WorkerGuard`] flushes the file writer when dropped, so the
//! caller keeps it alive for the life of the process.

use std::path::Path;

use thiserror::Error;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Levels accepted by [`setup_logging`].
pub const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Errors raised while installing the subscriber.
#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("invalid log level {0:?}, expected one of trace, debug, info, warn, error")]
    InvalidLevel(String),

    #[error("failed to create log directory {path}: {source}")]
    Io { path: String, source: std::io::Error },

    #[error("invalid log filter: {0}")]
    Filter(String),

    #[error("global subscriber already installed: {0}")]
    AlreadyInstalled(String),
}

/// Normalizes a configured level name.
pub fn parse_level(level: &str) -> Result<&'static str, LoggerError> {
    let wanted = level.trim().to_ascii_lowercase();
    LOG_LEVELS
        .into_iter()
        .find(|l| *l == wanted)
        .ok_or_else(|| LoggerError::InvalidLevel(level.to_string()))
}

/// Installs console and rolling JSON file logging for `app_name`.
pub fn setup_logging(log_dir: impl AsRef<Path>, level: &str, app_name: &str) -> Result<WorkerGuard, LoggerError> {
    let level = parse_level(level)?;
    let log_dir = log_dir.as_ref();

    // Create log directory if it doesn't exist
    std::fs::create_dir_all(log_dir)
        .map_err(|source| LoggerError::Io { path: log_dir.display().to_string(), source })?;

    let file_appender = rolling::daily(log_dir, format!("{app_name}.log"));
    let (non_blocking_appender, guard) = non_blocking(file_appender);

    let console_layer = fmt::layer().with_target(true).with_ansi(true);

    let file_layer = fmt::layer().with_ansi(false).with_writer(non_blocking_appender).json();

    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level).map_err(|e| LoggerError::Filter(e.to_string()))?,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| LoggerError::AlreadyInstalled(e.to_string()))?;

    info!(log_level = level, app = app_name, dir = %log_dir.display(), "logging initialized");
    Ok(guard)
}
