//! # Loggers
//!
//! Process-wide `tracing` subscriber setup shared by the binaries.

/// Console plus rolling JSON file logging.
pub mod setup;

pub use setup::{parse_level, setup_logging, LoggerError, LOG_LEVELS};
