//! # Configuration Modules
//!
//! This module aggregates the pipeline's configuration types. Layering of
//! defaults, files, environment and CLI flags happens in the server binary;
//! this module owns the shape, the defaults and validation.

/// Pipeline settings, defaults and validation.
pub mod pipeline_config;

pub use pipeline_config::{
    ConfigError, PipelineConfig, PolicyConfig, PolicyMode, RetryConfig, SourceConfig, WorkerConfig,
    GDACS_DEFAULT_URL, MIN_POLL_INTERVAL_SECS, USGS_DEFAULT_URL,
};
