//! # lib_alerts
//!
//! Disaster feed ingestion and live fan-out. Periodic polls of external feeds
//! become a deduplicated, persisted event stream that can be replayed through
//! queries and followed live through subscriber sessions.

#![forbid(unsafe_code)]

pub mod configs;
pub mod connections;
pub mod core;
pub mod ingestors;
pub mod loggers;
pub mod models;
pub mod retrieve;

pub use crate::core::{Pipeline, PipelineError, PipelineSettings};
pub use crate::models::{Category, DisasterEvent, EventFilter, SeverityLevel, SourceKind};
