//! # Storage Contract
//!
//! Primary-key uniqueness on `id` is the backstop for deduplication: a second
//! `add` with the same id must fail with [`StoreError::Duplicate`] and leave
//! the stored record untouched.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{DisasterEvent, EventFilter};

/// Custom error types for storage operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A record with this id is already stored.
    #[error("duplicate id: {0}")]
    Duplicate(String),
    /// No record with this id.
    #[error("record not found: {0}")]
    NotFound(String),
    /// Any non-duplicate failure (connection, query, pool).
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Persistence collaborator consumed by the pipeline.
#[async_trait]
pub trait DisasterStore: Send + Sync {
    /// Stores a new record.
    ///
    /// # Errors
    /// [`StoreError::Duplicate`] when the id is taken.
    async fn add(&self, event: &DisasterEvent) -> Result<(), StoreError>;

    /// Whether a record with `id` is stored.
    async fn exists(&self, id: &str) -> Result<bool, StoreError>;

    /// Fetches one record.
    ///
    /// # Errors
    /// [`StoreError::NotFound`] when absent.
    async fn get(&self, id: &str) -> Result<DisasterEvent, StoreError>;

    /// Records matching `filter`, newest `event_time` first, capped by
    /// [`EventFilter::effective_limit`].
    async fn list(&self, filter: &EventFilter) -> Result<Vec<DisasterEvent>, StoreError>;

    /// Flips `delivered` to true for each named record that is still pending.
    /// Returns how many records actually changed.
    async fn mark_delivered(&self, ids: &[String]) -> Result<u64, StoreError>;

    /// Cheap liveness probe.
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
