//! # In-Memory Store
//!
//! A `tokio::sync::RwLock<HashMap>` backend. Used when no database URL is
//! configured and by the test suites. Nothing survives a restart.

use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::store::{DisasterStore, StoreError};
use crate::models::{DisasterEvent, EventFilter};

/// Process-local [`DisasterStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, DisasterEvent>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

/// Newest `event_time` first, then newest `ingested_at`, then `id`.
fn newest_first(a: &DisasterEvent, b: &DisasterEvent) -> Ordering {
    b.event_time
        .cmp(&a.event_time)
        .then_with(|| b.ingested_at.cmp(&a.ingested_at))
        .then_with(|| a.id.cmp(&b.id))
}

#[async_trait]
impl DisasterStore for MemoryStore {
    async fn add(&self, event: &DisasterEvent) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        if records.contains_key(&event.id) {
            return Err(StoreError::Duplicate(event.id.clone()));
        }
        records.insert(event.id.clone(), event.clone());
        Ok(())
    }

    async fn exists(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.records.read().await.contains_key(id))
    }

    async fn get(&self, id: &str) -> Result<DisasterEvent, StoreError> {
        self.records
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn list(&self, filter: &EventFilter) -> Result<Vec<DisasterEvent>, StoreError> {
        let records = self.records.read().await;
        let mut matched: Vec<DisasterEvent> = records.values().filter(|e| filter.matches(e)).cloned().collect();
        matched.sort_by(newest_first);
        matched.truncate(filter.effective_limit());
        Ok(matched)
    }

    async fn mark_delivered(&self, ids: &[String]) -> Result<u64, StoreError> {
        let mut records = self.records.write().await;
        let mut changed = 0;
        for id in ids {
            if let Some(record) = records.get_mut(id) {
                if !record.delivered {
                    record.delivered = true;
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }
}
