//! Query boundary.
//!
//! Request/response access to stored records for the REST layer: normalizes
//! the result cap and hands back the store's newest-first list.

use std::sync::Arc;

use crate::connections::{DisasterStore, StoreError};
use crate::models::{DisasterEvent, EventFilter};

/// Read-only view of the store.
#[derive(Clone)]
pub struct QueryService {
    store: Arc<dyn DisasterStore>,
}

impl QueryService {
    /// Creates a service over `store`.
    pub fn new(store: Arc<dyn DisasterStore>) -> Self {
        Self { store }
    }

    /// Records matching `filter`, newest first, at most `filter.effective_limit()`.
    pub async fn list(&self, filter: &EventFilter) -> Result<Vec<DisasterEvent>, StoreError> {
        let filter = EventFilter { limit: Some(filter.effective_limit()), ..filter.clone() };
        self.store.list(&filter).await
    }

    /// One record by id.
    pub async fn get(&self, id: &str) -> Result<DisasterEvent, StoreError> {
        self.store.get(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::MemoryStore;
    use crate::models::{Category, SourceKind, DEFAULT_LIMIT, MAX_LIMIT};
    use chrono::{Duration, Utc};

    async fn store_with(count: usize) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        for n in 0..count {
            let event = DisasterEvent {
                event_time: now - Duration::minutes(n as i64),
                ..DisasterEvent::new(SourceKind::Usgs, &n.to_string(), Category::Earthquake)
            };
            store.add(&event).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn applies_default_and_maximum_caps() {
        let service = QueryService::new(store_with(MAX_LIMIT + 10).await);

        assert_eq!(service.list(&EventFilter::default()).await.unwrap().len(), DEFAULT_LIMIT);
        let huge = EventFilter { limit: Some(10_000), ..Default::default() };
        assert_eq!(service.list(&huge).await.unwrap().len(), MAX_LIMIT);
    }

    #[tokio::test]
    async fn newest_first() {
        let service = QueryService::new(store_with(3).await);
        let ids: Vec<String> = service.list(&EventFilter::default()).await.unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["usgs_0", "usgs_1", "usgs_2"]);
    }
}
