//! Dedup gate
//!
//! Consults the store's existence check before a record enters the worker
//! pool. The check is not atomic with the later insert; the store's
//! primary-key constraint is what actually guarantees one row per id.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::connections::DisasterStore;
use crate::models::DisasterEvent;

/// Existence-check filter in front of the worker pool.
pub struct DedupGate {
    store: Arc<dyn DisasterStore>,
    /// Count of records rejected as already stored
    rejected: AtomicU64,
    /// Count of records let through
    admitted: AtomicU64,
}

impl DedupGate {
    /// Create a gate over `store`
    pub fn new(store: Arc<dyn DisasterStore>) -> Self {
        Self { store, rejected: AtomicU64::new(0), admitted: AtomicU64::new(0) }
    }

    /// Whether `event` should be submitted for processing.
    ///
    /// A failing existence check admits the record; the insert will reject it
    /// later if it turns out to be stored already.
    pub async fn admit(&self, event: &DisasterEvent) -> bool {
        match self.store.exists(&event.id).await {
            Ok(true) => {
                debug!(id = %event.id, "already stored, not admitted");
                self.rejected.fetch_add(1, Ordering::Relaxed);
                false
            }
            Ok(false) => {
                self.admitted.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                warn!(id = %event.id, error = %e, "existence check failed, admitting");
                self.admitted.fetch_add(1, Ordering::Relaxed);
                true
            }
        }
    }

    /// Records turned away so far
    pub fn rejected_count(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Records let through so far
    pub fn admitted_count(&self) -> u64 {
        self.admitted.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::MemoryStore;
    use crate::models::{Category, SourceKind};

    #[tokio::test]
    async fn admits_only_absent_ids() {
        let store = Arc::new(MemoryStore::new());
        let stored = DisasterEvent::new(SourceKind::Gdacs, "1", Category::Flood);
        store.add(&stored).await.unwrap();

        let gate = DedupGate::new(store);
        assert!(!gate.admit(&stored).await);
        assert!(gate.admit(&DisasterEvent::new(SourceKind::Gdacs, "2", Category::Flood)).await);
        assert_eq!(gate.rejected_count(), 1);
        assert_eq!(gate.admitted_count(), 1);
    }
}
