//! # Event Processor
//!
//! The single processing function run by every worker: re-check existence,
//! persist, then publish if the broadcast policy allows.
//!
//! A record is either fully persisted (and possibly published) or not
//! processed at all. A duplicate-key rejection is an expected race outcome and
//! never reaches the broadcaster.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use super::broadcaster::Broadcaster;
use super::policy::BroadcastPolicy;
use super::worker_pool::JobHandler;
use crate::connections::{DisasterStore, StoreError};
use crate::models::DisasterEvent;

/// What happened to one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Inserted; `broadcast` says whether it was published.
    Persisted {
        /// Published to live subscribers.
        broadcast: bool,
    },
    /// The re-check found it already stored.
    AlreadyPresent,
    /// The insert hit the primary key.
    Duplicate,
    /// The insert failed for another reason; the record is dropped this cycle.
    Failed,
}

/// Running totals across every worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessorStats {
    /// Records inserted.
    pub persisted: u64,
    /// Records published.
    pub broadcast: u64,
    /// Records skipped by the re-check or rejected by the key.
    pub duplicates: u64,
    /// Records lost to storage failures.
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    persisted: AtomicU64,
    broadcast: AtomicU64,
    duplicates: AtomicU64,
    failed: AtomicU64,
}

/// Persist-then-publish stage.
pub struct EventProcessor {
    store: Arc<dyn DisasterStore>,
    broadcaster: Arc<Broadcaster>,
    policy: Arc<dyn BroadcastPolicy>,
    counters: Counters,
}

impl EventProcessor {
    /// Wires the processor to its collaborators.
    pub fn new(store: Arc<dyn DisasterStore>, broadcaster: Arc<Broadcaster>, policy: Arc<dyn BroadcastPolicy>) -> Self {
        Self { store, broadcaster, policy, counters: Counters::default() }
    }

    /// Processes one admitted record.
    pub async fn process(&self, event: DisasterEvent) -> ProcessOutcome {
        match self.store.exists(&event.id).await {
            Ok(true) => {
                debug!(id = %event.id, "already stored at processing time");
                self.counters.duplicates.fetch_add(1, Ordering::Relaxed);
                return ProcessOutcome::AlreadyPresent;
            }
            Ok(false) => {}
            Err(e) => warn!(id = %event.id, error = %e, "existence re-check failed, attempting insert"),
        }

        match self.store.add(&event).await {
            Ok(()) => {}
            Err(StoreError::Duplicate(id)) => {
                debug!(%id, "duplicate key on insert");
                self.counters.duplicates.fetch_add(1, Ordering::Relaxed);
                return ProcessOutcome::Duplicate;
            }
            Err(e) => {
                error!(id = %event.id, error = %e, "failed to persist record, dropping for this cycle");
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                return ProcessOutcome::Failed;
            }
        }
        self.counters.persisted.fetch_add(1, Ordering::Relaxed);

        let broadcast = self.policy.should_broadcast(&event);
        info!(id = %event.id, category = %event.category, source = %event.source, broadcast, "record persisted");
        if broadcast {
            let report = self.broadcaster.publish(Arc::new(event));
            debug!(delivered = report.delivered, dropped = report.dropped, "record published");
            self.counters.broadcast.fetch_add(1, Ordering::Relaxed);
        }
        ProcessOutcome::Persisted { broadcast }
    }

    /// Snapshot of the running totals.
    pub fn stats(&self) -> ProcessorStats {
        ProcessorStats {
            persisted: self.counters.persisted.load(Ordering::Relaxed),
            broadcast: self.counters.broadcast.load(Ordering::Relaxed),
            duplicates: self.counters.duplicates.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl JobHandler<DisasterEvent> for EventProcessor {
    async fn handle(&self, job: DisasterEvent) {
        self.process(job).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::MemoryStore;
    use crate::core::policy::ThresholdPolicy;
    use crate::models::{Category, EventFilter, SeverityLevel, SourceKind};

    fn processor(store: Arc<MemoryStore>, hub: Arc<Broadcaster>) -> EventProcessor {
        EventProcessor::new(store, hub, Arc::new(ThresholdPolicy::default()))
    }

    #[tokio::test]
    async fn persists_then_publishes_when_policy_allows() {
        let store = Arc::new(MemoryStore::new());
        let hub = Arc::new(Broadcaster::default());
        let mut sub = hub.subscribe();
        let processor = processor(store.clone(), hub.clone());

        let quake = DisasterEvent { magnitude: 6.0, ..DisasterEvent::new(SourceKind::Usgs, "big", Category::Earthquake) };
        let minor = DisasterEvent { magnitude: 3.0, ..DisasterEvent::new(SourceKind::Usgs, "small", Category::Earthquake) };

        assert_eq!(processor.process(quake).await, ProcessOutcome::Persisted { broadcast: true });
        assert_eq!(processor.process(minor).await, ProcessOutcome::Persisted { broadcast: false });
        assert_eq!(sub.inbox.recv().await.unwrap().id, "usgs_big");
        assert!(sub.inbox.try_recv().is_err());
        assert_eq!(store.list(&EventFilter::default()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn second_submission_is_not_broadcast() {
        let store = Arc::new(MemoryStore::new());
        let hub = Arc::new(Broadcaster::default());
        let mut sub = hub.subscribe();
        let processor = processor(store, hub);

        let flood = DisasterEvent {
            severity_level: SeverityLevel::Red,
            ..DisasterEvent::new(SourceKind::Gdacs, "7", Category::Flood)
        };
        processor.process(flood.clone()).await;
        assert_eq!(processor.process(flood).await, ProcessOutcome::AlreadyPresent);

        sub.inbox.recv().await.unwrap();
        assert!(sub.inbox.try_recv().is_err());
        assert_eq!(processor.stats(), ProcessorStats { persisted: 1, broadcast: 1, duplicates: 1, failed: 0 });
    }
}
