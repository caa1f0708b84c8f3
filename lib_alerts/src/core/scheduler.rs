//! # Poll Scheduler
//!
//! One independent timer loop per configured source. Each tick runs a full
//! poll cycle: fetch with bounded retries, then push every new record through
//! the dedup gate into the worker pool in feed order.
//!
//! ## Cycle rules
//! - The first poll runs as soon as the loop starts (the first interval tick
//!   completes immediately).
//! - A cycle whose every attempt fails is abandoned whole; nothing from it
//!   is admitted and the loop waits for the next tick.
//! - Shutdown is observed while waiting for a tick, during a backoff wait and
//!   while blocked on a full worker queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::backoff::{RetryOutcome, RetryPolicy};
use super::dedup::DedupGate;
use super::worker_pool::WorkerPool;
use crate::ingestors::FeedSource;
use crate::models::DisasterEvent;

/// Counters for one completed poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Fetch attempts used.
    pub attempts: u32,
    /// Records the feed returned.
    pub fetched: usize,
    /// Records submitted to the pool.
    pub admitted: usize,
    /// Records the gate turned away.
    pub skipped: usize,
}

/// How one poll cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The fetch succeeded and the batch went through the gate.
    Completed(CycleReport),
    /// Every attempt failed.
    Abandoned {
        /// Attempts used.
        attempts: u32,
    },
    /// Shutdown interrupted the cycle.
    Cancelled,
}

/// Timer loop for one source.
pub struct PollScheduler {
    source: Arc<dyn FeedSource>,
    interval: Duration,
    retry: RetryPolicy,
    gate: Arc<DedupGate>,
    pool: Arc<WorkerPool<DisasterEvent>>,
}

impl PollScheduler {
    /// Creates a scheduler polling `source` every `interval`.
    pub fn new(
        source: Arc<dyn FeedSource>,
        interval: Duration,
        retry: RetryPolicy,
        gate: Arc<DedupGate>,
        pool: Arc<WorkerPool<DisasterEvent>>,
    ) -> Self {
        Self { source, interval, retry, gate, pool }
    }

    /// Runs poll cycles until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        let name = self.source.name().to_string();
        info!(source = %name, interval_secs = self.interval.as_secs(), "starting poller");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let CycleOutcome::Cancelled = self.poll_once(&cancel).await {
                break;
            }
        }

        info!(source = %name, "poller shutting down");
    }

    /// Runs a single poll cycle.
    pub async fn poll_once(&self, cancel: &CancellationToken) -> CycleOutcome {
        let source = &self.source;
        let name = source.name();
        debug!(source = name, "polling");

        let outcome = self
            .retry
            .run(cancel, move |attempt| {
                debug!(source = name, attempt, "fetching feed");
                source.fetch()
            })
            .await;

        let (events, attempts) = match outcome {
            RetryOutcome::Succeeded { value, attempts } => (value, attempts),
            RetryOutcome::Exhausted { last_error, attempts } => {
                error!(source = name, attempts, error = %last_error, "poll failed, abandoning cycle");
                return CycleOutcome::Abandoned { attempts };
            }
            RetryOutcome::Cancelled { attempts } => {
                info!(source = name, attempts, "poll cancelled");
                return CycleOutcome::Cancelled;
            }
        };

        let mut report = CycleReport { attempts, fetched: events.len(), ..Default::default() };
        for event in events {
            if cancel.is_cancelled() {
                return CycleOutcome::Cancelled;
            }
            if !self.gate.admit(&event).await {
                report.skipped += 1;
                continue;
            }
            let submitted = tokio::select! {
                biased;
                _ = cancel.cancelled() => return CycleOutcome::Cancelled,
                result = self.pool.submit(event) => result,
            };
            if let Err(e) = submitted {
                warn!(source = name, error = %e, "worker pool refused record, stopping cycle");
                return CycleOutcome::Cancelled;
            }
            report.admitted += 1;
        }

        debug!(source = name, fetched = report.fetched, admitted = report.admitted, skipped = report.skipped, "poll complete");
        CycleOutcome::Completed(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::{DisasterStore, MemoryStore};
    use crate::core::worker_pool::JobHandler;
    use crate::ingestors::IngestError;
    use crate::models::{Category, SourceKind};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct FixedFeed {
        events: Vec<DisasterEvent>,
        calls: AtomicU32,
        failures_before_success: u32,
    }

    #[async_trait]
    impl FeedSource for FixedFeed {
        fn kind(&self) -> SourceKind {
            SourceKind::Gdacs
        }

        async fn fetch(&self) -> Result<Vec<DisasterEvent>, IngestError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures_before_success {
                return Err(IngestError::Decode { feed: SourceKind::Gdacs, reason: "flaky".into() });
            }
            Ok(self.events.clone())
        }
    }

    #[derive(Default)]
    struct Sink(Mutex<Vec<String>>);

    #[async_trait]
    impl JobHandler<DisasterEvent> for Sink {
        async fn handle(&self, job: DisasterEvent) {
            self.0.lock().unwrap().push(job.id);
        }
    }

    fn feed(native_ids: &[&str], failures_before_success: u32) -> Arc<FixedFeed> {
        Arc::new(FixedFeed {
            events: native_ids.iter().map(|n| DisasterEvent::new(SourceKind::Gdacs, n, Category::Flood)).collect(),
            calls: AtomicU32::new(0),
            failures_before_success,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn skips_known_records_and_retries_failures() {
        let store = Arc::new(MemoryStore::new());
        store.add(&DisasterEvent::new(SourceKind::Gdacs, "b", Category::Flood)).await.unwrap();

        let sink = Arc::new(Sink::default());
        let pool = Arc::new(WorkerPool::<DisasterEvent>::start(1, 4, sink.clone()));
        let source = feed(&["a", "b", "c"], 2);
        let scheduler = PollScheduler::new(
            source.clone(),
            Duration::from_secs(60),
            RetryPolicy::default(),
            Arc::new(DedupGate::new(store)),
            pool.clone(),
        );

        let outcome = scheduler.poll_once(&CancellationToken::new()).await;
        assert_eq!(outcome, CycleOutcome::Completed(CycleReport { attempts: 3, fetched: 3, admitted: 2, skipped: 1 }));

        pool.shutdown(Duration::from_secs(1)).await.unwrap();
        assert_eq!(*sink.0.lock().unwrap(), vec!["gdacs_a", "gdacs_c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn abandons_cycle_after_five_attempts() {
        let pool = Arc::new(WorkerPool::<DisasterEvent>::start(1, 4, Arc::new(Sink::default())));
        let source = feed(&["a"], u32::MAX);
        let scheduler = PollScheduler::new(
            source.clone(),
            Duration::from_secs(60),
            RetryPolicy::default(),
            Arc::new(DedupGate::new(Arc::new(MemoryStore::new()))),
            pool,
        );

        let outcome = scheduler.poll_once(&CancellationToken::new()).await;
        assert_eq!(outcome, CycleOutcome::Abandoned { attempts: 5 });
        assert_eq!(source.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn run_polls_immediately_then_per_interval() {
        let pool = Arc::new(WorkerPool::<DisasterEvent>::start(1, 4, Arc::new(Sink::default())));
        let source = feed(&[], 0);
        let scheduler = PollScheduler::new(
            source.clone(),
            Duration::from_secs(60),
            RetryPolicy::default(),
            Arc::new(DedupGate::new(Arc::new(MemoryStore::new()))),
            pool,
        );

        let cancel = CancellationToken::new();
        let task = tokio::spawn(scheduler.run(cancel.clone()));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);

        cancel.cancel();
        task.await.unwrap();
    }
}
