//! # Pipeline
//!
//! Owns and wires every stage: one poll scheduler task per source, the dedup
//! gate, the worker pool running the [`EventProcessor`], and the broadcaster
//! feeding live sessions.
//!
//! ## Shutdown sequencing
//! 1. Cancel the shared token: pollers stop at their next suspension point.
//! 2. Join the pollers, so nothing new is submitted.
//! 3. Close the worker pool and let it drain in-flight records.
//! 4. Close the broadcaster, which ends every live session.
//!
//! All of it runs under one caller-supplied time bound.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::backoff::RetryPolicy;
use super::broadcaster::Broadcaster;
use super::dedup::DedupGate;
use super::ledger::AcknowledgementLedger;
use super::policy::{BroadcastAll, BroadcastPolicy, ThresholdPolicy};
use super::processor::{EventProcessor, ProcessorStats};
use super::query::QueryService;
use super::scheduler::PollScheduler;
use super::session::StreamSession;
use super::worker_pool::{JobHandler, PoolError, WorkerPool};
use crate::configs::{ConfigError, PipelineConfig, PolicyMode};
use crate::connections::DisasterStore;
use crate::ingestors::{FeedSource, SourceAdapter};
use crate::models::{DisasterEvent, EventFilter};
use crate::retrieve::{ApiClient, ClientOptions, FetchError};

/// Errors from building or stopping a [`Pipeline`].
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Configuration rejected at startup.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The shared HTTP client could not be built.
    #[error(transparent)]
    Client(#[from] FetchError),
    /// The worker pool refused work or did not drain in time.
    #[error(transparent)]
    Pool(#[from] PoolError),
    /// Poller tasks were still running at the shutdown bound.
    #[error("pollers did not stop within {0:?}")]
    PollerTimeout(Duration),
}

/// Runtime knobs for [`Pipeline::new`].
#[derive(Clone)]
pub struct PipelineSettings {
    /// Worker count.
    pub workers: usize,
    /// Work queue depth.
    pub queue_depth: usize,
    /// Per-subscriber inbox size.
    pub inbox_capacity: usize,
    /// Per-cycle retry policy.
    pub retry: RetryPolicy,
    /// Broadcast-worthiness rule.
    pub policy: Arc<dyn BroadcastPolicy>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_depth: 20,
            inbox_capacity: 100,
            retry: RetryPolicy::default(),
            policy: Arc::new(ThresholdPolicy::default()),
        }
    }
}

impl PipelineSettings {
    /// Settings described by `config`.
    pub fn from_config(config: &PipelineConfig) -> Self {
        let policy: Arc<dyn BroadcastPolicy> = match config.policy.mode {
            PolicyMode::Threshold => Arc::new(ThresholdPolicy {
                earthquake_min_magnitude: config.policy.earthquake_min_magnitude,
                min_severity: config.policy.min_severity,
            }),
            PolicyMode::All => Arc::new(BroadcastAll),
        };
        Self {
            workers: config.workers.count,
            queue_depth: config.workers.queue_depth,
            inbox_capacity: config.inbox_capacity,
            retry: RetryPolicy::new(config.retry.max_attempts, Duration::from_millis(config.retry.base_delay_ms)),
            policy,
        }
    }
}

/// The running ingestion and fan-out pipeline.
pub struct Pipeline {
    store: Arc<dyn DisasterStore>,
    broadcaster: Arc<Broadcaster>,
    gate: Arc<DedupGate>,
    processor: Arc<EventProcessor>,
    pool: Arc<WorkerPool<DisasterEvent>>,
    retry: RetryPolicy,
    cancel: CancellationToken,
    pollers: Mutex<Vec<JoinHandle<()>>>,
}

impl Pipeline {
    /// Builds the stages and starts the worker pool. No source is polled
    /// until [`Pipeline::spawn_source`] is called.
    pub fn new(store: Arc<dyn DisasterStore>, settings: PipelineSettings) -> Self {
        let broadcaster = Arc::new(Broadcaster::new(settings.inbox_capacity));
        let gate = Arc::new(DedupGate::new(Arc::clone(&store)));
        let processor = Arc::new(EventProcessor::new(Arc::clone(&store), Arc::clone(&broadcaster), settings.policy.clone()));
        let handler: Arc<dyn JobHandler<DisasterEvent>> = processor.clone();
        let pool = Arc::new(WorkerPool::start(settings.workers, settings.queue_depth, handler));
        info!(policy = settings.policy.name(), "pipeline ready");

        Self {
            store,
            broadcaster,
            gate,
            processor,
            pool,
            retry: settings.retry,
            cancel: CancellationToken::new(),
            pollers: Mutex::new(Vec::new()),
        }
    }

    /// Validates `config`, builds the pipeline and spawns a poller for every
    /// enabled source.
    pub fn from_config(config: &PipelineConfig, store: Arc<dyn DisasterStore>) -> Result<Self, PipelineError> {
        config.validate()?;
        let client = ApiClient::new(&ClientOptions { timeout: config.http_timeout(), ..Default::default() })?;

        let pipeline = Self::new(store, PipelineSettings::from_config(config));
        for source in config.enabled_sources() {
            let url = source.parsed_url()?;
            if let Some(adapter) = SourceAdapter::from_config(source, client.clone(), url) {
                pipeline.spawn_source(Arc::new(adapter), source.poll_interval());
            }
        }
        Ok(pipeline)
    }

    /// A scheduler for `source` wired to this pipeline's gate and pool.
    pub fn scheduler(&self, source: Arc<dyn FeedSource>, interval: Duration) -> PollScheduler {
        PollScheduler::new(source, interval, self.retry, Arc::clone(&self.gate), Arc::clone(&self.pool))
    }

    /// Starts polling `source` every `interval` until shutdown.
    pub fn spawn_source(&self, source: Arc<dyn FeedSource>, interval: Duration) {
        let scheduler = self.scheduler(source, interval);
        let handle = tokio::spawn(scheduler.run(self.cancel.child_token()));
        self.pollers.lock().unwrap_or_else(PoisonError::into_inner).push(handle);
    }

    /// Pushes a manually supplied record through the gate and the pool.
    /// Returns `false` when the gate already knows the id.
    pub async fn inject(&self, event: DisasterEvent) -> Result<bool, PipelineError> {
        if self.pool.is_closed() {
            return Err(PoolError::Closed.into());
        }
        if !self.gate.admit(&event).await {
            return Ok(false);
        }
        self.pool.submit(event).await?;
        Ok(true)
    }

    /// Opens a live session filtered by `filter`.
    pub fn open_session(&self, filter: EventFilter) -> StreamSession {
        StreamSession::open(Arc::clone(&self.broadcaster), filter)
    }

    /// Query boundary over the store.
    pub fn query(&self) -> QueryService {
        QueryService::new(Arc::clone(&self.store))
    }

    /// Acknowledgement ledger over the store.
    pub fn ledger(&self) -> AcknowledgementLedger {
        AcknowledgementLedger::new(Arc::clone(&self.store))
    }

    /// The persistence collaborator.
    pub fn store(&self) -> &Arc<dyn DisasterStore> {
        &self.store
    }

    /// The broadcaster.
    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    /// Processing totals.
    pub fn stats(&self) -> ProcessorStats {
        self.processor.stats()
    }

    /// Token cancelled at the start of shutdown; sessions listen on it.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stops pollers, drains the pool, then closes the broadcaster, all
    /// within `timeout`. The broadcaster is closed even when a stage overruns.
    ///
    /// # Errors
    /// The first stage that overran the bound.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), PipelineError> {
        info!(?timeout, "pipeline shutting down");
        let deadline = Instant::now() + timeout;
        self.cancel.cancel();

        let pollers = std::mem::take(&mut *self.pollers.lock().unwrap_or_else(PoisonError::into_inner));
        let join_pollers = async {
            for poller in pollers {
                if let Err(e) = poller.await {
                    error!(error = %e, "poller task failed");
                }
            }
        };

        let mut result = Ok(());
        if tokio::time::timeout_at(deadline, join_pollers).await.is_err() {
            warn!("pollers still running at shutdown bound");
            result = Err(PipelineError::PollerTimeout(timeout));
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if let Err(e) = self.pool.shutdown(remaining).await {
            if result.is_ok() {
                result = Err(e.into());
            }
        }

        self.broadcaster.close();
        info!(stats = ?self.processor.stats(), "pipeline stopped");
        result
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
