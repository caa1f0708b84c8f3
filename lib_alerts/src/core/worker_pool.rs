//! # Bounded Worker Pool
//!
//! N tokio tasks drain one bounded `mpsc` queue of depth M, handing every job
//! to a shared [`JobHandler`].
//!
//! ## Core Design Principles:
//!
//! 1.  **Backpressure, not loss**: [`WorkerPool::submit`] awaits queue space. A
//!     slow handler (e.g. slow persistence) throttles the pollers feeding it
//!     instead of growing memory.
//!
//! 2.  **Drain on shutdown**: [`WorkerPool::shutdown`] drops the only long-lived
//!     sender. Workers keep receiving until the queue is empty and every sender
//!     clone is gone, then exit. The caller bounds the wait with a timeout.
//!
//! 3.  **One receiver, many workers**: the receiver sits behind a
//!     `tokio::sync::Mutex`; a worker holds it only while waiting for the next
//!     job, never while handling one.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Errors from [`WorkerPool`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    /// The pool no longer accepts work.
    #[error("worker pool is closed")]
    Closed,
    /// Workers did not finish within the shutdown bound.
    #[error("worker pool did not drain within {0:?}")]
    ShutdownTimeout(Duration),
}

/// The single processing function every worker runs.
#[async_trait]
pub trait JobHandler<J>: Send + Sync {
    /// Handles one job. Failures are the handler's to log; the worker moves on.
    async fn handle(&self, job: J);
}

/// Fixed-size pool over a bounded queue.
pub struct WorkerPool<J> {
    sender: Mutex<Option<mpsc::Sender<J>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
}

impl<J: Send + 'static> WorkerPool<J> {
    /// Spawns `workers` tasks sharing a queue of `queue_depth` slots.
    /// Both values are raised to at least 1.
    pub fn start(workers: usize, queue_depth: usize, handler: Arc<dyn JobHandler<J>>) -> Self {
        let size = workers.max(1);
        let (tx, rx) = mpsc::channel::<J>(queue_depth.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(rx));

        let handles = (0..size)
            .map(|worker_id| {
                let receiver = Arc::clone(&receiver);
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    debug!(worker_id, "worker started");
                    loop {
                        let next = { receiver.lock().await.recv().await };
                        match next {
                            Some(job) => handler.handle(job).await,
                            None => break,
                        }
                    }
                    debug!(worker_id, "worker stopped");
                })
            })
            .collect();

        info!(workers = size, queue_depth = queue_depth.max(1), "worker pool started");
        Self { sender: Mutex::new(Some(tx)), workers: Mutex::new(handles), size }
    }

    /// Number of workers.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether [`WorkerPool::shutdown`] has been called.
    pub fn is_closed(&self) -> bool {
        self.sender.lock().unwrap_or_else(PoisonError::into_inner).is_none()
    }

    /// Enqueues `job`, waiting while the queue is full.
    ///
    /// # Errors
    /// [`PoolError::Closed`] once shutdown has started.
    pub async fn submit(&self, job: J) -> Result<(), PoolError> {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(PoolError::Closed)?;
        sender.send(job).await.map_err(|_| PoolError::Closed)
    }

    /// Stops accepting work, lets the workers drain the queue, and waits for
    /// them for at most `timeout`. Calling it again is a no-op.
    ///
    /// # Errors
    /// [`PoolError::ShutdownTimeout`] when the workers are still busy at the bound.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), PoolError> {
        drop(self.sender.lock().unwrap_or_else(PoisonError::into_inner).take());
        let handles = std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));
        if handles.is_empty() {
            return Ok(());
        }

        let join_all = async {
            for handle in handles {
                if let Err(e) = handle.await {
                    error!(error = %e, "worker task failed");
                }
            }
        };

        match tokio::time::timeout(timeout, join_all).await {
            Ok(()) => {
                info!("worker pool drained");
                Ok(())
            }
            Err(_) => {
                error!(?timeout, "worker pool shutdown timed out");
                Err(PoolError::ShutdownTimeout(timeout))
            }
        }
    }
}
