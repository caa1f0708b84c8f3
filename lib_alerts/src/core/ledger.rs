//! # Acknowledgement Ledger
//!
//! Records which persisted events a downstream sink has processed, so a sink
//! that restarts can tell which records it must not post again. The ledger
//! keeps no per-sink state; the `delivered` flag in storage is the ledger.
//!
//! `delivered` only ever moves from false to true. Re-acknowledging and
//! acknowledging unknown ids are both no-ops that count 0.

use std::collections::BTreeSet;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error};

use crate::connections::{DisasterStore, StoreError};
use crate::models::{DisasterEvent, EventFilter};

/// Acknowledgement failures. Never swallowed; the caller decides when to retry.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The store could not record or read acknowledgements.
    #[error("acknowledgement store failure: {0}")]
    Store(#[from] StoreError),
}

/// Thin protocol layer over the store's `delivered` flag.
#[derive(Clone)]
pub struct AcknowledgementLedger {
    store: Arc<dyn DisasterStore>,
}

impl AcknowledgementLedger {
    /// Creates a ledger over `store`.
    pub fn new(store: Arc<dyn DisasterStore>) -> Self {
        Self { store }
    }

    /// Marks each id delivered and returns how many records actually changed.
    /// Repeated ids in `ids` count once.
    ///
    /// # Errors
    /// [`LedgerError::Store`] if the write fails.
    pub async fn mark_delivered(&self, ids: &[String]) -> Result<u64, LedgerError> {
        let unique: Vec<String> = ids.iter().cloned().collect::<BTreeSet<_>>().into_iter().collect();
        if unique.is_empty() {
            return Ok(0);
        }

        match self.store.mark_delivered(&unique).await {
            Ok(count) => {
                debug!(requested = unique.len(), acknowledged = count, "acknowledgements recorded");
                Ok(count)
            }
            Err(e) => {
                error!(requested = unique.len(), error = %e, "acknowledgement write failed");
                Err(e.into())
            }
        }
    }

    /// Records matching `filter` that no sink has acknowledged yet, newest
    /// first.
    ///
    /// The result is capped like any query: `filter.limit`, 20 when unset, at
    /// most 500. A sink reconciling a larger backlog acknowledges what it
    /// got and calls again until the list comes back empty.
    pub async fn pending(&self, filter: &EventFilter) -> Result<Vec<DisasterEvent>, LedgerError> {
        let filter = EventFilter { delivered: Some(false), ..filter.clone() };
        Ok(self.store.list(&filter).await?)
    }

    /// The subset of `ids` already acknowledged. Unknown ids are left out.
    pub async fn already_delivered(&self, ids: &[String]) -> Result<Vec<String>, LedgerError> {
        let mut delivered = Vec::new();
        for id in ids.iter().collect::<BTreeSet<_>>() {
            match self.store.get(id).await {
                Ok(event) if event.delivered => delivered.push(id.clone()),
                Ok(_) | Err(StoreError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(delivered)
    }
}
