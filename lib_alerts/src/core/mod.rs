//! # Core Engine Module
//!
//! This module forms the heart of the disaster alert pipeline. It aggregates
//! every stage between a fetched feed and a live subscriber. The components
//! are asynchronous, thread-safe, and talk to each other only through bounded
//! queues and the broadcaster's registry.
//!
//! ## Core Components:
//!
//! - **`scheduler`** + **`backoff`**: one timer loop per source, each tick a
//!   bounded retry loop with exponential backoff.
//!
//! - **`dedup`**: existence check in front of the worker pool.
//!
//! - **`worker_pool`** + **`processor`**: N workers draining a bounded queue,
//!   each persisting a record and publishing it if the `policy` allows.
//!
//! - **`broadcaster`**: the non-blocking, zero-copy pub/sub hub.
//!
//! - **`session`**: per-subscriber filter-and-forward state machine.
//!
//! - **`ledger`** + **`query`**: acknowledgement protocol and read access for
//!   downstream sinks.
//!
//! - **`pipeline`**: wiring and shutdown sequencing.

#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Bounded retry with exponential backoff.
pub mod backoff;
/// The central, zero-copy broadcaster for persisted records.
pub mod broadcaster;
/// Existence check in front of the worker pool.
pub mod dedup;
/// Acknowledgement protocol over the store.
pub mod ledger;
/// Wiring and shutdown sequencing.
pub mod pipeline;
/// Broadcast-worthiness rules.
pub mod policy;
/// Persist-then-publish processing function.
pub mod processor;
/// Read access to stored records.
pub mod query;
/// Per-source timer loop.
pub mod scheduler;
/// Per-subscriber streaming session.
pub mod session;
/// Fixed-size worker pool over a bounded queue.
pub mod worker_pool;

// --- Public API Re-exports ---
pub use backoff::{RetryOutcome, RetryPolicy};
pub use broadcaster::{Broadcaster, Inbox, PublishReport, SubscriberId, Subscription, DEFAULT_INBOX_CAPACITY};
pub use dedup::DedupGate;
pub use ledger::{AcknowledgementLedger, LedgerError};
pub use pipeline::{Pipeline, PipelineError, PipelineSettings};
pub use policy::{BroadcastAll, BroadcastPolicy, ThresholdPolicy};
pub use processor::{EventProcessor, ProcessOutcome, ProcessorStats};
pub use query::QueryService;
pub use scheduler::{CycleOutcome, CycleReport, PollScheduler};
pub use session::{
    ChannelSink, CloseReason, EventSink, SessionError, SessionSummary, SinkError, StreamSession,
};
pub use worker_pool::{JobHandler, PoolError, WorkerPool};
