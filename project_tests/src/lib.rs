//! # Pipeline Test Support
//!
//! Scripted collaborators shared by the integration tests under `tests/`:
//! feeds that return canned batches or fail on cue, a store whose individual
//! operations can be switched to "unavailable", and event fixtures.

#![forbid(unsafe_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use lib_alerts::connections::{DisasterStore, MemoryStore, StoreError};
use lib_alerts::ingestors::{FeedSource, IngestError};
use lib_alerts::models::{Category, DisasterEvent, EventFilter, SeverityLevel, SourceKind};

/// Fixed reference instant so event times are deterministic.
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).single().unwrap_or_default()
}

/// A record with the fields the pipeline cares about set. `minutes` offsets
/// `event_time` from [`base_time`].
pub fn sample_event(
    source: SourceKind,
    native_id: &str,
    category: Category,
    magnitude: f64,
    severity: SeverityLevel,
    minutes: i64,
) -> DisasterEvent {
    DisasterEvent {
        title: format!("{category} {native_id}"),
        magnitude,
        severity_level: severity,
        event_time: base_time() + Duration::minutes(minutes),
        ..DisasterEvent::new(source, native_id, category)
    }
}

/// The two-record GDACS batch: an M6.0 earthquake and an orange flood.
pub fn gdacs_pair() -> Vec<DisasterEvent> {
    vec![
        sample_event(SourceKind::Gdacs, "1", Category::Earthquake, 6.0, SeverityLevel::Green, 0),
        sample_event(SourceKind::Gdacs, "2", Category::Flood, 0.0, SeverityLevel::Orange, 1),
    ]
}

fn decode_failure(kind: SourceKind, reason: &str) -> IngestError {
    IngestError::Decode { feed: kind, reason: reason.to_string() }
}

/// Replays a script of fetch results, one per call. Once the script runs
/// out every further call returns an empty batch.
pub struct ScriptedFeed {
    kind: SourceKind,
    script: Mutex<VecDeque<Result<Vec<DisasterEvent>, String>>>,
    calls: AtomicU32,
}

impl ScriptedFeed {
    pub fn new(kind: SourceKind) -> Self {
        Self { kind, script: Mutex::new(VecDeque::new()), calls: AtomicU32::new(0) }
    }

    /// Queues a successful batch.
    pub fn then_batch(self, events: Vec<DisasterEvent>) -> Self {
        self.push(Ok(events));
        self
    }

    /// Queues a failed fetch.
    pub fn then_fail(self, reason: &str) -> Self {
        self.push(Err(reason.to_string()));
        self
    }

    fn push(&self, step: Result<Vec<DisasterEvent>, String>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(step);
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeedSource for ScriptedFeed {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn fetch(&self) -> Result<Vec<DisasterEvent>, IngestError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match step {
            Some(Ok(events)) => Ok(events),
            Some(Err(reason)) => Err(decode_failure(self.kind, &reason)),
            None => Ok(Vec::new()),
        }
    }
}

/// Fails the first `failures` fetches, then returns `events` on every call.
pub struct FlakyFeed {
    kind: SourceKind,
    failures: u32,
    events: Vec<DisasterEvent>,
    calls: AtomicU32,
}

impl FlakyFeed {
    pub fn new(kind: SourceKind, failures: u32, events: Vec<DisasterEvent>) -> Self {
        Self { kind, failures, events, calls: AtomicU32::new(0) }
    }

    /// A feed that never recovers.
    pub fn always_failing(kind: SourceKind) -> Self {
        Self::new(kind, u32::MAX, Vec::new())
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeedSource for FlakyFeed {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn fetch(&self) -> Result<Vec<DisasterEvent>, IngestError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(decode_failure(self.kind, "upstream returned garbage"));
        }
        Ok(self.events.clone())
    }
}

/// A [`MemoryStore`] whose operations can be made to fail on demand.
#[derive(Default)]
pub struct FailingStore {
    inner: MemoryStore,
    pub fail_exists: AtomicBool,
    pub fail_add: AtomicBool,
    pub fail_mark: AtomicBool,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(flag: &AtomicBool, on: bool) {
        flag.store(on, Ordering::SeqCst);
    }

    fn check(flag: &AtomicBool, op: &str) -> Result<(), StoreError> {
        if flag.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable(format!("{op} switched off")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DisasterStore for FailingStore {
    async fn add(&self, event: &DisasterEvent) -> Result<(), StoreError> {
        Self::check(&self.fail_add, "add")?;
        self.inner.add(event).await
    }

    async fn exists(&self, id: &str) -> Result<bool, StoreError> {
        Self::check(&self.fail_exists, "exists")?;
        self.inner.exists(id).await
    }

    async fn get(&self, id: &str) -> Result<DisasterEvent, StoreError> {
        self.inner.get(id).await
    }

    async fn list(&self, filter: &EventFilter) -> Result<Vec<DisasterEvent>, StoreError> {
        self.inner.list(filter).await
    }

    async fn mark_delivered(&self, ids: &[String]) -> Result<u64, StoreError> {
        Self::check(&self.fail_mark, "mark_delivered")?;
        self.inner.mark_delivered(ids).await
    }
}
