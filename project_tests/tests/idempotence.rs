//! Submitting the same id twice persists one record and broadcasts it once.

use std::sync::Arc;
use std::time::Duration;

use lib_alerts::connections::{DisasterStore, MemoryStore, StoreError};
use lib_alerts::core::{
    Broadcaster, CycleOutcome, DedupGate, EventProcessor, Pipeline, PipelineSettings, ProcessOutcome, ThresholdPolicy,
};
use lib_alerts::models::{Category, EventFilter, SeverityLevel, SourceKind};
use project_tests::{sample_event, FailingStore, ScriptedFeed};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn repeated_id_across_polls_is_persisted_and_broadcast_once() {
    let store = Arc::new(MemoryStore::new());
    let pipeline = Pipeline::new(store.clone(), PipelineSettings { workers: 1, ..Default::default() });
    let mut subscriber = pipeline.broadcaster().subscribe();

    let quake = sample_event(SourceKind::Usgs, "dup1", Category::Earthquake, 6.5, SeverityLevel::Red, 0);
    let feed = Arc::new(ScriptedFeed::new(SourceKind::Usgs).then_batch(vec![quake.clone()]).then_batch(vec![quake]));
    let scheduler = pipeline.scheduler(feed.clone(), Duration::from_secs(60));
    let cancel = CancellationToken::new();

    assert!(matches!(scheduler.poll_once(&cancel).await, CycleOutcome::Completed(r) if r.admitted == 1));
    // Let the worker persist before the second poll so the gate sees it.
    tokio::time::timeout(Duration::from_secs(5), async {
        while !store.exists("usgs_dup1").await.unwrap() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
    assert!(matches!(scheduler.poll_once(&cancel).await, CycleOutcome::Completed(r) if r.skipped == 1 && r.admitted == 0));

    pipeline.shutdown(Duration::from_secs(5)).await.unwrap();

    assert_eq!(store.len().await, 1);
    assert_eq!(pipeline.stats().persisted, 1);
    assert_eq!(pipeline.stats().broadcast, 1);

    let mut received = Vec::new();
    while let Some(event) = subscriber.inbox.recv().await {
        received.push(event.id.clone());
    }
    assert_eq!(received, vec!["usgs_dup1".to_string()]);
}

#[tokio::test]
async fn second_processing_of_same_id_is_a_duplicate_not_a_broadcast() {
    let store: Arc<dyn DisasterStore> = Arc::new(MemoryStore::new());
    let broadcaster = Arc::new(Broadcaster::default());
    let mut subscriber = broadcaster.subscribe();
    let processor = EventProcessor::new(store.clone(), broadcaster.clone(), Arc::new(ThresholdPolicy::default()));

    let quake = sample_event(SourceKind::Gdacs, "9", Category::Earthquake, 7.0, SeverityLevel::Red, 0);
    assert_eq!(processor.process(quake.clone()).await, ProcessOutcome::Persisted { broadcast: true });
    assert_eq!(processor.process(quake.clone()).await, ProcessOutcome::AlreadyPresent);

    // The key itself rejects a second insert.
    assert_eq!(store.add(&quake).await, Err(StoreError::Duplicate("gdacs_9".to_string())));

    broadcaster.close();
    assert!(subscriber.inbox.recv().await.is_some());
    assert!(subscriber.inbox.recv().await.is_none());
    assert_eq!(processor.stats().broadcast, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_workers_persist_one_copy() {
    let store: Arc<dyn DisasterStore> = Arc::new(MemoryStore::new());
    let broadcaster = Arc::new(Broadcaster::default());
    let processor = Arc::new(EventProcessor::new(store.clone(), broadcaster, Arc::new(ThresholdPolicy::default())));
    let quake = sample_event(SourceKind::Usgs, "race", Category::Earthquake, 5.5, SeverityLevel::Orange, 0);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let processor = Arc::clone(&processor);
            let quake = quake.clone();
            tokio::spawn(async move { processor.process(quake).await })
        })
        .collect();

    let mut persisted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            ProcessOutcome::Persisted { .. } => persisted += 1,
            ProcessOutcome::AlreadyPresent | ProcessOutcome::Duplicate => {}
            ProcessOutcome::Failed => panic!("memory store never fails"),
        }
    }

    assert_eq!(persisted, 1);
    assert_eq!(store.list(&EventFilter::default()).await.unwrap().len(), 1);
    assert_eq!(processor.stats().broadcast, 1);
}

#[tokio::test]
async fn failed_existence_check_admits_and_the_key_still_holds() {
    let store = Arc::new(FailingStore::new());
    let quake = sample_event(SourceKind::Usgs, "gate", Category::Earthquake, 6.0, SeverityLevel::Orange, 0);
    store.add(&quake).await.unwrap();
    FailingStore::set(&store.fail_exists, true);

    let gate = DedupGate::new(store.clone());
    assert!(gate.admit(&quake).await);

    let processor =
        EventProcessor::new(store.clone(), Arc::new(Broadcaster::default()), Arc::new(ThresholdPolicy::default()));
    assert_eq!(processor.process(quake).await, ProcessOutcome::Duplicate);
    assert_eq!(gate.admitted_count(), 1);
}
