//! An insert that fails for a reason other than a duplicate key drops the
//! record for that cycle only: nothing is stored or broadcast, the pipeline
//! keeps running, and the next poll admits and persists the same record.

use std::sync::Arc;
use std::time::Duration;

use lib_alerts::connections::DisasterStore;
use lib_alerts::core::{
    Broadcaster, CycleOutcome, CycleReport, EventProcessor, Pipeline, PipelineSettings, ProcessOutcome,
    ProcessorStats, ThresholdPolicy,
};
use lib_alerts::models::{Category, SeverityLevel, SourceKind};
use project_tests::{sample_event, FailingStore, ScriptedFeed};
use tokio_util::sync::CancellationToken;

async fn wait_for(pipeline: &Pipeline, done: impl Fn(ProcessorStats) -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !done(pipeline.stats()) {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("worker finished the record");
}

#[tokio::test]
async fn failed_insert_is_not_broadcast() {
    let store = Arc::new(FailingStore::new());
    FailingStore::set(&store.fail_add, true);
    let broadcaster = Arc::new(Broadcaster::default());
    let mut subscriber = broadcaster.subscribe();
    let processor = EventProcessor::new(store.clone(), broadcaster.clone(), Arc::new(ThresholdPolicy::default()));

    let quake = sample_event(SourceKind::Usgs, "down", Category::Earthquake, 7.1, SeverityLevel::Red, 0);
    assert_eq!(processor.process(quake).await, ProcessOutcome::Failed);
    assert_eq!(processor.stats(), ProcessorStats { persisted: 0, broadcast: 0, duplicates: 0, failed: 1 });
    assert!(!store.exists("usgs_down").await.unwrap());
    assert!(subscriber.inbox.try_recv().is_err());
}

#[tokio::test]
async fn next_poll_persists_a_record_the_store_refused() {
    let store = Arc::new(FailingStore::new());
    let pipeline = Pipeline::new(store.clone(), PipelineSettings { workers: 1, ..Default::default() });
    let mut subscriber = pipeline.broadcaster().subscribe();

    let quake = sample_event(SourceKind::Usgs, "retry", Category::Earthquake, 6.4, SeverityLevel::Orange, 0);
    let feed = Arc::new(ScriptedFeed::new(SourceKind::Usgs).then_batch(vec![quake.clone()]).then_batch(vec![quake]));
    let scheduler = pipeline.scheduler(feed, Duration::from_secs(60));
    let cancel = CancellationToken::new();

    FailingStore::set(&store.fail_add, true);
    let first = scheduler.poll_once(&cancel).await;
    assert_eq!(first, CycleOutcome::Completed(CycleReport { attempts: 1, fetched: 1, admitted: 1, skipped: 0 }));
    wait_for(&pipeline, |stats| stats.failed == 1).await;

    assert!(!store.exists("usgs_retry").await.unwrap());
    assert!(subscriber.inbox.try_recv().is_err());

    FailingStore::set(&store.fail_add, false);
    let second = scheduler.poll_once(&cancel).await;
    assert_eq!(second, CycleOutcome::Completed(CycleReport { attempts: 1, fetched: 1, admitted: 1, skipped: 0 }));
    wait_for(&pipeline, |stats| stats.persisted == 1).await;

    pipeline.shutdown(Duration::from_secs(5)).await.unwrap();

    assert!(store.exists("usgs_retry").await.unwrap());
    assert_eq!(pipeline.stats(), ProcessorStats { persisted: 1, broadcast: 1, duplicates: 0, failed: 1 });

    let mut received = Vec::new();
    while let Some(event) = subscriber.inbox.recv().await {
        received.push(event.id.clone());
    }
    assert_eq!(received, vec!["usgs_retry".to_string()]);
}
