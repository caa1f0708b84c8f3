//! # Streaming Session
//!
//! One session per live subscriber. It owns a broadcaster inbox and a filter,
//! and forwards every matching record to a downstream [`EventSink`].
//!
//! ## State machine
//! `Active -> Closed`. [`StreamSession::run`] is the active state: it consumes
//! the session and returns only once it is closed. While active the session
//! waits on cancellation together with its inbox, and again together with
//! every sink delivery, so a stalled downstream cannot pin it open.
//! Cancellation wins a tie. The session closes on:
//! - cancellation (client went away, server shutting down), which is a clean exit;
//! - inbox closure (unsubscribed or broadcaster closed), also a clean exit;
//! - a sink delivery failure, which is surfaced to the caller.
//!
//! A record that fails the filter is discarded and the session keeps waiting.
//! There is no buffering beyond the inbox itself.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::broadcaster::{Broadcaster, Inbox, SubscriberId};
use crate::models::{DisasterEvent, EventFilter};

/// A downstream transport refused a record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("delivery failed: {0}")]
pub struct SinkError(pub String);

/// Downstream transport for a session (WebSocket, in-process channel, ...).
#[async_trait]
pub trait EventSink: Send {
    /// Delivers one record.
    async fn deliver(&mut self, event: &DisasterEvent) -> Result<(), SinkError>;
}

/// In-process sink over a bounded channel.
pub struct ChannelSink {
    tx: mpsc::Sender<DisasterEvent>,
}

impl ChannelSink {
    /// Creates a sink and the receiver it feeds.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<DisasterEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn deliver(&mut self, event: &DisasterEvent) -> Result<(), SinkError> {
        self.tx
            .send(event.clone())
            .await
            .map_err(|_| SinkError("sink receiver dropped".to_string()))
    }
}

/// Why a session ended cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The cancellation token fired.
    Cancelled,
    /// The inbox was closed by the broadcaster.
    InboxClosed,
}

/// Counters from a finished session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    /// Subscriber handle the session used.
    pub subscriber: SubscriberId,
    /// How it ended.
    pub reason: CloseReason,
    /// Records forwarded to the sink.
    pub delivered: u64,
    /// Records that failed the filter.
    pub discarded: u64,
}

/// Errors that end a session abnormally.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The sink refused a record.
    #[error("session {subscriber} failed after {delivered} deliveries: {source}")]
    Delivery {
        /// Subscriber handle.
        subscriber: SubscriberId,
        /// Records delivered before the failure.
        delivered: u64,
        /// Sink error.
        #[source]
        source: SinkError,
    },
}

/// A filtered, cancelable view of the broadcast stream.
pub struct StreamSession {
    id: SubscriberId,
    inbox: Inbox,
    filter: EventFilter,
    broadcaster: Arc<Broadcaster>,
}

impl StreamSession {
    /// Subscribes to `broadcaster`. The session is active until [`StreamSession::run`] returns.
    pub fn open(broadcaster: Arc<Broadcaster>, filter: EventFilter) -> Self {
        let subscription = broadcaster.subscribe();
        debug!(subscriber = %subscription.id, ?filter, "session opened");
        Self {
            id: subscription.id,
            inbox: subscription.inbox,
            filter,
            broadcaster,
        }
    }

    /// Subscriber handle.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// The filter applied to every record.
    pub fn filter(&self) -> &EventFilter {
        &self.filter
    }

    /// Forwards matching records to `sink` until cancellation, inbox closure
    /// or a delivery failure. The subscription is released when the session
    /// is dropped.
    ///
    /// # Errors
    /// [`SessionError::Delivery`] if the sink refuses a record.
    pub async fn run<S>(mut self, sink: &mut S, cancel: CancellationToken) -> Result<SessionSummary, SessionError>
    where
        S: EventSink + ?Sized,
    {
        let mut delivered = 0u64;
        let mut discarded = 0u64;

        let reason = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break CloseReason::Cancelled,
                next = self.inbox.recv() => {
                    let Some(event) = next else {
                        break CloseReason::InboxClosed;
                    };
                    if !self.filter.matches(&event) {
                        discarded += 1;
                        continue;
                    }
                    let outcome = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break CloseReason::Cancelled,
                        outcome = sink.deliver(&event) => outcome,
                    };
                    if let Err(source) = outcome {
                        warn!(subscriber = %self.id, delivered, error = %source, "session delivery failed");
                        return Err(SessionError::Delivery { subscriber: self.id, delivered, source });
                    }
                    delivered += 1;
                }
            }
        };

        info!(subscriber = %self.id, ?reason, delivered, discarded, "session closed");
        Ok(SessionSummary { subscriber: self.id, reason, delivered, discarded })
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.broadcaster.unsubscribe(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, SeverityLevel, SourceKind};
    use std::time::Duration;

    fn record(native: &str, category: Category, magnitude: f64) -> Arc<DisasterEvent> {
        Arc::new(DisasterEvent {
            magnitude,
            severity_level: SeverityLevel::Orange,
            ..DisasterEvent::new(SourceKind::Gdacs, native, category)
        })
    }

    struct BrokenSink;

    #[async_trait]
    impl EventSink for BrokenSink {
        async fn deliver(&mut self, _event: &DisasterEvent) -> Result<(), SinkError> {
            Err(SinkError("socket closed".into()))
        }
    }

    #[tokio::test]
    async fn forwards_matching_records_until_inbox_closes() {
        let hub = Arc::new(Broadcaster::default());
        let session = StreamSession::open(hub.clone(), EventFilter::by_category(Category::Earthquake));
        let (mut sink, mut rx) = ChannelSink::new(8);

        hub.publish(record("1", Category::Earthquake, 6.0));
        hub.publish(record("2", Category::Flood, 0.0));
        hub.publish(record("3", Category::Earthquake, 5.1));
        hub.close();

        let summary = session.run(&mut sink, CancellationToken::new()).await.unwrap();
        assert_eq!(summary.reason, CloseReason::InboxClosed);
        assert_eq!(summary.delivered, 2);
        assert_eq!(summary.discarded, 1);
        assert_eq!(rx.recv().await.unwrap().id, "gdacs_1");
        assert_eq!(rx.recv().await.unwrap().id, "gdacs_3");
    }

    #[tokio::test]
    async fn cancellation_is_a_clean_close_and_unsubscribes() {
        let hub = Arc::new(Broadcaster::default());
        let session = StreamSession::open(hub.clone(), EventFilter::default());
        assert_eq!(hub.subscriber_count(), 1);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let task = tokio::spawn(async move {
            let (mut sink, _rx) = ChannelSink::new(1);
            session.run(&mut sink, cancel).await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        trigger.cancel();

        let summary = task.await.unwrap().unwrap();
        assert_eq!(summary.reason, CloseReason::Cancelled);
        assert_eq!(hub.subscriber_count(), 0);
    }

    struct StalledSink;

    #[async_trait]
    impl EventSink for StalledSink {
        async fn deliver(&mut self, _event: &DisasterEvent) -> Result<(), SinkError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_stalled_delivery() {
        let hub = Arc::new(Broadcaster::default());
        let session = StreamSession::open(hub.clone(), EventFilter::default());
        hub.publish(record("1", Category::Flood, 0.0));

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let task = tokio::spawn(async move { session.run(&mut StalledSink, cancel).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        trigger.cancel();
        hub.close();

        let summary = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("session ends once cancelled")
            .unwrap()
            .unwrap();
        assert_eq!(summary.reason, CloseReason::Cancelled);
        assert_eq!(summary.delivered, 0);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn sink_failure_is_surfaced() {
        let hub = Arc::new(Broadcaster::default());
        let session = StreamSession::open(hub.clone(), EventFilter::default());
        hub.publish(record("1", Category::Flood, 0.0));

        let err = session.run(&mut BrokenSink, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, SessionError::Delivery { delivered: 0, .. }));
        assert_eq!(hub.subscriber_count(), 0);
    }
}
