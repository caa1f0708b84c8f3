//! # Non-Blocking Event Broadcaster
//!
//! The `Broadcaster` is the in-memory pub/sub hub between the worker pool and
//! the live streaming sessions. Every persisted record that passes the
//! broadcast policy is fanned out to every registered subscriber inbox.
//!
//! ## Core Design Principles:
//!
//! 1.  **Zero-Copy Fan-out**: A record is wrapped in an `Arc` once. Each inbox
//!     receives a new `Arc` pointer to the *same* allocation, so fan-out cost
//!     does not grow with record size.
//!
//! 2.  **Never Block the Publisher**: Inboxes are bounded and filled with
//!     `try_send`. A full inbox loses that one record for that one subscriber;
//!     the publisher and every other subscriber carry on. The loss shows up as
//!     a gap in that subscriber's stream, never as a reorder.
//!
//! 3.  **Short Critical Sections**: The subscriber registry is the only
//!     lock-guarded structure in the pipeline. The lock is held for map
//!     updates and `try_send` calls only, never across an `.await`.
//!
//! 4.  **Atomic Close**: `close` drains the registry under the lock and marks
//!     it closed, so a concurrent `subscribe` either lands before the close and
//!     is dropped with everyone else, or lands after and gets a closed inbox.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::models::DisasterEvent;

/// Default inbox size, enough for one worst-case poll batch.
pub const DEFAULT_INBOX_CAPACITY: usize = 100;

/// Receiving half of a subscriber inbox.
pub type Inbox = mpsc::Receiver<Arc<DisasterEvent>>;

/// Process-unique subscriber handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// What [`Broadcaster::subscribe`] hands out.
#[derive(Debug)]
pub struct Subscription {
    /// Handle for [`Broadcaster::unsubscribe`].
    pub id: SubscriberId,
    /// The subscriber's private inbox.
    pub inbox: Inbox,
}

/// Per-call result of [`Broadcaster::publish`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Inboxes that accepted the record.
    pub delivered: usize,
    /// Inboxes that were full and lost the record.
    pub dropped: usize,
    /// Subscribers removed because their receiver was gone.
    pub pruned: usize,
}

/// # Subscriber Handle
///
/// The sending side of one inbox plus a count of records it has lost.
struct SubscriberHandle {
    sender: mpsc::Sender<Arc<DisasterEvent>>,
    dropped: u64,
}

#[derive(Default)]
struct Registry {
    closed: bool,
    subscribers: HashMap<SubscriberId, SubscriberHandle>,
}

/// # Broadcaster
///
/// Owns the subscriber registry. The map itself is never exposed.
pub struct Broadcaster {
    registry: Mutex<Registry>,
    next_id: AtomicU64,
    inbox_capacity: usize,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_INBOX_CAPACITY)
    }
}

impl Broadcaster {
    /// Creates a broadcaster whose inboxes hold `inbox_capacity` records (at least 1).
    pub fn new(inbox_capacity: usize) -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            next_id: AtomicU64::new(1),
            inbox_capacity: inbox_capacity.max(1),
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inbox size handed to new subscribers.
    pub fn inbox_capacity(&self) -> usize {
        self.inbox_capacity
    }

    /// # Subscribe
    ///
    /// Allocates a fresh handle and bounded inbox. After [`Broadcaster::close`]
    /// the returned inbox is already closed, so a reader ends immediately.
    pub fn subscribe(&self) -> Subscription {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.inbox_capacity);

        let mut registry = self.registry();
        if registry.closed {
            debug!(subscriber = %id, "subscribe after close, inbox closed");
            return Subscription { id, inbox: rx };
        }
        registry.subscribers.insert(id, SubscriberHandle { sender: tx, dropped: 0 });
        info!(subscriber = %id, total = registry.subscribers.len(), "subscriber registered");
        Subscription { id, inbox: rx }
    }

    /// Removes the subscriber and drops its sender, so its reader sees the
    /// inbox close once any buffered records are read. Returns whether the
    /// handle was registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.registry().subscribers.remove(&id);
        match removed {
            Some(handle) => {
                info!(subscriber = %id, lost = handle.dropped, "subscriber removed");
                true
            }
            None => false,
        }
    }

    /// # Publish
    ///
    /// Pushes `event` into every inbox without waiting. Full inboxes lose the
    /// record; inboxes whose reader is gone are pruned with `retain`.
    pub fn publish(&self, event: Arc<DisasterEvent>) -> PublishReport {
        let mut report = PublishReport::default();
        let mut registry = self.registry();

        registry.subscribers.retain(|id, handle| match handle.sender.try_send(Arc::clone(&event)) {
            Ok(()) => {
                report.delivered += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                handle.dropped += 1;
                report.dropped += 1;
                debug!(subscriber = %id, record = %event.id, "inbox full, record dropped for this subscriber");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                report.pruned += 1;
                debug!(subscriber = %id, "receiver gone, pruning subscriber");
                false
            }
        });

        report
    }

    /// Closes and removes every inbox. Later `publish` calls reach nobody and
    /// later `subscribe` calls get a closed inbox.
    pub fn close(&self) {
        let mut registry = self.registry();
        registry.closed = true;
        let count = registry.subscribers.len();
        registry.subscribers.clear();
        info!(closed_inboxes = count, "broadcaster closed");
    }

    /// Whether [`Broadcaster::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.registry().closed
    }

    /// Currently registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.registry().subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, SourceKind};

    fn record(native: &str) -> Arc<DisasterEvent> {
        Arc::new(DisasterEvent::new(SourceKind::Gdacs, native, Category::Flood))
    }

    #[tokio::test]
    async fn fans_out_the_same_allocation() {
        let hub = Broadcaster::new(4);
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();
        assert_ne!(a.id, b.id);

        let event = record("1");
        assert_eq!(hub.publish(event.clone()).delivered, 2);

        let got_a = a.inbox.recv().await.unwrap();
        let got_b = b.inbox.recv().await.unwrap();
        assert!(Arc::ptr_eq(&got_a, &event));
        assert!(Arc::ptr_eq(&got_b, &event));
    }

    #[tokio::test]
    async fn full_inbox_drops_only_for_that_subscriber() {
        let hub = Broadcaster::new(1);
        let mut slow = hub.subscribe();
        let mut fast = hub.subscribe();

        assert_eq!(hub.publish(record("1")).delivered, 2);
        fast.inbox.recv().await.unwrap();

        let report = hub.publish(record("2"));
        assert_eq!(report, PublishReport { delivered: 1, dropped: 1, pruned: 0 });
        assert_eq!(fast.inbox.recv().await.unwrap().id, "gdacs_2");
        assert_eq!(slow.inbox.recv().await.unwrap().id, "gdacs_1");
        assert_eq!(hub.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn unsubscribe_closes_the_inbox() {
        let hub = Broadcaster::default();
        let mut sub = hub.subscribe();
        assert!(hub.unsubscribe(sub.id));
        assert!(!hub.unsubscribe(sub.id));
        assert!(sub.inbox.recv().await.is_none());
    }

    #[tokio::test]
    async fn dropped_receivers_are_pruned_on_publish() {
        let hub = Broadcaster::default();
        let gone = hub.subscribe();
        let _kept = hub.subscribe();
        drop(gone.inbox);

        let report = hub.publish(record("1"));
        assert_eq!(report.pruned, 1);
        assert_eq!(hub.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn close_ends_every_reader_and_later_subscribers() {
        let hub = Broadcaster::default();
        let mut before = hub.subscribe();
        hub.close();

        assert!(before.inbox.recv().await.is_none());
        assert_eq!(hub.subscriber_count(), 0);
        assert_eq!(hub.publish(record("1")), PublishReport::default());

        let mut after = hub.subscribe();
        assert!(after.inbox.recv().await.is_none());
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn concurrent_subscribe_publish_unsubscribe() {
        let hub = Arc::new(Broadcaster::new(8));
        let threads: Vec<_> = (0..8)
            .map(|n| {
                let hub = Arc::clone(&hub);
                std::thread::spawn(move || {
                    for i in 0..200 {
                        let sub = hub.subscribe();
                        hub.publish(record(&format!("{n}-{i}")));
                        hub.unsubscribe(sub.id);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(hub.subscriber_count(), 0);
    }
}
