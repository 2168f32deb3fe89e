//! Broadcast hub fanning persisted messages out to live subscribers.

use super::subscription::Subscription;
use super::types::{DropReason, HubConfig, Lifecycle, SubscriptionId};
use crate::types::{Message, MessageId, MessageView};
use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Hub-side state of one subscription.
struct Entry {
    sender: Sender<Arc<MessageView>>,
    lifecycle: Arc<Lifecycle>,
}

impl Entry {
    /// Push without waiting. A full buffer detaches the subscriber on the
    /// spot so no later message can slip past the one that was lost.
    fn deliver(&self, id: SubscriptionId, view: &Arc<MessageView>) -> Delivery {
        if self.lifecycle.is_detached() {
            return Delivery::Skipped;
        }

        match self.sender.try_send(Arc::clone(view)) {
            Ok(()) => Delivery::Sent,
            Err(TrySendError::Full(_)) => {
                self.lifecycle.detach(DropReason::BufferOverflow);
                tracing::warn!(subscription = id.0, message = view.id.0, "subscriber buffer full, dropping");
                Delivery::Overflowed
            }
            Err(TrySendError::Disconnected(_)) => Delivery::Overflowed,
        }
    }
}

enum Delivery {
    Sent,
    Skipped,
    Overflowed,
}

pub(crate) struct HubShared {
    /// Active subscriptions by ID.
    subscribers: RwLock<HashMap<SubscriptionId, Entry>>,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
    config: HubConfig,
    closed: AtomicBool,
}

impl HubShared {
    /// Detach and forget a subscription. No-op if it is already gone.
    pub(crate) fn remove(&self, id: SubscriptionId, reason: DropReason) {
        let removed = self.subscribers.write().remove(&id);
        if let Some(entry) = removed {
            entry.lifecycle.detach(reason.clone());
            tracing::debug!(subscription = id.0, ?reason, "subscriber detached");
        }
    }
}

/// Process-wide fan-out point for newly persisted messages.
///
/// Cloning yields another handle to the same hub.
#[derive(Clone)]
pub struct BroadcastHub {
    shared: Arc<HubShared>,
}

impl BroadcastHub {
    /// Create a new hub.
    pub fn new(config: HubConfig) -> Self {
        Self {
            shared: Arc::new(HubShared {
                subscribers: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                config,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.shared.config
    }

    /// Register a new subscription with an empty buffer.
    ///
    /// Registration is exclusive with fan-out: every `notify` that starts
    /// after this returns reaches the subscription, none that finished
    /// before it was called does. After [`shutdown`](Self::shutdown) the
    /// returned subscription is already detached.
    pub fn attach(&self, cursor: Option<MessageId>) -> Subscription {
        let id = SubscriptionId(self.shared.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(self.shared.config.buffer_size.max(1));
        let lifecycle = Arc::new(Lifecycle::default());

        {
            let mut subs = self.shared.subscribers.write();
            if self.shared.closed.load(Ordering::Acquire) {
                lifecycle.detach(DropReason::Shutdown);
            } else {
                subs.insert(
                    id,
                    Entry {
                        sender,
                        lifecycle: Arc::clone(&lifecycle),
                    },
                );
                tracing::debug!(subscription = id.0, ?cursor, "subscriber attached");
            }
        }

        Subscription {
            id,
            receiver,
            lifecycle,
            hub: Arc::downgrade(&self.shared),
            cursor,
        }
    }

    /// Remove a subscription. Anything still buffered is discarded.
    pub fn detach(&self, subscription: Subscription) {
        self.shared.remove(subscription.id, DropReason::Unsubscribed);
    }

    /// Deliver a newly persisted message to every attached subscriber.
    ///
    /// Call once per message, after it is committed, in commit order.
    /// Returns how many buffers received it.
    pub fn notify(&self, message: &Message) -> usize {
        if self.subscriber_count() == 0 {
            return 0;
        }
        self.notify_view(Arc::new(MessageView::render(message)))
    }

    /// Like [`notify`](Self::notify), for a message already rendered.
    pub fn notify_view(&self, view: Arc<MessageView>) -> usize {
        let mut delivered = 0;
        let mut overflowed = Vec::new();

        {
            let subs = self.shared.subscribers.read();
            for (id, entry) in subs.iter() {
                match entry.deliver(*id, &view) {
                    Delivery::Sent => delivered += 1,
                    Delivery::Skipped => {}
                    Delivery::Overflowed => overflowed.push(*id),
                }
            }
        }

        // Remove dropped subscriptions
        for id in overflowed {
            self.shared.remove(id, DropReason::BufferOverflow);
        }

        delivered
    }

    /// Get subscriber count.
    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers.read().len()
    }

    /// Detach every subscriber and refuse new ones.
    pub fn shutdown(&self) {
        let drained: Vec<_> = {
            let mut subs = self.shared.subscribers.write();
            self.shared.closed.store(true, Ordering::Release);
            subs.drain().collect()
        };

        for (_, entry) in &drained {
            entry.lifecycle.detach(DropReason::Shutdown);
        }
        tracing::info!(subscribers = drained.len(), "broadcast hub shut down");
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FeedError;
    use crate::hub::SubscriptionState;
    use crate::types::{Author, MessageInput, Timestamp};
    use std::time::Duration;

    fn make_test_message(id: u64) -> Message {
        MessageInput::plain(Author::new("ann", "a.png"), format!("m{}", id))
            .into_message(MessageId(id), Timestamp(id as i64))
    }

    #[test]
    fn test_attach_detach() {
        let hub = BroadcastHub::default();

        let sub = hub.attach(None);
        assert_eq!(hub.subscriber_count(), 1);
        assert_eq!(sub.state(), SubscriptionState::Attached);

        hub.detach(sub);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn test_drop_detaches() {
        let hub = BroadcastHub::default();
        {
            let _sub = hub.attach(None);
            assert_eq!(hub.subscriber_count(), 1);
        }
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn test_notify_in_order() {
        let hub = BroadcastHub::default();
        let mut sub = hub.attach(None);

        for id in 1..=5 {
            assert_eq!(hub.notify(&make_test_message(id)), 1);
        }

        for id in 1..=5 {
            let view = sub.recv_timeout(Duration::from_millis(100)).unwrap().unwrap();
            assert_eq!(view.id, MessageId(id));
        }
        assert_eq!(sub.cursor(), Some(MessageId(5)));
        assert_eq!(sub.state(), SubscriptionState::Draining);
    }

    #[test]
    fn test_notify_before_attach_not_delivered() {
        let hub = BroadcastHub::default();
        let mut early = hub.attach(None);
        hub.notify(&make_test_message(1));

        let mut late = hub.attach(Some(MessageId(1)));
        hub.notify(&make_test_message(2));

        assert_eq!(early.try_recv().unwrap().unwrap().id, MessageId(1));
        assert_eq!(early.try_recv().unwrap().unwrap().id, MessageId(2));
        assert_eq!(late.try_recv().unwrap().unwrap().id, MessageId(2));
        assert!(late.try_recv().unwrap().is_none());
    }

    #[test]
    fn test_notify_without_subscribers() {
        let hub = BroadcastHub::default();
        assert_eq!(hub.notify(&make_test_message(1)), 0);
    }

    #[test]
    fn test_drop_slow_subscriber() {
        let hub = BroadcastHub::new(HubConfig { buffer_size: 2 });
        assert_eq!(hub.config().buffer_size, 2);
        let mut slow = hub.attach(None);
        let mut fast = hub.attach(None);

        for id in 1..=10 {
            hub.notify(&make_test_message(id));
            // Fast consumer keeps up
            assert_eq!(fast.try_recv().unwrap().unwrap().id, MessageId(id));
        }

        // Slow subscriber was dropped; the fast one is still attached
        assert_eq!(hub.subscriber_count(), 1);
        assert_eq!(slow.drop_reason(), Some(DropReason::BufferOverflow));

        // What made it into the buffer is still readable, without gaps
        assert_eq!(slow.recv().unwrap().id, MessageId(1));
        assert_eq!(slow.recv().unwrap().id, MessageId(2));
        assert!(matches!(
            slow.recv(),
            Err(FeedError::SubscriptionDropped(DropReason::BufferOverflow))
        ));
        assert_eq!(slow.cursor(), Some(MessageId(2)));
    }

    #[test]
    fn test_shutdown() {
        let hub = BroadcastHub::default();
        let mut sub = hub.attach(None);

        hub.shutdown();
        assert!(hub.is_closed());
        assert_eq!(hub.subscriber_count(), 0);
        assert!(matches!(
            sub.recv(),
            Err(FeedError::SubscriptionDropped(DropReason::Shutdown))
        ));

        let mut late = hub.attach(None);
        assert_eq!(late.state(), SubscriptionState::Detached);
        assert!(late.try_recv().is_err());
        assert_eq!(hub.subscriber_count(), 0);
    }
}
