//! Consumer-side handle of a live feed.

use super::manager::HubShared;
use super::types::{DropReason, Lifecycle, SubscriptionId, SubscriptionState};
use crate::error::{FeedError, Result};
use crate::types::{MessageId, MessageView};
use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// One attached live feed.
///
/// Buffered messages arrive in notify order. Dropping the handle detaches it
/// from the hub before `drop` returns.
pub struct Subscription {
    pub(crate) id: SubscriptionId,
    pub(crate) receiver: Receiver<Arc<MessageView>>,
    pub(crate) lifecycle: Arc<Lifecycle>,
    pub(crate) hub: Weak<HubShared>,
    /// Last message id handed to the consumer.
    pub(crate) cursor: Option<MessageId>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn state(&self) -> SubscriptionState {
        self.lifecycle.state()
    }

    /// Id of the last message received, or the cursor the subscription was
    /// created with.
    pub fn cursor(&self) -> Option<MessageId> {
        self.cursor
    }

    /// Why the hub detached this subscription, if it did.
    pub fn drop_reason(&self) -> Option<DropReason> {
        self.lifecycle.reason()
    }

    /// Number of messages waiting in the buffer.
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }

    /// Receive the next message (blocking).
    ///
    /// Once the subscription is detached and its buffer is empty, returns
    /// [`FeedError::SubscriptionDropped`].
    pub fn recv(&mut self) -> Result<Arc<MessageView>> {
        self.lifecycle.begin_draining();
        match self.receiver.recv() {
            Ok(view) => Ok(self.advance(view)),
            Err(_) => Err(self.dropped()),
        }
    }

    /// Try to receive a message (non-blocking).
    pub fn try_recv(&mut self) -> Result<Option<Arc<MessageView>>> {
        self.lifecycle.begin_draining();
        match self.receiver.try_recv() {
            Ok(view) => Ok(Some(self.advance(view))),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(self.dropped()),
        }
    }

    /// Receive with timeout. `Ok(None)` means the timeout elapsed.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Arc<MessageView>>> {
        self.lifecycle.begin_draining();
        match self.receiver.recv_timeout(timeout) {
            Ok(view) => Ok(Some(self.advance(view))),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(self.dropped()),
        }
    }

    /// Detach from the hub, discarding anything still buffered.
    pub fn detach(self) {
        drop(self);
    }

    fn advance(&mut self, view: Arc<MessageView>) -> Arc<MessageView> {
        self.cursor = Some(view.id);
        view
    }

    fn dropped(&self) -> FeedError {
        // A hub dropped without shutdown leaves no reason behind.
        FeedError::SubscriptionDropped(self.lifecycle.reason().unwrap_or(DropReason::Shutdown))
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        match self.hub.upgrade() {
            Some(hub) => hub.remove(self.id, DropReason::Unsubscribed),
            None => {
                self.lifecycle.detach(DropReason::Shutdown);
            }
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("cursor", &self.cursor)
            .field("pending", &self.pending())
            .finish()
    }
}
