//! Catch-up streams: history first, then live, with no gap and no duplicate.
//!
//! Opening a stream attaches to the hub *before* reading history. Anything
//! committed after the attach is therefore buffered live, and anything
//! committed before it is in the history snapshot. Messages committed while
//! the snapshot is being taken can land in both; those are suppressed on the
//! live side by comparing against the watermark, the highest id the history
//! phase emitted.

use crate::error::Result;
use crate::hub::{DropReason, Subscription};
use crate::types::{MessageId, MessageView};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// An unbounded, ordered sequence of rendered messages for one client.
///
/// Iteration blocks while nothing is available and ends only when the
/// underlying subscription is detached by the hub (see
/// [`drop_reason`](Self::drop_reason)). Dropping the stream detaches it.
pub struct MessageStream {
    history: VecDeque<Arc<MessageView>>,
    subscription: Subscription,
    /// Live messages at or below this id were already emitted from history.
    watermark: Option<MessageId>,
    /// Last id emitted to the client.
    cursor: Option<MessageId>,
    suppressed: u64,
}

impl MessageStream {
    /// Run the catch-up protocol.
    ///
    /// `attach` must register with the hub; `query` reads the history after
    /// `cursor`. If the query fails the subscription is detached and the
    /// error returned.
    pub(crate) fn open<A, Q>(cursor: Option<MessageId>, attach: A, query: Q) -> Result<Self>
    where
        A: FnOnce() -> Subscription,
        Q: FnOnce() -> Result<Vec<Arc<MessageView>>>,
    {
        let subscription = attach();

        let history = match query() {
            Ok(history) => history,
            Err(e) => {
                tracing::warn!(?cursor, error = %e, "catch-up query failed, detaching");
                subscription.detach();
                return Err(e);
            }
        };

        let watermark = history.last().map(|view| view.id).or(cursor);
        tracing::debug!(
            subscription = subscription.id().0,
            ?cursor,
            ?watermark,
            history = history.len(),
            "stream opened"
        );

        Ok(Self {
            history: history.into(),
            subscription,
            watermark,
            cursor,
            suppressed: 0,
        })
    }

    /// Highest id covered by the history phase.
    pub fn watermark(&self) -> Option<MessageId> {
        self.watermark
    }

    /// Id of the last message emitted, or the cursor the stream was opened
    /// with. Reconnecting with this cursor resumes without loss.
    pub fn cursor(&self) -> Option<MessageId> {
        self.cursor
    }

    /// Historical messages not yet emitted.
    pub fn history_remaining(&self) -> usize {
        self.history.len()
    }

    /// Live messages discarded because history already covered them.
    pub fn suppressed(&self) -> u64 {
        self.suppressed
    }

    /// Why the live side ended, if it has.
    pub fn drop_reason(&self) -> Option<DropReason> {
        self.subscription.drop_reason()
    }

    /// Next message, waiting at most `timeout` for a live one.
    ///
    /// `Ok(None)` means the timeout elapsed. Once the subscription is
    /// detached and drained this returns
    /// [`FeedError::SubscriptionDropped`](crate::FeedError::SubscriptionDropped).
    pub fn next_timeout(&mut self, timeout: Duration) -> Result<Option<Arc<MessageView>>> {
        if let Some(view) = self.history.pop_front() {
            return Ok(Some(self.emit(view)));
        }

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.subscription.recv_timeout(remaining)? {
                Some(view) => {
                    if let Some(view) = self.admit(view) {
                        return Ok(Some(self.emit(view)));
                    }
                }
                None => return Ok(None),
            }
        }
    }

    /// Next message without waiting.
    pub fn try_next(&mut self) -> Result<Option<Arc<MessageView>>> {
        self.next_timeout(Duration::ZERO)
    }

    /// Suppress live messages the history phase already emitted.
    fn admit(&mut self, view: Arc<MessageView>) -> Option<Arc<MessageView>> {
        match self.watermark {
            Some(watermark) if view.id <= watermark => {
                self.suppressed += 1;
                None
            }
            _ => Some(view),
        }
    }

    fn emit(&mut self, view: Arc<MessageView>) -> Arc<MessageView> {
        self.cursor = Some(view.id);
        view
    }
}

impl Iterator for MessageStream {
    type Item = Arc<MessageView>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(view) = self.history.pop_front() {
            return Some(self.emit(view));
        }

        loop {
            match self.subscription.recv() {
                Ok(view) => {
                    if let Some(view) = self.admit(view) {
                        return Some(self.emit(view));
                    }
                }
                Err(_) => return None,
            }
        }
    }
}

impl std::fmt::Debug for MessageStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStream")
            .field("subscription", &self.subscription)
            .field("watermark", &self.watermark)
            .field("cursor", &self.cursor)
            .field("history_remaining", &self.history.len())
            .finish()
    }
}
