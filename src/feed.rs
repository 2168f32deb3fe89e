//! The chat feed: persistence, live fan-out and catch-up streams together.

use crate::error::{FeedError, Result};
use crate::hub::{BroadcastHub, HubConfig};
use crate::messages::{LogStore, MemoryStore, MessageStore, StoreConfig};
use crate::stream::MessageStream;
use crate::types::{Message, MessageId, MessageInput, MessageView};
use lru::LruCache;
use parking_lot::Mutex;
use serde::Deserialize;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Feed configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Size of the "latest" snapshot, used by [`Feed::latest`] and by
    /// streams opened without a cursor.
    pub latest_limit: usize,

    /// Rendered-view cache size (number of messages, 0 disables).
    pub view_cache_size: usize,

    pub hub: HubConfig,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            latest_limit: 50,
            view_cache_size: 1000,
            hub: HubConfig::default(),
        }
    }
}

/// A single append-only chat timeline served to many readers.
///
/// - `post` persists a message, then notifies every live stream
/// - `latest` is a bounded read straight from the store
/// - `stream` replays history after a cursor and continues live
pub struct Feed {
    config: FeedConfig,

    store: Arc<dyn MessageStore>,

    hub: BroadcastHub,

    /// Rendered views by id; messages are immutable so entries never go stale.
    views: Option<Mutex<LruCache<MessageId, Arc<MessageView>>>>,

    /// Held across insert + notify so notify order is commit order, and
    /// across attach so a new stream sees a clean cut point.
    commit_lock: Mutex<()>,
}

impl Feed {
    /// Create a feed over any message store.
    pub fn new(store: Arc<dyn MessageStore>, config: FeedConfig) -> Self {
        let views = NonZeroUsize::new(config.view_cache_size).map(|cap| Mutex::new(LruCache::new(cap)));
        let hub = BroadcastHub::new(config.hub.clone());

        Self {
            config,
            store,
            hub,
            views,
            commit_lock: Mutex::new(()),
        }
    }

    /// In-memory feed with default configuration.
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), FeedConfig::default())
    }

    /// Feed persisted to a log store on disk.
    pub fn open(store_config: StoreConfig, config: FeedConfig) -> Result<Self> {
        let store = LogStore::open_or_create(store_config)?;
        Ok(Self::new(Arc::new(store), config))
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    pub fn hub(&self) -> &BroadcastHub {
        &self.hub
    }

    /// Number of attached live streams.
    pub fn subscriber_count(&self) -> usize {
        self.hub.subscriber_count()
    }

    /// Persist a message and broadcast it.
    ///
    /// Returns once the store has committed. A store failure is returned
    /// as-is and nothing is broadcast.
    pub fn post(&self, input: MessageInput) -> Result<MessageView> {
        validate(&input)?;

        let (view, delivered) = {
            let _commit = self.commit_lock.lock();
            let message = self.store.insert(input)?;
            let view = self.render(&message);
            let delivered = self.hub.notify_view(Arc::clone(&view));
            (view, delivered)
        };

        tracing::debug!(id = view.id.0, delivered, "message posted");
        Ok(MessageView::clone(&view))
    }

    /// Bounded read: the newest messages, or the first ones after `cursor`.
    ///
    /// At most `latest_limit` messages, oldest first.
    pub fn latest(&self, cursor: Option<MessageId>) -> Result<Vec<MessageView>> {
        let messages = self.store.query_after(cursor, Some(self.config.latest_limit))?;
        Ok(messages
            .iter()
            .map(|message| MessageView::clone(&self.render(message)))
            .collect())
    }

    /// Open a live stream of everything after `cursor`.
    ///
    /// Without a cursor the history phase is the latest snapshot. Each
    /// message is emitted exactly once, in commit order, for as long as the
    /// stream stays attached.
    pub fn stream(&self, cursor: Option<MessageId>) -> Result<MessageStream> {
        if self.hub.is_closed() {
            return Err(FeedError::ShuttingDown);
        }

        let limit = match cursor {
            Some(_) => None,
            None => Some(self.config.latest_limit),
        };

        MessageStream::open(
            cursor,
            || {
                let _commit = self.commit_lock.lock();
                self.hub.attach(cursor)
            },
            || {
                let messages = self.store.query_after(cursor, limit)?;
                Ok(messages.iter().map(|message| self.render(message)).collect())
            },
        )
    }

    /// Detach every live stream and flush the store.
    ///
    /// Posting keeps working afterwards; opening new streams does not.
    pub fn shutdown(&self) -> Result<()> {
        tracing::info!(subscribers = self.subscriber_count(), "shutting down feed");
        self.hub.shutdown();
        self.store.sync()
    }

    fn render(&self, message: &Message) -> Arc<MessageView> {
        let Some(views) = &self.views else {
            return Arc::new(MessageView::render(message));
        };

        if let Some(view) = views.lock().get(&message.id) {
            return Arc::clone(view);
        }

        let view = Arc::new(MessageView::render(message));
        views.lock().put(message.id, Arc::clone(&view));
        view
    }
}

fn validate(input: &MessageInput) -> Result<()> {
    if input.content.trim().is_empty() {
        return Err(FeedError::InvalidMessage("content is empty".into()));
    }
    if input.author.name.trim().is_empty() {
        return Err(FeedError::InvalidMessage("author name is empty".into()));
    }
    Ok(())
}
