//! Error handling and edge case tests.

use chatfeed::{
    Author, Feed, FeedConfig, FeedError, LogStore, MemoryStore, Message, MessageId, MessageInput,
    MessageStore, StoreConfig,
};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Memory store whose reads or writes can be made to fail.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    fail_inserts: AtomicBool,
    fail_queries: AtomicBool,
}

impl FlakyStore {
    fn outage() -> FeedError {
        FeedError::Io(io::Error::new(io::ErrorKind::Other, "disk unavailable"))
    }
}

impl MessageStore for FlakyStore {
    fn insert(&self, input: MessageInput) -> chatfeed::Result<Message> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(Self::outage());
        }
        self.inner.insert(input)
    }

    fn query_after(
        &self,
        cursor: Option<MessageId>,
        limit: Option<usize>,
    ) -> chatfeed::Result<Vec<Message>> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(Self::outage());
        }
        self.inner.query_after(cursor, limit)
    }

    fn head(&self) -> Option<MessageId> {
        self.inner.head()
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}

fn flaky_feed() -> (Arc<FlakyStore>, Feed) {
    let store = Arc::new(FlakyStore::default());
    let feed = Feed::new(store.clone(), FeedConfig::default());
    (store, feed)
}

fn input(text: &str) -> MessageInput {
    MessageInput::plain(Author::new("ann", "ann.png"), text)
}

// --- Store Failures ---

#[test]
fn test_failed_post_is_not_broadcast() {
    let (store, feed) = flaky_feed();
    let mut stream = feed.stream(None).unwrap();

    store.fail_inserts.store(true, Ordering::SeqCst);
    let result = feed.post(input("lost"));
    assert!(matches!(result, Err(FeedError::Io(_))));

    store.fail_inserts.store(false, Ordering::SeqCst);
    feed.post(input("kept")).unwrap();

    let view = stream.next_timeout(Duration::from_secs(1)).unwrap().unwrap();
    assert_eq!(view.content, "kept");
    assert_eq!(view.id, MessageId(1));
    assert!(stream.try_next().unwrap().is_none());
}

#[test]
fn test_failed_catch_up_leaves_no_subscription() {
    let (store, feed) = flaky_feed();
    feed.post(input("one")).unwrap();

    store.fail_queries.store(true, Ordering::SeqCst);
    let result = feed.stream(Some(MessageId(0)));
    assert!(matches!(result, Err(FeedError::Io(_))));
    assert_eq!(feed.subscriber_count(), 0);

    // Posting afterwards reaches nobody and does not fail
    feed.post(input("two")).unwrap();
    assert_eq!(feed.hub().subscriber_count(), 0);
}

#[test]
fn test_failed_latest_propagates() {
    let (store, feed) = flaky_feed();
    store.fail_queries.store(true, Ordering::SeqCst);
    assert!(matches!(feed.latest(None), Err(FeedError::Io(_))));
}

// --- Cursor Errors ---

#[test]
fn test_cursor_ahead_of_store() {
    let feed = Feed::memory();
    feed.post(input("only")).unwrap();

    let result = feed.stream(Some(MessageId(42)));
    assert!(matches!(
        result,
        Err(FeedError::CursorAhead {
            cursor: MessageId(42),
            head: Some(MessageId(1))
        })
    ));
    assert_eq!(feed.subscriber_count(), 0);

    assert!(feed.latest(Some(MessageId(2))).is_err());
}

#[test]
fn test_zero_cursor_on_empty_store() {
    let feed = Feed::memory();
    let stream = feed.stream(Some(MessageId(0))).unwrap();
    assert_eq!(stream.history_remaining(), 0);
    assert!(feed.latest(Some(MessageId(0))).unwrap().is_empty());
}

// --- Invalid Input ---

#[test]
fn test_invalid_message_not_persisted() {
    let feed = Feed::memory();
    let mut stream = feed.stream(None).unwrap();

    assert!(matches!(
        feed.post(input("")),
        Err(FeedError::InvalidMessage(_))
    ));
    assert!(feed.store().is_empty());
    assert!(stream.try_next().unwrap().is_none());
}

// --- Log Store ---

#[test]
fn test_second_open_is_locked() {
    let dir = TempDir::new().unwrap();
    let config = StoreConfig {
        path: dir.path().join("feed"),
        ..Default::default()
    };

    let _feed = Feed::open(config.clone(), FeedConfig::default()).unwrap();
    assert!(matches!(
        Feed::open(config, FeedConfig::default()),
        Err(FeedError::Locked)
    ));
}

#[test]
fn test_corrupted_log_refuses_to_open() {
    let dir = TempDir::new().unwrap();
    let config = StoreConfig {
        path: dir.path().join("feed"),
        sync_interval: 1,
        ..Default::default()
    };

    {
        let store = LogStore::create(config.clone()).unwrap();
        store.insert(input("first")).unwrap();
        store.insert(input("second")).unwrap();
    }

    // Clobber the magic of the first frame
    let log_path = config.path.join("messages.log");
    let mut bytes = std::fs::read(&log_path).unwrap();
    bytes[0] = b'X';
    std::fs::write(&log_path, &bytes).unwrap();

    assert!(matches!(
        LogStore::open(config),
        Err(FeedError::Corruption(_))
    ));
}

#[test]
fn test_open_without_manifest() {
    let dir = TempDir::new().unwrap();
    let result = LogStore::open(StoreConfig {
        path: dir.path().join("missing"),
        ..Default::default()
    });
    assert!(matches!(result, Err(FeedError::Io(_))));
}
