//! Message persistence.
//!
//! The feed only needs two things from storage: append a message and get
//! back its assigned id, and read "everything after a cursor" in commit
//! order. [`MessageStore`] captures that contract; two backends ship with
//! the crate:
//!
//! - [`MemoryStore`]: a vector behind a lock, for tests and ephemeral rooms
//! - [`LogStore`]: an append-only, checksummed log file with an in-memory
//!   id index rebuilt on open

mod file;
mod index;
mod log;
mod memory;

pub use file::{LogStore, StoreConfig};
pub use index::MessageIndex;
pub use log::MessageLog;
pub use memory::MemoryStore;

use crate::error::{FeedError, Result};
use crate::types::{Message, MessageId, MessageInput};

/// Append-only persistence of messages, ordered by commit.
pub trait MessageStore: Send + Sync {
    /// Persist a message, assigning its id and `sent_at`.
    fn insert(&self, input: MessageInput) -> Result<Message>;

    /// Read messages in commit order.
    ///
    /// With a cursor, returns the first `limit` messages whose id is greater
    /// than the cursor. Without one, returns the newest `limit` messages,
    /// newest last. `None` means no limit. The result is a snapshot taken at
    /// call time.
    fn query_after(&self, cursor: Option<MessageId>, limit: Option<usize>) -> Result<Vec<Message>>;

    /// Id of the newest persisted message.
    fn head(&self) -> Option<MessageId>;

    /// Number of persisted messages.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flush pending writes.
    fn sync(&self) -> Result<()> {
        Ok(())
    }
}

/// Select the slice of `items` (sorted by id) that a `query_after` call returns.
pub(crate) fn window<T>(
    items: &[T],
    id_of: impl Fn(&T) -> MessageId,
    cursor: Option<MessageId>,
    limit: Option<usize>,
) -> Result<&[T]> {
    let len = items.len();
    let head = items.last().map(&id_of);

    match cursor {
        Some(cursor) => {
            if head.map_or(cursor.0 > 0, |head| cursor > head) {
                return Err(FeedError::CursorAhead { cursor, head });
            }
            let start = items.partition_point(|item| id_of(item) <= cursor);
            let end = limit.map_or(len, |limit| start.saturating_add(limit).min(len));
            Ok(&items[start..end])
        }
        None => {
            let start = limit.map_or(0, |limit| len.saturating_sub(limit));
            Ok(&items[start..])
        }
    }
}
