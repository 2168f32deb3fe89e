//! In-memory message store.

use super::{window, MessageStore};
use crate::error::Result;
use crate::types::{Message, MessageId, MessageInput, Timestamp};
use parking_lot::RwLock;

/// Message store backed by a vector. Contents are lost on drop.
#[derive(Default)]
pub struct MemoryStore {
    messages: RwLock<Vec<Message>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MessageStore for MemoryStore {
    fn insert(&self, input: MessageInput) -> Result<Message> {
        let mut messages = self.messages.write();

        let (id, floor) = match messages.last() {
            Some(last) => (last.id.next(), last.sent_at),
            None => (MessageId(1), Timestamp(0)),
        };

        let message = input.into_message(id, Timestamp::now_not_before(floor));
        messages.push(message.clone());
        Ok(message)
    }

    fn query_after(&self, cursor: Option<MessageId>, limit: Option<usize>) -> Result<Vec<Message>> {
        let messages = self.messages.read();
        Ok(window(messages.as_slice(), |m| m.id, cursor, limit)?.to_vec())
    }

    fn head(&self) -> Option<MessageId> {
        self.messages.read().last().map(|m| m.id)
    }

    fn len(&self) -> usize {
        self.messages.read().len()
    }
}
