//! Core types for the chat feed.

use crate::render::render;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Unique identifier for a message, assigned by the store in commit order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl MessageId {
    pub fn next(self) -> Self {
        MessageId(self.0 + 1)
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({})", self.0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("Time went backwards");
        Timestamp(duration.as_micros() as i64)
    }

    /// Current time, clamped so it never precedes `floor`.
    pub fn now_not_before(floor: Timestamp) -> Self {
        Self::now().max(floor)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// How the raw content of a message is to be displayed.
///
/// Adding a variant means adding a case to [`render`]; the match there has
/// no fallback arm, so a missing case does not build.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    #[default]
    Plain,
    Markdown,
}

/// Display name and avatar of whoever sent a message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    pub avatar: String,
}

impl Author {
    pub fn new(name: impl Into<String>, avatar: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            avatar: avatar.into(),
        }
    }
}

/// A persisted chat message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier (assigned by store).
    pub id: MessageId,

    /// Raw text as posted.
    pub content: String,

    pub content_type: ContentType,

    /// Commit time; never decreases in id order.
    pub sent_at: Timestamp,

    pub author: Author,
}

/// A message as posted by a client, before the store assigns id and time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageInput {
    pub content: String,
    #[serde(default)]
    pub content_type: ContentType,
    pub author: Author,
}

impl MessageInput {
    /// Plain-text message.
    pub fn plain(author: Author, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            content_type: ContentType::Plain,
            author,
        }
    }

    /// Markdown message.
    pub fn markdown(author: Author, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            content_type: ContentType::Markdown,
            author,
        }
    }

    /// Attach the store-assigned fields.
    pub(crate) fn into_message(self, id: MessageId, sent_at: Timestamp) -> Message {
        Message {
            id,
            content: self.content,
            content_type: self.content_type,
            sent_at,
            author: self.author,
        }
    }
}

/// Rendered form of a message, produced per read and never persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageView {
    pub id: MessageId,
    pub content: String,
    pub author: Author,
    pub sent_at: Timestamp,
}

impl MessageView {
    /// Render a message for display.
    pub fn render(message: &Message) -> Self {
        Self {
            id: message.id,
            content: render(message.content_type, &message.content),
            author: message.author.clone(),
            sent_at: message.sent_at,
        }
    }
}
