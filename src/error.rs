//! Error types for the chat feed.

use crate::hub::DropReason;
use crate::types::MessageId;
use thiserror::Error;

/// Main error type for feed operations.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),

    #[error("Store is locked by another process")]
    Locked,

    #[error("Store not initialized")]
    NotInitialized,

    #[error("Cursor {cursor} is ahead of the newest message ({head:?})")]
    CursorAhead {
        cursor: MessageId,
        head: Option<MessageId>,
    },

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Subscription dropped: {0:?}")]
    SubscriptionDropped(DropReason),

    #[error("Feed is shutting down")]
    ShuttingDown,
}

impl From<serde_json::Error> for FeedError {
    fn from(e: serde_json::Error) -> Self {
        FeedError::Serialization(e.to_string())
    }
}

/// Result type for feed operations.
pub type Result<T> = std::result::Result<T, FeedError>;
