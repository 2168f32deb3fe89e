//! # Chat Feed
//!
//! A single append-only chat timeline, persisted once per message and
//! delivered live to any number of concurrent readers.
//!
//! ## Core Concepts
//!
//! - **Messages**: Immutable, store-assigned ids in commit order
//! - **Hub**: In-memory fan-out into bounded per-subscriber buffers
//! - **Streams**: History after a cursor, then live, each message exactly once
//! - **Rendering**: Closed set of content types, dispatched exhaustively
//!
//! ## Example
//!
//! ```ignore
//! use chatfeed::{Author, Feed, MessageInput};
//!
//! let feed = Feed::memory();
//!
//! // Reader attaches with no cursor: latest snapshot, then live
//! let mut stream = feed.stream(None)?;
//!
//! feed.post(MessageInput::markdown(Author::new("ann", "ann.png"), "**hi**"))?;
//!
//! for view in stream.by_ref().take(1) {
//!     println!("{} {}", view.id, view.content);
//! }
//!
//! // Reconnect later without losing anything
//! let resumed = feed.stream(stream.cursor())?;
//! ```

pub mod error;
pub mod feed;
pub mod hub;
pub mod messages;
pub mod render;
pub mod stream;
pub mod types;

// Re-exports
pub use error::{FeedError, Result};
pub use feed::{Feed, FeedConfig};
pub use hub::{BroadcastHub, DropReason, HubConfig, Subscription, SubscriptionId, SubscriptionState};
pub use messages::{LogStore, MemoryStore, MessageIndex, MessageLog, MessageStore, StoreConfig};
pub use render::render;
pub use stream::MessageStream;
pub use types::*;
