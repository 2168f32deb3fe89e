//! Live fan-out of newly persisted messages.
//!
//! The [`BroadcastHub`] owns the set of attached [`Subscription`]s. Every
//! committed message is pushed into each subscriber's bounded buffer without
//! waiting on any consumer:
//!
//! - membership changes and fan-out are mutually exclusive (one `RwLock`)
//! - a full buffer detaches only that subscriber, with
//!   [`DropReason::BufferOverflow`]; what it already buffered stays readable
//! - dropping a [`Subscription`] detaches it synchronously
//!
//! # Example
//!
//! ```ignore
//! let hub = BroadcastHub::default();
//! let mut sub = hub.attach(None);
//!
//! hub.notify(&message);
//!
//! loop {
//!     match sub.recv() {
//!         Ok(view) => println!("{}: {}", view.author.name, view.content),
//!         Err(FeedError::SubscriptionDropped(reason)) => break,
//!         Err(_) => break,
//!     }
//! }
//! ```

mod manager;
mod subscription;
mod types;

pub use manager::BroadcastHub;
pub use subscription::Subscription;
pub use types::{DropReason, HubConfig, SubscriptionId, SubscriptionState};
