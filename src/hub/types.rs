//! Hub configuration and subscription lifecycle types.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};

/// Configuration for the broadcast hub.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Max buffered messages per subscriber before it is dropped.
    /// Default: 1000
    pub buffer_size: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self { buffer_size: 1000 }
    }
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Where a subscription is in its life.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Registered with the hub, consumer has not read yet.
    Attached,
    /// Consumer has started reading.
    Draining,
    /// Terminal. The hub no longer delivers to it.
    Detached,
}

/// Why a subscription was detached.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Explicitly detached or dropped by its owner.
    Unsubscribed,
    /// The hub was shut down.
    Shutdown,
}

const ATTACHED: u8 = 0;
const DRAINING: u8 = 1;
const DETACHED: u8 = 2;

/// Lifecycle shared between the hub's entry and the consumer's handle.
#[derive(Debug, Default)]
pub(crate) struct Lifecycle {
    state: AtomicU8,
    reason: Mutex<Option<DropReason>>,
}

impl Lifecycle {
    pub(crate) fn state(&self) -> SubscriptionState {
        match self.state.load(Ordering::Acquire) {
            ATTACHED => SubscriptionState::Attached,
            DRAINING => SubscriptionState::Draining,
            _ => SubscriptionState::Detached,
        }
    }

    pub(crate) fn is_detached(&self) -> bool {
        self.state.load(Ordering::Acquire) == DETACHED
    }

    /// Attached -> Draining. No effect in any other state.
    pub(crate) fn begin_draining(&self) {
        let _ = self
            .state
            .compare_exchange(ATTACHED, DRAINING, Ordering::AcqRel, Ordering::Acquire);
    }

    /// Move to Detached. Returns false if already detached; the first
    /// reason wins.
    pub(crate) fn detach(&self, reason: DropReason) -> bool {
        let mut slot = self.reason.lock();
        if self.state.swap(DETACHED, Ordering::AcqRel) == DETACHED {
            return false;
        }
        *slot = Some(reason);
        true
    }

    pub(crate) fn reason(&self) -> Option<DropReason> {
        self.reason.lock().clone()
    }
}
