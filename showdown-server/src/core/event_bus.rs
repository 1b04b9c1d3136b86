//! Broadcast channel carrying committed state changes.
//!
//! The `StateStore` publishes exactly one `StateChange` per commit while it
//! still holds its mutation lock, so subscribers observe commits in order.
//! Each broadcast router owns one receiver.

use std::sync::Arc;

use tokio::sync::broadcast;

use super::show_state::{FieldSet, ShowState};

/// Capacity before slow subscribers start lagging.
const BUS_CAPACITY: usize = 1024;

/// A committed mutation: immutable before/after snapshots and what differs.
#[derive(Clone, Debug)]
pub struct StateChange {
    pub previous: Arc<ShowState>,
    pub next: Arc<ShowState>,
    pub changed: FieldSet,
}

/// Broadcast channel that fans out state changes to all subscribers.
pub struct ChangeBus {
    sender: broadcast::Sender<StateChange>,
}

impl ChangeBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self { sender }
    }

    /// Publish a change to all subscribers. Silently drops if no receivers.
    pub fn publish(&self, change: StateChange) {
        let _ = self.sender.send(change);
    }

    /// Create a new receiver that will get all future changes.
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.sender.subscribe()
    }
}

impl Default for ChangeBus {
    fn default() -> Self {
        Self::new()
    }
}
