// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Import lifecycle events.
//!
//! Each [`Repository`](crate::Repository) owns an [`EventBus`]. Publishing
//! never blocks the write path: the send is spawned onto the runtime and
//! delivery is best effort (slow subscribers lag, absent ones miss events).
//!
//! ```
//! use modelbase::events::{EventBus, ImportEvent};
//! use modelbase::Row;
//!
//! let bus = EventBus::new(16);
//! let mut rx = bus.subscribe();
//! bus.publish(ImportEvent::Created(Row::new().with("id", 1)));
//! assert_eq!(rx.try_recv().unwrap().name(), "import.created");
//! ```

use tokio::sync::broadcast;
use tracing::debug;

use crate::value::Row;

pub const IMPORT_CREATED: &str = "import.created";
pub const IMPORT_UPDATED: &str = "import.updated";

#[derive(Debug, Clone, PartialEq)]
pub enum ImportEvent {
    /// Row inserted by an import, in external form.
    Created(Row),
    /// Row updated (or restored) by an import, in external form.
    Updated(Row),
}

impl ImportEvent {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ImportEvent::Created(_) => IMPORT_CREATED,
            ImportEvent::Updated(_) => IMPORT_UPDATED,
        }
    }

    #[must_use]
    pub fn row(&self) -> &Row {
        match self {
            ImportEvent::Created(row) | ImportEvent::Updated(row) => row,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ImportEvent>,
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ImportEvent> {
        self.sender.subscribe()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Fire-and-forget. Inside a runtime the send happens on a spawned task;
    /// outside one it happens inline.
    pub fn publish(&self, event: ImportEvent) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let sender = self.sender.clone();
                handle.spawn(async move { send(&sender, event) });
            }
            Err(_) => send(&self.sender, event),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

fn send(sender: &broadcast::Sender<ImportEvent>, event: ImportEvent) {
    let name = event.name();
    if sender.send(event).is_err() {
        debug!(event = name, "No subscribers for event");
    }
}
