//! Event bus - type-keyed subscriber registry
//!
//! Owned by the connection actor. Every inbound envelope is emitted here by
//! its `type`, whether or not it also completed a pending request.

use serde_json::Value;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tokio::sync::mpsc;
use tracing::{error, trace};

use super::connection::Command;

/// Subscriber callback
pub type EventCallback = Box<dyn Fn(&Value) + Send + 'static>;

/// Run a user callback, containing any panic it raises
pub(crate) fn isolate<F: FnOnce()>(what: &str, f: F) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        error!("{} callback panicked; continuing dispatch", what);
    }
}

/// Subscribers grouped by event type, in subscription order
#[derive(Default)]
pub struct EventBus {
    listeners: HashMap<String, Vec<(u64, EventCallback)>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber under a caller-chosen id
    pub fn subscribe(&mut self, event: impl Into<String>, id: u64, callback: EventCallback) {
        self.listeners.entry(event.into()).or_default().push((id, callback));
    }

    /// Remove a subscriber; returns whether it existed
    pub fn unsubscribe(&mut self, event: &str, id: u64) -> bool {
        let Some(list) = self.listeners.get_mut(event) else {
            return false;
        };
        let before = list.len();
        list.retain(|(sub_id, _)| *sub_id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            self.listeners.remove(event);
        }
        removed
    }

    /// Deliver `payload` to every subscriber of `event`.
    ///
    /// Returns the number of subscribers invoked, panicking ones included.
    pub fn emit(&self, event: &str, payload: &Value) -> usize {
        let Some(list) = self.listeners.get(event) else {
            return 0;
        };
        trace!("Dispatching '{}' to {} subscriber(s)", event, list.len());
        for (_, callback) in list {
            isolate(event, || callback(payload));
        }
        list.len()
    }

    /// Number of subscribers for `event`
    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners.get(event).map_or(0, Vec::len)
    }
}

/// Handle returned by [`GatewayClient::on`](crate::gateway::GatewayClient::on).
///
/// Dropping the handle keeps the subscription alive; call
/// [`unsubscribe`](Subscription::unsubscribe) to remove it.
#[derive(Debug)]
pub struct Subscription {
    event: String,
    id: u64,
    commands: mpsc::WeakUnboundedSender<Command>,
}

impl Subscription {
    pub(crate) fn new(event: String, id: u64, commands: mpsc::WeakUnboundedSender<Command>) -> Self {
        Subscription { event, id, commands }
    }

    /// Event type this subscription listens to
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Stop receiving events
    pub fn unsubscribe(self) {
        if let Some(tx) = self.commands.upgrade() {
            let _ = tx.send(Command::Unsubscribe {
                event: self.event,
                id: self.id,
            });
        }
    }
}
