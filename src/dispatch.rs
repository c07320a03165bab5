//! Observer registry for inbound frames and connection changes

use crate::messages::{self, ServerFrame};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use tracing::{error, warn};
use uuid::Uuid;

/// Handler for inbound frames
pub type MessageHandler = Arc<dyn Fn(&ServerFrame) + Send + Sync>;

/// Handler for connection changes (`true` = open)
pub type ConnectionHandler = Arc<dyn Fn(bool) + Send + Sync>;

/// Which observer list a subscription lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ObserverKind {
    Message,
    Connection,
}

/// A registered observer.
///
/// Dropping the handle leaves the observer registered for the lifetime of
/// the channel; call [`Subscription::unsubscribe`] to remove it.
pub struct Subscription {
    id: Uuid,
    kind: ObserverKind,
    registry: Weak<Dispatcher>,
}

impl Subscription {
    /// Remove the observer; returns false if it was already gone
    pub fn unsubscribe(self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry.remove(self.kind, self.id),
            None => false,
        }
    }
}

/// Holds both observer lists and fans events out in registration order
#[derive(Default)]
pub struct Dispatcher {
    message_handlers: Mutex<Vec<(Uuid, MessageHandler)>>,
    connection_handlers: Mutex<Vec<(Uuid, ConnectionHandler)>>,
}

impl Dispatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on_message(self: &Arc<Self>, handler: MessageHandler) -> Subscription {
        let id = Uuid::new_v4();
        self.message_handlers.lock().push((id, handler));
        self.subscription(id, ObserverKind::Message)
    }

    pub fn on_connection_change(self: &Arc<Self>, handler: ConnectionHandler) -> Subscription {
        let id = Uuid::new_v4();
        self.connection_handlers.lock().push((id, handler));
        self.subscription(id, ObserverKind::Connection)
    }

    fn subscription(self: &Arc<Self>, id: Uuid, kind: ObserverKind) -> Subscription {
        Subscription {
            id,
            kind,
            registry: Arc::downgrade(self),
        }
    }

    fn remove(&self, kind: ObserverKind, id: Uuid) -> bool {
        match kind {
            ObserverKind::Message => {
                let mut handlers = self.message_handlers.lock();
                let before = handlers.len();
                handlers.retain(|(hid, _)| *hid != id);
                handlers.len() != before
            }
            ObserverKind::Connection => {
                let mut handlers = self.connection_handlers.lock();
                let before = handlers.len();
                handlers.retain(|(hid, _)| *hid != id);
                handlers.len() != before
            }
        }
    }

    pub fn message_observer_count(&self) -> usize {
        self.message_handlers.lock().len()
    }

    pub fn connection_observer_count(&self) -> usize {
        self.connection_handlers.lock().len()
    }

    /// Call every message handler with `frame`
    pub fn notify_message(&self, frame: &ServerFrame) {
        // Snapshot so handlers may register observers without deadlocking
        let handlers: Vec<MessageHandler> = self
            .message_handlers
            .lock()
            .iter()
            .map(|(_, h)| h.clone())
            .collect();

        for (index, handler) in handlers.iter().enumerate() {
            if catch_unwind(AssertUnwindSafe(|| handler(frame))).is_err() {
                error!(observer = index, job_id = ?frame.job_id, "Message observer panicked");
            }
        }
    }

    /// Call every connection handler with `connected`
    pub fn notify_connection(&self, connected: bool) {
        let handlers: Vec<ConnectionHandler> = self
            .connection_handlers
            .lock()
            .iter()
            .map(|(_, h)| h.clone())
            .collect();

        for (index, handler) in handlers.iter().enumerate() {
            if catch_unwind(AssertUnwindSafe(|| handler(connected))).is_err() {
                error!(observer = index, connected, "Connection observer panicked");
            }
        }
    }

    /// Decode a text frame and fan it out; malformed frames are dropped
    pub fn dispatch_text(&self, payload: &str) {
        match messages::decode(payload) {
            Ok(frame) => self.notify_message(&frame),
            Err(e) => warn!(error = %e, len = payload.len(), "Dropping malformed frame"),
        }
    }

    /// Binary counterpart of [`Dispatcher::dispatch_text`]
    pub fn dispatch_bytes(&self, payload: &[u8]) {
        match messages::decode_bytes(payload) {
            Ok(frame) => self.notify_message(&frame),
            Err(e) => warn!(error = %e, len = payload.len(), "Dropping malformed binary frame"),
        }
    }
}
