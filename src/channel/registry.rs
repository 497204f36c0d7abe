//! Type-keyed listener registry.
//!
//! Tracks which callbacks are interested in which message types and
//! dispatches inbound frames to them. Listeners registered for the exact
//! type fire before wildcard (`"*"`) listeners, each group in
//! registration order, and a failing listener never blocks the others.

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};

use super::messages::{Envelope, WILDCARD};

/// A subscriber callback. Invoked synchronously on the reader task, so it
/// must return quickly and must not block.
pub type Listener = Box<dyn Fn(&Envelope) + Send + Sync>;

/// Opaque handle identifying one registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct RegisteredListener {
    id: ListenerId,
    callback: Listener,
}

/// Mapping from message type (or [`WILDCARD`]) to its listeners.
///
/// An entry whose listener set becomes empty is pruned immediately, so
/// repeated subscribe/unsubscribe cycles do not grow the map.
#[derive(Default)]
pub struct SubscriberRegistry {
    listeners: HashMap<String, Vec<RegisteredListener>>,
    next_id: u64,
}

impl SubscriberRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` under `message_type` and returns its handle.
    pub fn subscribe(&mut self, message_type: &str, callback: Listener) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.listeners
            .entry(message_type.to_string())
            .or_default()
            .push(RegisteredListener { id, callback });
        id
    }

    /// Removes exactly the listener identified by `id` from
    /// `message_type`, pruning the entry if it becomes empty.
    pub fn unsubscribe(&mut self, message_type: &str, id: ListenerId) {
        if let Some(entries) = self.listeners.get_mut(message_type) {
            entries.retain(|entry| entry.id != id);
            if entries.is_empty() {
                self.listeners.remove(message_type);
            }
        }
    }

    /// Delivers a frame: exact-type listeners first, then wildcard
    /// listeners, each group in registration order.
    ///
    /// A panicking listener is logged and skipped; delivery to the
    /// remaining listeners continues.
    pub fn dispatch(&self, envelope: &Envelope) {
        self.dispatch_to(&envelope.message_type, envelope);
        if envelope.message_type != WILDCARD {
            self.dispatch_to(WILDCARD, envelope);
        }
    }

    /// Removes every listener for every type.
    pub fn clear(&mut self) {
        self.listeners.clear();
    }

    /// Number of message types with at least one listener.
    #[must_use]
    pub fn type_count(&self) -> usize {
        self.listeners.len()
    }

    /// Number of listeners registered for `message_type`.
    #[must_use]
    pub fn listener_count(&self, message_type: &str) -> usize {
        self.listeners.get(message_type).map_or(0, Vec::len)
    }

    fn dispatch_to(&self, message_type: &str, envelope: &Envelope) {
        let Some(entries) = self.listeners.get(message_type) else {
            return;
        };
        for entry in entries {
            let outcome = catch_unwind(AssertUnwindSafe(|| (entry.callback)(envelope)));
            if outcome.is_err() {
                tracing::error!(
                    message_type = %envelope.message_type,
                    "listener panicked; continuing delivery"
                );
            }
        }
    }
}

impl fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("types", &self.type_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::unwrap_used)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    fn recording_listener(log: &Arc<Mutex<Vec<&'static str>>>, tag: &'static str) -> Listener {
        let log = Arc::clone(log);
        Box::new(move |_| log.lock().unwrap().push(tag))
    }

    #[test]
    fn exact_listeners_fire_before_wildcard() {
        let mut registry = SubscriberRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        registry.subscribe(WILDCARD, recording_listener(&log, "wild"));
        registry.subscribe("foo", recording_listener(&log, "exact-1"));
        registry.subscribe("foo", recording_listener(&log, "exact-2"));

        registry.dispatch(&Envelope::new("foo"));

        assert_eq!(*log.lock().unwrap(), ["exact-1", "exact-2", "wild"]);
    }

    #[test]
    fn unrelated_types_are_not_notified() {
        let mut registry = SubscriberRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        registry.subscribe("foo", recording_listener(&log, "foo"));
        registry.dispatch(&Envelope::new("bar"));

        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn panicking_listener_does_not_block_the_next_one() {
        let mut registry = SubscriberRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        registry.subscribe("foo", Box::new(|_| panic!("listener bug")));
        registry.subscribe("foo", recording_listener(&log, "survivor"));

        registry.dispatch(&Envelope::new("foo"));

        assert_eq!(*log.lock().unwrap(), ["survivor"]);
    }

    #[test]
    fn unsubscribe_removes_exactly_one_listener() {
        let mut registry = SubscriberRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let id = registry.subscribe("foo", recording_listener(&log, "removed"));
        registry.subscribe("foo", recording_listener(&log, "kept"));
        registry.unsubscribe("foo", id);

        registry.dispatch(&Envelope::new("foo"));

        assert_eq!(*log.lock().unwrap(), ["kept"]);
        assert_eq!(registry.listener_count("foo"), 1);
    }

    #[test]
    fn empty_type_entries_are_pruned() {
        let mut registry = SubscriberRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for _ in 0..100 {
            let id = registry.subscribe("foo", recording_listener(&log, "x"));
            registry.unsubscribe("foo", id);
        }

        assert_eq!(registry.type_count(), 0);
    }

    #[test]
    fn wildcard_frame_is_not_delivered_twice() {
        let mut registry = SubscriberRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        registry.subscribe(WILDCARD, recording_listener(&log, "wild"));
        registry.dispatch(&Envelope::new(WILDCARD));

        assert_eq!(*log.lock().unwrap(), ["wild"]);
    }

    #[test]
    fn clear_drops_all_listeners() {
        let mut registry = SubscriberRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        registry.subscribe("foo", recording_listener(&log, "foo"));
        registry.subscribe(WILDCARD, recording_listener(&log, "wild"));
        registry.clear();

        registry.dispatch(&Envelope::new("foo"));

        assert!(log.lock().unwrap().is_empty());
        assert_eq!(registry.type_count(), 0);
    }
}
