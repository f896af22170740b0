//! # Event Bus
//!
//! In-process typed publish/subscribe. Producers (the Transfer Service,
//! combat, chat) publish [`WorldEvent`]s; any number of subscribers receive
//! them synchronously, in registration order, with at-most-once, no-history
//! semantics: nothing is buffered or replayed, and a subscriber registered
//! after a publish never sees that event.
//!
//! Handlers run inline in the publishing call, so a slow handler delays the
//! handlers after it. Subscribers are expected to enqueue work (typically
//! onto an unbounded channel) rather than perform long-running operations in
//! the handler itself.

use crate::events::{EventKind, WorldEvent};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

type Handler = Arc<dyn Fn(&WorldEvent) + Send + Sync>;

/// Proof of a registration, used to remove it again.
///
/// Handles are not forgeable outside this module and unsubscribing twice is
/// a harmless no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionHandle {
    kind: EventKind,
    id: u64,
}

/// Counters kept for operational visibility.
#[derive(Debug, Clone, Default)]
pub struct EventBusStats {
    /// Total events published since construction.
    pub events_published: u64,
    /// Total handler invocations since construction.
    pub handlers_invoked: u64,
}

/// The in-process event bus.
///
/// Constructed explicitly during startup and passed by `Arc` to every
/// component that needs it; there is no ambient global instance.
pub struct EventBus {
    /// Registered handlers per event kind. The vec preserves registration
    /// order, which is the delivery order.
    handlers: DashMap<EventKind, Vec<(u64, Handler)>>,
    next_id: AtomicU64,
    events_published: AtomicU64,
    handlers_invoked: AtomicU64,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("kinds", &self.handlers.len())
            .field(
                "events_published",
                &self.events_published.load(Ordering::Relaxed),
            )
            .finish()
    }
}

impl EventBus {
    /// Creates a bus with no registered subscribers.
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
            next_id: AtomicU64::new(1),
            events_published: AtomicU64::new(0),
            handlers_invoked: AtomicU64::new(0),
        }
    }

    /// Registers `handler` for every future event of `kind`.
    ///
    /// Delivery order among subscribers of the same kind is their
    /// registration order.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionHandle
    where
        F: Fn(&WorldEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        trace!("📝 Registered subscriber {} for {:?}", id, kind);
        SubscriptionHandle { kind, id }
    }

    /// Removes the registration behind `handle`.
    ///
    /// Returns `false` if the handle was already unsubscribed.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let Some(mut entry) = self.handlers.get_mut(&handle.kind) else {
            return false;
        };
        let before = entry.len();
        entry.retain(|(id, _)| *id != handle.id);
        before != entry.len()
    }

    /// Delivers `event` to every subscriber currently registered for its
    /// kind, synchronously and in registration order.
    pub fn publish(&self, event: &WorldEvent) {
        self.events_published.fetch_add(1, Ordering::Relaxed);

        // Snapshot under the shard lock, invoke outside it: a handler that
        // subscribes or unsubscribes mid-delivery must not deadlock.
        let snapshot: Vec<Handler> = match self.handlers.get(&event.kind()) {
            Some(entry) => entry.iter().map(|(_, h)| h.clone()).collect(),
            None => return,
        };

        for handler in snapshot {
            self.handlers_invoked.fetch_add(1, Ordering::Relaxed);
            handler(event);
        }
    }

    /// Number of subscribers currently registered for `kind`.
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.handlers.get(&kind).map(|v| v.len()).unwrap_or(0)
    }

    /// Current counter values.
    pub fn stats(&self) -> EventBusStats {
        EventBusStats {
            events_published: self.events_published.load(Ordering::Relaxed),
            handlers_invoked: self.handlers_invoked.load(Ordering::Relaxed),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ActorId, LocationId};
    use std::sync::Mutex;

    fn died_in(location: &str) -> WorldEvent {
        WorldEvent::ActorDied {
            actor: ActorId::new(),
            location: LocationId::from(location),
            timestamp: 0,
        }
    }

    #[test]
    fn delivery_follows_registration_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second", "third"] {
            let seen = seen.clone();
            bus.subscribe(EventKind::ActorDied, move |_| {
                seen.lock().unwrap().push(label);
            });
        }

        bus.publish(&died_in("crypt"));
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn no_history_for_late_subscribers() {
        let bus = EventBus::new();
        bus.publish(&died_in("crypt"));

        let seen = Arc::new(Mutex::new(0usize));
        let seen_in_handler = seen.clone();
        bus.subscribe(EventKind::ActorDied, move |_| {
            *seen_in_handler.lock().unwrap() += 1;
        });

        // Nothing replayed at subscription time; only the next publish lands.
        assert_eq!(*seen.lock().unwrap(), 0);
        bus.publish(&died_in("crypt"));
        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(0usize));
        let seen_in_handler = seen.clone();
        let handle = bus.subscribe(EventKind::ActorDied, move |_| {
            *seen_in_handler.lock().unwrap() += 1;
        });

        bus.publish(&died_in("crypt"));
        assert!(bus.unsubscribe(handle));
        assert!(!bus.unsubscribe(handle));
        bus.publish(&died_in("crypt"));

        assert_eq!(*seen.lock().unwrap(), 1);
        assert_eq!(bus.subscriber_count(EventKind::ActorDied), 0);
    }

    #[test]
    fn kinds_are_isolated() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(0usize));
        let seen_in_handler = seen.clone();
        bus.subscribe(EventKind::ActorEntered, move |_| {
            *seen_in_handler.lock().unwrap() += 1;
        });

        bus.publish(&died_in("crypt"));
        assert_eq!(*seen.lock().unwrap(), 0);
    }

    #[test]
    fn stats_count_publishes_and_invocations() {
        let bus = EventBus::new();
        bus.subscribe(EventKind::ActorDied, |_| {});
        bus.subscribe(EventKind::ActorDied, |_| {});
        bus.publish(&died_in("crypt"));

        let stats = bus.stats();
        assert_eq!(stats.events_published, 1);
        assert_eq!(stats.handlers_invoked, 2);
    }
}
