//! Subscriber registry and synchronous dispatch.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::warn;

use crate::event::{AgentEvent, EventKind};

type Handler = Arc<dyn Fn(&AgentEvent) + Send + Sync>;

struct Entry {
    id: u64,
    handler: Handler,
}

#[derive(Default)]
struct Registry {
    by_kind: HashMap<EventKind, Vec<Entry>>,
    wildcard: Vec<Entry>,
}

struct Inner {
    registry: Mutex<Registry>,
    next_id: AtomicU64,
}

/// In-process typed event bus.
///
/// Cheap to clone; clones share the subscriber registry. Publishing runs
/// every matching subscriber synchronously, in registration order, before
/// returning to the emitter.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl EventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: Mutex::new(Registry::default()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Subscribe to one event kind.
    ///
    /// The returned [`Subscription`] detaches the handler when dropped, so
    /// hold on to it for as long as the handler should live.
    #[must_use = "dropping the subscription detaches the handler"]
    pub fn subscribe(
        &self,
        kind: EventKind,
        handler: impl Fn(&AgentEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .registry
            .lock()
            .by_kind
            .entry(kind)
            .or_default()
            .push(Entry {
                id,
                handler: Arc::new(handler),
            });
        Subscription {
            inner: Arc::downgrade(&self.inner),
            kind: Some(kind),
            id,
        }
    }

    /// Subscribe to every event kind (UI observers, loggers).
    #[must_use = "dropping the subscription detaches the handler"]
    pub fn subscribe_all(
        &self,
        handler: impl Fn(&AgentEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.registry.lock().wildcard.push(Entry {
            id,
            handler: Arc::new(handler),
        });
        Subscription {
            inner: Arc::downgrade(&self.inner),
            kind: None,
            id,
        }
    }

    /// Publish an event to all subscribers of its kind.
    ///
    /// Delivery order: kind-specific subscribers first, then wildcard
    /// subscribers, each in registration order. A panicking handler is
    /// caught and logged; delivery continues with the next handler.
    pub fn publish(&self, event: &AgentEvent) {
        // Snapshot handlers so a subscriber can (un)subscribe re-entrantly
        // without deadlocking on the registry lock.
        let handlers: Vec<Handler> = {
            let registry = self.inner.registry.lock();
            registry
                .by_kind
                .get(&event.kind())
                .map(|entries| entries.iter().map(|e| Arc::clone(&e.handler)))
                .into_iter()
                .flatten()
                .chain(registry.wildcard.iter().map(|e| Arc::clone(&e.handler)))
                .collect()
        };

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                warn!(kind = ?event.kind(), "event subscriber panicked; delivery continues");
            }
        }
    }

    /// Number of subscribers for a kind (wildcard subscribers excluded).
    #[must_use]
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.inner
            .registry
            .lock()
            .by_kind
            .get(&kind)
            .map_or(0, Vec::len)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").finish_non_exhaustive()
    }
}

/// Handle to a registered subscriber.
///
/// Dropping it (or calling [`Subscription::unsubscribe`]) detaches the
/// handler.
pub struct Subscription {
    inner: Weak<Inner>,
    kind: Option<EventKind>,
    id: u64,
}

impl Subscription {
    /// Explicitly detach the handler.
    pub fn unsubscribe(self) {
        drop(self);
    }

    fn detach(&self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let mut registry = inner.registry.lock();
        match self.kind {
            Some(kind) => {
                if let Some(entries) = registry.by_kind.get_mut(&kind) {
                    entries.retain(|e| e.id != self.id);
                }
            }
            None => registry.wildcard.retain(|e| e.id != self.id),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
