//! Typed publish/subscribe with isolated listeners.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::error;

/// An event that can travel on an [`EventBus`].
pub trait BusEvent: Send + Sync + 'static {
    /// Discriminant listeners subscribe to.
    type Kind: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    /// The kind of this event.
    fn kind(&self) -> Self::Kind;
}

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Entry<E> {
    id: u64,
    once: bool,
    listener: Listener<E>,
}

struct BusInner<E: BusEvent> {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<E::Kind, Vec<Entry<E>>>>,
}

impl<E: BusEvent> BusInner<E> {
    fn remove(&self, kind: E::Kind, id: u64) -> bool {
        let mut listeners = self.listeners.lock();
        let Some(entries) = listeners.get_mut(&kind) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|e| e.id != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            listeners.remove(&kind);
        }
        removed
    }
}

/// Multi-listener event bus.
///
/// Listeners run synchronously on the emitting task, in subscription order.
/// A panicking listener is logged and skipped; the others still run.
pub struct EventBus<E: BusEvent> {
    inner: Arc<BusInner<E>>,
}

impl<E: BusEvent> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E: BusEvent> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: BusEvent> fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("kinds", &self.inner.listeners.lock().len())
            .finish()
    }
}

impl<E: BusEvent> EventBus<E> {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                next_id: AtomicU64::new(0),
                listeners: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to every event of `kind`.
    pub fn on<F>(&self, kind: E::Kind, listener: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.add(kind, false, Arc::new(listener))
    }

    /// Subscribe to the next event of `kind` only.
    pub fn once<F>(&self, kind: E::Kind, listener: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.add(kind, true, Arc::new(listener))
    }

    fn add(&self, kind: E::Kind, once: bool, listener: Listener<E>) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .lock()
            .entry(kind)
            .or_default()
            .push(Entry { id, once, listener });

        let weak: Weak<BusInner<E>> = Arc::downgrade(&self.inner);
        Subscription {
            cancel: Some(Box::new(move || {
                weak.upgrade().is_some_and(|inner| inner.remove(kind, id))
            })),
        }
    }

    /// Deliver an event to every listener of its kind. Returns how many
    /// listeners completed without panicking.
    pub fn emit(&self, event: &E) -> usize {
        let kind = event.kind();
        let targets: Vec<(u64, Listener<E>)> = {
            let mut listeners = self.inner.listeners.lock();
            let Some(entries) = listeners.get_mut(&kind) else {
                return 0;
            };
            let targets = entries
                .iter()
                .map(|e| (e.id, e.listener.clone()))
                .collect();
            entries.retain(|e| !e.once);
            if entries.is_empty() {
                listeners.remove(&kind);
            }
            targets
        };

        let mut delivered = 0;
        for (id, listener) in targets {
            match catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(()) => delivered += 1,
                Err(_) => error!(kind = ?kind, listener_id = id, "Event listener panicked"),
            }
        }
        delivered
    }

    /// Number of listeners for a kind.
    pub fn listener_count(&self, kind: E::Kind) -> usize {
        self.inner
            .listeners
            .lock()
            .get(&kind)
            .map_or(0, Vec::len)
    }

    /// Drop every listener.
    pub fn clear(&self) {
        self.inner.listeners.lock().clear();
    }
}

/// Handle returned by [`EventBus::on`]; dropping it keeps the listener.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() -> bool + Send + Sync>>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

impl Subscription {
    /// Remove the listener. Returns `false` if it was already gone.
    pub fn unsubscribe(mut self) -> bool {
        self.cancel.take().is_some_and(|cancel| cancel())
    }
}
