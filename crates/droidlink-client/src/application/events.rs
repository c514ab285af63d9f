//! Typed listener registry shared by every client component.
//!
//! Each component defines an event enum and a matching `Kind` enum.  Listeners
//! subscribe to one kind; [`EventRegistry::emit`] calls every listener for the
//! event's kind in registration order.
//!
//! # Re-entrancy
//!
//! The listener list is cloned out of the lock before any callback runs, so a
//! listener may subscribe, unsubscribe, or emit from inside its own callback
//! without deadlocking.  A listener removed during an emission still receives
//! that one event.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// An event that can be routed by kind.
pub trait Event: Send + Sync + 'static {
    type Kind: Copy + Eq + Hash + Debug + Send + Sync + 'static;

    fn kind(&self) -> Self::Kind;
}

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Listeners<E: Event> {
    next_id: u64,
    by_kind: HashMap<E::Kind, Vec<(u64, Listener<E>)>>,
}

/// Kind-keyed listener lists.  Cloning yields another handle to the same lists.
pub struct EventRegistry<E: Event> {
    inner: Arc<Mutex<Listeners<E>>>,
}

impl<E: Event> Clone for EventRegistry<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: Event> Default for EventRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Event> EventRegistry<E> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Listeners {
                next_id: 0,
                by_kind: HashMap::new(),
            })),
        }
    }

    /// Registers `listener` for events of `kind`.
    ///
    /// The listener stays registered until [`Subscription::unsubscribe`] is
    /// called or the registry is cleared; dropping the handle does not remove it.
    pub fn subscribe<F>(&self, kind: E::Kind, listener: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = {
            let mut inner = lock(&self.inner);
            let id = inner.next_id;
            inner.next_id += 1;
            inner
                .by_kind
                .entry(kind)
                .or_default()
                .push((id, Arc::new(listener)));
            id
        };

        let registry: Weak<Mutex<Listeners<E>>> = Arc::downgrade(&self.inner);
        Subscription {
            remove: Some(Box::new(move || {
                if let Some(inner) = registry.upgrade() {
                    let mut inner = lock(&inner);
                    if let Some(list) = inner.by_kind.get_mut(&kind) {
                        list.retain(|(listener_id, _)| *listener_id != id);
                        if list.is_empty() {
                            inner.by_kind.remove(&kind);
                        }
                    }
                }
            })),
        }
    }

    /// Calls every listener registered for `event.kind()`, in registration order.
    ///
    /// Returns `false` when nobody was listening.
    pub fn emit(&self, event: &E) -> bool {
        let listeners: Vec<Listener<E>> = {
            let inner = lock(&self.inner);
            match inner.by_kind.get(&event.kind()) {
                Some(list) => list.iter().map(|(_, l)| Arc::clone(l)).collect(),
                None => return false,
            }
        };
        for listener in &listeners {
            listener(event);
        }
        true
    }

    pub fn listener_count(&self, kind: E::Kind) -> usize {
        lock(&self.inner).by_kind.get(&kind).map_or(0, Vec::len)
    }

    /// Number of kinds that currently have at least one listener.
    pub fn tracked_kinds(&self) -> usize {
        lock(&self.inner).by_kind.len()
    }

    /// Removes every listener of every kind.
    pub fn clear(&self) {
        lock(&self.inner).by_kind.clear();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Listeners run outside the lock, so a poisoned mutex only means a
    // panic during bookkeeping; the map itself is still consistent.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle returned by [`EventRegistry::subscribe`].
#[must_use = "keep the subscription to be able to unsubscribe"]
pub struct Subscription {
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Removes the listener.  Calling this after the registry is gone is a no-op.
    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.remove.is_some())
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
