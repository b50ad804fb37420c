//! # Event Subscription
//!
//! A small multi-listener event bus. Components which produce events (the hub client, the
//! simulator runner) own an [`EventBus`] and let any number of consumers register a listener.
//! Each registration returns a [`SubscriptionId`] which is later used to unregister that listener
//! and only that listener.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};

// ------------------------------------------------------------------------------------------------
// TYPES
// ------------------------------------------------------------------------------------------------

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Identifies one registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Set of listeners for events of type `E`.
pub struct EventBus<E> {
    next_id: AtomicU64,

    listeners: Mutex<Vec<(SubscriptionId, Listener<E>)>>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl<E> EventBus<E> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Register a listener, it will be called for every event emitted from now on.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));

        self.lock().push((id, Arc::new(listener)));

        id
    }

    /// Remove a listener. Returns `false` if no listener with this ID was registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.lock();
        let len_before = listeners.len();

        listeners.retain(|(lid, _)| *lid != id);

        listeners.len() != len_before
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver an event to every listener, in registration order.
    ///
    /// Listeners are called without the internal lock held, so a listener may itself subscribe
    /// or unsubscribe.
    pub fn emit(&self, event: &E) {
        let listeners: Vec<Listener<E>> = self.lock().iter().map(|(_, l)| l.clone()).collect();

        for listener in listeners {
            listener(event);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(SubscriptionId, Listener<E>)>> {
        // A listener panicking while the list is locked can't leave the list inconsistent, so
        // poisoning is ignored
        match self.listeners.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
