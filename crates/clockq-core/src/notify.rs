//! Notification registry
//!
//! Callbacks are invoked synchronously, in registration order, on the thread
//! that raises the notification. The subscriber list is copy-on-write so no
//! lock is held while callbacks run.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

/// Handle returned by [`Notifier::subscribe`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Ordered registry of callbacks for one kind of notification
pub struct Notifier<E> {
    next_id: AtomicU64,
    subscribers: RwLock<Arc<Vec<(SubscriptionId, Callback<E>)>>>,
}

impl<E> Notifier<E> {
    pub fn new() -> Self {
        Notifier {
            next_id: AtomicU64::new(1),
            subscribers: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Register a callback. It will see every notification raised after
    /// this call returns.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut subscribers = self.subscribers.write();
        let mut next = Vec::with_capacity(subscribers.len() + 1);
        next.extend(subscribers.iter().cloned());
        next.push((id, Arc::new(callback) as Callback<E>));
        *subscribers = Arc::new(next);
        id
    }

    /// Remove a callback. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        if !subscribers.iter().any(|(existing, _)| *existing == id) {
            return false;
        }
        let next = subscribers
            .iter()
            .filter(|(existing, _)| *existing != id)
            .cloned()
            .collect();
        *subscribers = Arc::new(next);
        true
    }

    /// Invoke every registered callback with `event`
    pub fn notify(&self, event: &E) {
        let snapshot = Arc::clone(&self.subscribers.read());
        for (_, callback) in snapshot.iter() {
            callback(event);
        }
    }

    pub fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.read().is_empty()
    }
}

impl<E> Default for Notifier<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for Notifier<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("subscribers", &self.len())
            .finish()
    }
}
