use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::debug;

use super::{Listener, Query};

struct Entry {
    id: u64,
    query: Query,
    listener: Arc<Listener>,
}

/// Live queries registered against one store.
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    entries: Mutex<Vec<Entry>>,
}

impl ListenerRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(
        self: &Arc<Self>,
        query: Query,
        listener: Listener,
    ) -> (ListenerRegistration, Arc<Listener>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let listener = Arc::new(listener);
        debug!(listener = id, collection = %query.collection, "registered listener");
        self.entries().push(Entry {
            id,
            query,
            listener: Arc::clone(&listener),
        });

        let registration = ListenerRegistration {
            id,
            registry: Arc::downgrade(self),
        };
        (registration, listener)
    }

    /// Listeners whose query reads `collection`. Returned as owned handles so
    /// callers can invoke them without holding the registry lock.
    pub fn watching(&self, collection: &str) -> Vec<(Query, Arc<Listener>)> {
        self.entries()
            .iter()
            .filter(|entry| entry.query.collection == collection)
            .map(|entry| (entry.query.clone(), Arc::clone(&entry.listener)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(&self, id: u64) {
        self.entries().retain(|entry| entry.id != id);
        debug!(listener = id, "removed listener");
    }

    fn entries(&self) -> MutexGuard<'_, Vec<Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle for a live query; dropping it unsubscribes.
#[must_use = "dropping the registration removes the listener"]
pub struct ListenerRegistration {
    id: u64,
    registry: Weak<ListenerRegistry>,
}

impl ListenerRegistration {
    /// A registration that was never attached to a store, for subscriptions
    /// refused up front.
    pub fn detached() -> Self {
        Self {
            id: u64::MAX,
            registry: Weak::new(),
        }
    }

    pub fn remove(self) {
        drop(self);
    }
}

impl Drop for ListenerRegistration {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

impl std::fmt::Debug for ListenerRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistration")
            .field("id", &self.id)
            .field("attached", &(self.registry.strong_count() > 0))
            .finish()
    }
}
