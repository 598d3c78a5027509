//! Change listeners shared by the managers.
//!
//! A `Listeners<T>` is a fan-out registry. Registering returns a
//! [`Subscription`] that removes the listener when `unsubscribe` is called.
//! A listener that panics is logged and skipped; the others still run.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Table<T> {
    next_id: u64,
    entries: BTreeMap<u64, Callback<T>>,
}

/// A set of callbacks notified with a `&T`.
pub struct Listeners<T> {
    table: Arc<Mutex<Table<T>>>,
}

/// Handle returned by [`Listeners::subscribe`].
///
/// Dropping the handle keeps the listener registered.
#[must_use = "keep the subscription to be able to unsubscribe"]
pub struct Subscription {
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Remove the listener. A no-op once the registry itself is gone.
    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

fn lock<T>(table: &Mutex<Table<T>>) -> MutexGuard<'_, Table<T>> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T: 'static> Listeners<T> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            table: Arc::new(Mutex::new(Table {
                next_id: 0,
                entries: BTreeMap::new(),
            })),
        }
    }

    /// Register a listener.
    pub fn subscribe(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = {
            let mut table = lock(&self.table);
            let id = table.next_id;
            table.next_id += 1;
            table.entries.insert(id, Arc::new(listener));
            id
        };

        let weak: Weak<Mutex<Table<T>>> = Arc::downgrade(&self.table);
        Subscription {
            remove: Some(Box::new(move || {
                if let Some(table) = weak.upgrade() {
                    lock(&table).entries.remove(&id);
                }
            })),
        }
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        lock(&self.table).entries.len()
    }

    /// Whether no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call every listener with `value`.
    ///
    /// The registry lock is released before listeners run, so a listener may
    /// read the manager that notified it.
    pub fn notify(&self, value: &T) {
        let callbacks: Vec<Callback<T>> = lock(&self.table).entries.values().cloned().collect();
        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(value))).is_err() {
                tracing::error!("listener panicked; continuing with remaining listeners");
            }
        }
    }
}

impl<T: 'static> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Listeners<T> {
    fn clone(&self) -> Self {
        Self {
            table: Arc::clone(&self.table),
        }
    }
}

impl<T> std::fmt::Debug for Listeners<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners")
            .field("len", &lock(&self.table).entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_notify_reaches_all_listeners() {
        let listeners = Listeners::<u32>::new();
        let total = Arc::new(AtomicU32::new(0));

        let t1 = total.clone();
        let _a = listeners.subscribe(move |v| {
            t1.fetch_add(*v, Ordering::SeqCst);
        });
        let t2 = total.clone();
        let _b = listeners.subscribe(move |v| {
            t2.fetch_add(*v * 10, Ordering::SeqCst);
        });

        listeners.notify(&2);
        assert_eq!(total.load(Ordering::SeqCst), 22);
    }

    #[test]
    fn test_unsubscribe_removes_listener() {
        let listeners = Listeners::<u32>::new();
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let sub = listeners.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        listeners.notify(&0);
        sub.unsubscribe();
        listeners.notify(&0);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(listeners.is_empty());
    }

    #[test]
    fn test_unsubscribe_after_registry_dropped() {
        let listeners = Listeners::<u32>::new();
        let sub = listeners.subscribe(|_| {});
        drop(listeners);
        sub.unsubscribe();
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let listeners = Listeners::<u32>::new();
        let calls = Arc::new(AtomicU32::new(0));

        let _bad = listeners.subscribe(|_| panic!("listener failure"));
        let c = calls.clone();
        let _good = listeners.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        listeners.notify(&1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(listeners.len(), 2);
    }
}
