//! Keyed listener registries.
//!
//! Listeners are invoked in registration order, outside the registry lock,
//! so a listener may register or remove listeners (including itself) while
//! an emission is running. A listener removed mid-emission is skipped for the
//! rest of that emission.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Process-wide counter so ids are unique across registries.
static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a registered listener, used to remove it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Allocate a fresh id.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

struct Entry<T: ?Sized> {
    id: ListenerId,
    active: Arc<AtomicBool>,
    listener: Arc<T>,
}

/// An ordered set of listeners of type `T` (usually a `dyn Fn`).
pub struct Listeners<T: ?Sized> {
    entries: Mutex<Vec<Entry<T>>>,
}

impl<T: ?Sized> Listeners<T> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Register a listener and return its id.
    pub fn add(&self, listener: Arc<T>) -> ListenerId {
        let id = ListenerId::next();
        self.entries.lock().push(Entry {
            id,
            active: Arc::new(AtomicBool::new(true)),
            listener,
        });
        id
    }

    /// Remove a listener.
    ///
    /// Returns `true` if it was registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.lock();
        match entries.iter().position(|e| e.id == id) {
            Some(index) => {
                let entry = entries.remove(index);
                entry.active.store(false, Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// Remove every listener.
    pub fn clear(&self) {
        let drained: Vec<Entry<T>> = self.entries.lock().drain(..).collect();
        for entry in &drained {
            entry.active.store(false, Ordering::Release);
        }
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Check if no listener is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Check if a listener is registered.
    #[must_use]
    pub fn contains(&self, id: ListenerId) -> bool {
        self.entries.lock().iter().any(|e| e.id == id)
    }

    /// Invoke `f` on every listener registered at the time of the call.
    ///
    /// Returns the number of listeners invoked.
    pub fn for_each(&self, mut f: impl FnMut(&T)) -> usize {
        let snapshot: Vec<(Arc<AtomicBool>, Arc<T>)> = self
            .entries
            .lock()
            .iter()
            .map(|e| (Arc::clone(&e.active), Arc::clone(&e.listener)))
            .collect();

        let mut invoked = 0;
        for (active, listener) in snapshot {
            if active.load(Ordering::Acquire) {
                f(&listener);
                invoked += 1;
            }
        }
        invoked
    }
}

impl<T: ?Sized> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> std::fmt::Debug for Listeners<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    type Callback = dyn Fn(&str) + Send + Sync;

    #[test]
    fn test_listener_ids_unique() {
        assert_ne!(ListenerId::next(), ListenerId::next());
    }

    #[test]
    fn test_registration_order() {
        let registry: Listeners<Callback> = Listeners::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for n in 0..3 {
            let seen = Arc::clone(&seen);
            registry.add(Arc::new(move |msg: &str| seen.lock().push(format!("{n}:{msg}"))));
        }

        assert_eq!(registry.for_each(|l| l("hi")), 3);
        assert_eq!(*seen.lock(), vec!["0:hi", "1:hi", "2:hi"]);
    }

    #[test]
    fn test_remove() {
        let registry: Listeners<Callback> = Listeners::new();
        let id = registry.add(Arc::new(|_: &str| {}));
        assert!(registry.contains(id));
        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_removed_during_emission_is_skipped() {
        let registry: Arc<Listeners<Callback>> = Arc::new(Listeners::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let victim = Arc::new(Mutex::new(None::<ListenerId>));

        {
            let remover = Arc::clone(&registry);
            let victim = Arc::clone(&victim);
            registry.add(Arc::new(move |_: &str| {
                if let Some(id) = *victim.lock() {
                    remover.remove(id);
                }
            }));
        }
        {
            let calls = Arc::clone(&calls);
            let id = registry.add(Arc::new(move |_: &str| {
                calls.fetch_add(1, Ordering::SeqCst);
            }));
            *victim.lock() = Some(id);
        }

        assert_eq!(registry.for_each(|l| l("x")), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_add_during_emission_waits_for_next() {
        let registry: Arc<Listeners<Callback>> = Arc::new(Listeners::new());
        {
            let inner = Arc::clone(&registry);
            registry.add(Arc::new(move |_: &str| {
                inner.add(Arc::new(|_: &str| {}));
            }));
        }

        assert_eq!(registry.for_each(|l| l("x")), 1);
        assert_eq!(registry.len(), 2);
    }
}
