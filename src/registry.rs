//! # Listener Registry
//!
//! Ordered, identity-keyed registry used by the launcher for job listeners,
//! step listeners and step interceptors.
//!
//! Entries are compared by `Arc` identity, so registering the same instance
//! twice is a no-op while two equal-but-distinct instances are both kept.
//! Callers take a [`ListenerRegistry::snapshot`] before notifying, which keeps
//! the lock out of any `.await`.

use parking_lot::RwLock;
use std::sync::Arc;

pub struct ListenerRegistry<T: ?Sized> {
    entries: RwLock<Vec<Arc<T>>>,
}

impl<T: ?Sized> ListenerRegistry<T> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Append an entry. Returns `false` if this instance is already registered.
    pub fn register(&self, entry: Arc<T>) -> bool {
        let mut entries = self.entries.write();

        if entries.iter().any(|e| Arc::ptr_eq(e, &entry)) {
            false
        } else {
            entries.push(entry);
            true
        }
    }

    /// Returns `false` if this instance was not registered.
    pub fn unregister(&self, entry: &Arc<T>) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| !Arc::ptr_eq(e, entry));
        entries.len() != before
    }

    /// Entries in registration order.
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.entries.read().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl<T: ?Sized> Default for ListenerRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> std::fmt::Debug for ListenerRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Named: Send + Sync {
        fn name(&self) -> &str;
    }

    struct Entry(&'static str);

    impl Named for Entry {
        fn name(&self) -> &str {
            self.0
        }
    }

    #[test]
    fn test_registration_order_is_kept() {
        let registry: ListenerRegistry<dyn Named> = ListenerRegistry::new();
        assert!(registry.register(Arc::new(Entry("a"))));
        assert!(registry.register(Arc::new(Entry("b"))));
        assert!(registry.register(Arc::new(Entry("c"))));

        let names: Vec<_> = registry
            .snapshot()
            .iter()
            .map(|e| e.name().to_string())
            .collect();
        assert_eq!(names, ["a", "b", "c"]);
    }

    #[test]
    fn test_identity_deduplication() {
        let registry: ListenerRegistry<dyn Named> = ListenerRegistry::new();
        let entry: Arc<dyn Named> = Arc::new(Entry("a"));

        assert!(registry.register(entry.clone()));
        assert!(!registry.register(entry.clone()));
        assert!(registry.register(Arc::new(Entry("a"))));
        assert_eq!(registry.len(), 2);

        assert!(registry.unregister(&entry));
        assert!(!registry.unregister(&entry));
        assert_eq!(registry.len(), 1);
    }
}
