//! Concurrency-safe, id-indexed store shared between tasks.
//!
//! Every operation takes the single lock of the instance. Iteration works on a
//! snapshot copied under the lock, so visitors run unlocked and may call back
//! into the same registry.

use parking_lot::Mutex;
use std::collections::HashMap;

/// Id-indexed collection with auto-incrementing ids starting at 1.
pub struct Registry<T> {
    inner: Mutex<Inner<T>>,
}

struct Inner<T> {
    objects: HashMap<u64, T>,
    next_id: u64,
}

impl<T: Clone> Registry<T> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                objects: HashMap::with_capacity(capacity),
                next_id: 1,
            }),
        }
    }

    /// Add a value under the next unused id and return that id.
    pub fn add(&self, value: T) -> u64 {
        let mut inner = self.inner.lock();
        while inner.objects.contains_key(&inner.next_id) {
            inner.next_id += 1;
        }
        let id = inner.next_id;
        inner.next_id += 1;
        inner.objects.insert(id, value);
        id
    }

    /// Store a value under a caller-chosen id, replacing any previous entry.
    ///
    /// The auto counter moves past `id`, so later `add` calls never hand it out.
    pub fn insert(&self, id: u64, value: T) -> u64 {
        let mut inner = self.inner.lock();
        inner.objects.insert(id, value);
        if id >= inner.next_id {
            inner.next_id = id + 1;
        }
        id
    }

    /// Remove an entry. Absent ids are a no-op returning `None`.
    pub fn remove(&self, id: u64) -> Option<T> {
        self.inner.lock().objects.remove(&id)
    }

    /// Remove an entry only if `predicate` holds for it, checked under the
    /// same lock so no other writer can slip in between.
    pub fn remove_if(&self, id: u64, predicate: impl FnOnce(&T) -> bool) -> Option<T> {
        let mut inner = self.inner.lock();
        if inner.objects.get(&id).is_some_and(predicate) {
            return inner.objects.remove(&id);
        }
        None
    }

    /// Mutate an entry in place under the lock. `None` if `id` is absent.
    pub fn update<R>(&self, id: u64, mutate: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.inner.lock().objects.get_mut(&id).map(mutate)
    }

    pub fn get(&self, id: u64) -> Option<T> {
        self.inner.lock().objects.get(&id).cloned()
    }

    /// Copy of all entries taken under the lock.
    pub fn snapshot(&self) -> Vec<(u64, T)> {
        let inner = self.inner.lock();
        inner
            .objects
            .iter()
            .map(|(id, value)| (*id, value.clone()))
            .collect()
    }

    /// Visit every entry of a snapshot. The lock is released before the
    /// first visit, so entries may be stale but are never half-written.
    pub fn for_each(&self, mut visitor: impl FnMut(u64, &T)) {
        for (id, value) in self.snapshot() {
            visitor(id, &value);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}
