// Injected key-value caches.
//
// The composer holds two: the idempotency cache (request key to finished
// response) and the match cache (chart pair to blended compatibility
// payload). Both sit behind `ComposeCache` so tests get isolated instances
// and a deployment can swap in a shared store. Entries are replaced whole,
// never mutated in place.

use std::collections::HashMap;
use std::sync::RwLock;

pub trait ComposeCache<V: Clone>: Send + Sync {
    fn get(&self, key: &str) -> Option<V>;
    fn set(&self, key: String, value: V);
    /// Remove `key`. Returns whether an entry was present.
    fn invalidate(&self, key: &str) -> bool;
}

/// Process-local cache.
pub struct InMemoryCache<V> {
    entries: RwLock<HashMap<String, V>>,
}

impl<V> InMemoryCache<V> {
    pub fn new() -> Self {
        InMemoryCache {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map_or(0, |e| e.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V> Default for InMemoryCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone + Send + Sync> ComposeCache<V> for InMemoryCache<V> {
    fn get(&self, key: &str) -> Option<V> {
        // A poisoned lock still holds whole entries; keep serving them.
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(key).cloned()
    }

    fn set(&self, key: String, value: V) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(key, value);
    }

    fn invalidate(&self, key: &str) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(key).is_some()
    }
}
