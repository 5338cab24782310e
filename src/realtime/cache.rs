//! Time-bounded cache.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

struct Entry<V> {
    value: V,
    expires_at: Option<Instant>,
}

/// A string-keyed cache whose entries can carry a time-to-live.
///
/// Expiry is lazy: an entry past its deadline is evicted by the read that
/// finds it, not by a background task. Entries inserted without a TTL
/// never expire.
pub struct TtlCache<V> {
    entries: HashMap<String, Entry<V>>,
}

impl<V> TtlCache<V> {
    /// An empty cache.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Insert a value, replacing any previous entry and its deadline.
    pub fn insert(&mut self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries.insert(key.into(), Entry { value, expires_at });
    }

    /// Look up a live entry; an expired one is evicted and reported absent.
    pub fn get(&mut self, key: &str) -> Option<&V> {
        let expired = match self.entries.get(key) {
            Some(entry) => entry.expires_at.is_some_and(|at| at <= Instant::now()),
            None => return None,
        };
        if expired {
            self.entries.remove(key);
            return None;
        }
        self.entries.get(key).map(|entry| &entry.value)
    }

    /// Remove an entry, returning its value regardless of expiry.
    pub fn remove(&mut self, key: &str) -> Option<V> {
        self.entries.remove(key).map(|entry| entry.value)
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of entries not yet evicted, expired or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new()
    }
}
