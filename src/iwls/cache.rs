/// TTL-expiring in-memory cache.
///
/// Backs the 20-minute metadata caches of the API client and the
/// 24-hour tidal-flag cache of the stations handler. One mutex guards
/// the map; entries past their deadline read as misses and are replaced
/// on the next insert.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub struct TtlCache<K, V> {
    entries: Mutex<HashMap<K, (Instant, V)>>,
    ttl: Duration,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        TtlCache {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let entries = self.entries.lock().expect("cache lock");
        entries.get(key).and_then(|(inserted, value)| {
            (inserted.elapsed() < self.ttl).then(|| value.clone())
        })
    }

    pub fn insert(&self, key: K, value: V) {
        let mut entries = self.entries.lock().expect("cache lock");
        entries.insert(key, (Instant::now(), value));
    }

    /// Computes and caches the value on a miss. The supplier runs outside
    /// the lock so slow fetches do not serialize unrelated keys.
    pub fn get_or_insert_with(&self, key: K, supplier: impl FnOnce() -> V) -> V {
        if let Some(value) = self.get(&key) {
            return value;
        }
        let value = supplier();
        self.insert(key, value.clone());
        value
    }

    pub fn clear(&self) {
        self.entries.lock().expect("cache lock").clear();
    }
}
