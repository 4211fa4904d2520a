// Path: crates/cache/src/read_cache.rs
//! A bounded read-through cache with per-entry time-to-live.

use lru::LruCache;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

pub(crate) struct ReadCache<K: Hash + Eq, V> {
    entries: LruCache<K, (V, Instant)>,
    ttl: Duration,
}

impl<K: Hash + Eq, V: Clone> ReadCache<K, V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            ttl,
        }
    }

    pub fn get(&mut self, key: &K) -> Option<V> {
        let fresh = match self.entries.get(key) {
            Some((_, inserted)) => inserted.elapsed() < self.ttl,
            None => return None,
        };
        if !fresh {
            self.entries.pop(key);
            return None;
        }
        self.entries.get(key).map(|(v, _)| v.clone())
    }

    pub fn put(&mut self, key: K, value: V) {
        self.entries.put(key, (value, Instant::now()));
    }

    pub fn evict(&mut self, key: &K) {
        self.entries.pop(key);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_expire_and_evict() {
        let mut c = ReadCache::new(2, Duration::from_secs(60));
        c.put("a", 1);
        c.put("b", 2);
        c.put("c", 3);
        assert_eq!(c.get(&"a"), None);
        assert_eq!(c.get(&"c"), Some(3));
        c.evict(&"c");
        assert_eq!(c.get(&"c"), None);

        let mut stale = ReadCache::new(2, Duration::ZERO);
        stale.put("a", 1);
        assert_eq!(stale.get(&"a"), None);
    }
}
