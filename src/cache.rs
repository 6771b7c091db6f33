use std::collections::HashMap;
use std::hash::Hash;

pub const DEFAULT_TTL_MILLIS: i64 = 600_000;
pub const DEFAULT_MAX_ENTRIES: usize = 100;

#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// `None` caches a backing-store miss: "looked up, found nothing" is a
    /// valid answer and suppresses re-queries until the entry expires.
    pub value: Option<V>,
    pub timestamp_millis: i64,
}

impl<V> CacheEntry<V> {
    pub fn is_valid(&self, now_millis: i64, ttl_millis: i64) -> bool {
        now_millis - self.timestamp_millis < ttl_millis
    }
}

/// Process-local memoization map with TTL expiry and a most-recently-written
/// size cap. One instance per entity type; a restart clears it, the database
/// stays the store of record.
#[derive(Debug)]
pub struct EvictionCache<K, V> {
    ttl_millis: i64,
    max_entries: usize,
    entries: HashMap<K, CacheEntry<V>>,
}

impl<K, V> EvictionCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl_millis: i64, max_entries: usize) -> Self {
        Self {
            ttl_millis: ttl_millis.max(0),
            max_entries: max_entries.max(1),
            entries: HashMap::new(),
        }
    }

    /// Outer `None` is a miss (absent or expired); `Some(None)` is a cached
    /// backing-store miss.
    pub fn get(&self, key: &K, now_millis: i64) -> Option<Option<V>> {
        let entry = self.entries.get(key)?;
        if !entry.is_valid(now_millis, self.ttl_millis) {
            return None;
        }
        Some(entry.value.clone())
    }

    pub fn set(&mut self, key: K, value: Option<V>, now_millis: i64) {
        self.entries.insert(
            key,
            CacheEntry {
                value,
                timestamp_millis: now_millis,
            },
        );
        if self.entries.len() > self.max_entries {
            self.cleanup(now_millis);
        }
    }

    pub fn remove(&mut self, key: &K) {
        self.entries.remove(key);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop expired entries; if the survivors still exceed the cap, keep only
    /// the most-recently-written `max_entries` of them.
    pub fn cleanup(&mut self, now_millis: i64) {
        if self.entries.is_empty() {
            return;
        }
        let ttl = self.ttl_millis;
        self.entries
            .retain(|_, entry| entry.is_valid(now_millis, ttl));
        if self.entries.len() <= self.max_entries {
            return;
        }
        let mut stamped: Vec<(i64, K)> = self
            .entries
            .iter()
            .map(|(k, entry)| (entry.timestamp_millis, k.clone()))
            .collect();
        stamped.sort_by(|a, b| b.0.cmp(&a.0));
        stamped.truncate(self.max_entries);
        let keep: std::collections::HashSet<K> =
            stamped.into_iter().map(|(_, k)| k).collect();
        self.entries.retain(|k, _| keep.contains(k));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_valid_strictly_inside_ttl() {
        let entry = CacheEntry {
            value: Some(1),
            timestamp_millis: 0,
        };
        assert!(entry.is_valid(599_999, 600_000));
        assert!(!entry.is_valid(600_000, 600_000));
        assert!(!entry.is_valid(600_001, 600_000));
    }

    #[test]
    fn get_misses_after_expiry() {
        let mut cache: EvictionCache<String, i64> = EvictionCache::new(600_000, 100);
        cache.set("a".to_string(), Some(7), 0);
        assert_eq!(cache.get(&"a".to_string(), 599_999), Some(Some(7)));
        assert_eq!(cache.get(&"a".to_string(), 600_001), None);
    }

    #[test]
    fn negative_result_is_a_hit() {
        let mut cache: EvictionCache<String, i64> = EvictionCache::new(600_000, 100);
        cache.set("missing".to_string(), None, 0);
        // A cached "found nothing" must be distinguishable from a miss.
        assert_eq!(cache.get(&"missing".to_string(), 1), Some(None));
        assert_eq!(cache.get(&"never-set".to_string(), 1), None);
    }

    #[test]
    fn size_cap_keeps_most_recently_written() {
        let mut cache: EvictionCache<i64, i64> = EvictionCache::new(600_000, 100);
        for i in 0..101 {
            cache.set(i, Some(i), i);
        }
        assert_eq!(cache.len(), 100);
        assert_eq!(cache.get(&0, 101), None);
        for i in 1..101 {
            assert_eq!(cache.get(&i, 101), Some(Some(i)));
        }
    }

    #[test]
    fn cleanup_drops_expired_before_applying_cap() {
        let mut cache: EvictionCache<i64, i64> = EvictionCache::new(100, 100);
        for i in 0..50 {
            cache.set(i, Some(i), 0);
        }
        for i in 50..60 {
            cache.set(i, Some(i), 1_000);
        }
        cache.cleanup(1_050);
        assert_eq!(cache.len(), 10);
        assert_eq!(cache.get(&55, 1_050), Some(Some(55)));
        assert_eq!(cache.get(&10, 1_050), None);
    }

    #[test]
    fn remove_and_clear() {
        let mut cache: EvictionCache<String, i64> = EvictionCache::new(600_000, 100);
        cache.set("a".to_string(), Some(1), 0);
        cache.set("b".to_string(), Some(2), 0);
        cache.remove(&"a".to_string());
        assert_eq!(cache.get(&"a".to_string(), 1), None);
        cache.clear();
        assert!(cache.is_empty());
    }
}
