//! Bounded, TTL-evicting caches for perception results and LLM
//! decisions, keyed the way the worker loop needs them: perception by
//! `(url, screenshot hash)`, decisions by a hash of the prompt inputs.
//!
//! Any mutating browser action invalidates the perception cache's
//! entries for the current URL (§5 cache coherence).

use std::collections::HashMap;
use std::time::{Duration, Instant};

struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

/// A generic bounded LRU cache with per-entry TTL eviction.
pub struct TtlLruCache<K, V> {
    entries: HashMap<K, Entry<V>>,
    order: Vec<K>,
    max_entries: usize,
    ttl: Duration,
}

impl<K, V> TtlLruCache<K, V>
where
    K: std::hash::Hash + Eq + Clone,
    V: Clone,
{
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            order: Vec::new(),
            max_entries: max_entries.max(1),
            ttl,
        }
    }

    pub fn get(&mut self, key: &K) -> Option<V> {
        let expired = self
            .entries
            .get(key)
            .map(|e| e.inserted_at.elapsed() > self.ttl)
            .unwrap_or(false);
        if expired {
            self.remove(key);
            return None;
        }
        if let Some(entry) = self.entries.get(key) {
            let value = entry.value.clone();
            self.touch(key);
            Some(value)
        } else {
            None
        }
    }

    pub fn put(&mut self, key: K, value: V) {
        if !self.entries.contains_key(&key) {
            if self.order.len() >= self.max_entries {
                self.evict_oldest();
            }
            self.order.push(key.clone());
        } else {
            self.touch(&key);
        }
        self.entries.insert(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn remove(&mut self, key: &K) {
        self.entries.remove(key);
        self.order.retain(|k| k != key);
    }

    /// Removes every entry whose key matches `predicate`, used to drop
    /// all perception-cache entries scoped to a URL after a mutating
    /// action.
    pub fn invalidate_matching(&mut self, mut predicate: impl FnMut(&K) -> bool) {
        let to_remove: Vec<K> = self
            .entries
            .keys()
            .filter(|k| predicate(k))
            .cloned()
            .collect();
        for key in to_remove {
            self.remove(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn touch(&mut self, key: &K) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            let k = self.order.remove(pos);
            self.order.push(k);
        }
    }

    fn evict_oldest(&mut self) {
        if !self.order.is_empty() {
            let oldest = self.order.remove(0);
            self.entries.remove(&oldest);
        }
    }
}

/// Key for the perception cache: a screenshot is only reusable for the
/// same URL and the same content hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PerceptionCacheKey {
    pub url: String,
    pub screenshot_hash: crate::interfaces::ScreenshotHash,
}

pub type PerceptionCache = TtlLruCache<PerceptionCacheKey, Vec<crate::interfaces::Element>>;

/// Invalidates every perception-cache entry scoped to `url` — the
/// minimum required by §5 after any mutating action.
pub fn invalidate_url(cache: &mut PerceptionCache, url: &str) {
    cache.invalidate_matching(|k| k.url == url);
}

/// Key for the decision/verification LLM cache: a hash of the prompt
/// inputs, so identical states don't re-invoke the LLM.
pub type DecisionCacheKey = u64;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::ScreenshotHash;

    #[test]
    fn put_and_get_round_trip() {
        let mut cache: TtlLruCache<String, i32> = TtlLruCache::new(8, Duration::from_secs(60));
        cache.put("a".into(), 1);
        assert_eq!(cache.get(&"a".to_string()), Some(1));
    }

    #[test]
    fn entries_expire_after_ttl() {
        let mut cache: TtlLruCache<String, i32> = TtlLruCache::new(8, Duration::from_millis(1));
        cache.put("a".into(), 1);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get(&"a".to_string()), None);
    }

    #[test]
    fn evicts_oldest_when_over_capacity() {
        let mut cache: TtlLruCache<String, i32> = TtlLruCache::new(2, Duration::from_secs(60));
        cache.put("a".into(), 1);
        cache.put("b".into(), 2);
        cache.put("c".into(), 3);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"a".to_string()), None);
        assert_eq!(cache.get(&"b".to_string()), Some(2));
    }

    #[test]
    fn invalidate_url_clears_only_matching_entries() {
        let mut cache: PerceptionCache = TtlLruCache::new(8, Duration::from_secs(60));
        cache.put(
            PerceptionCacheKey {
                url: "https://a".into(),
                screenshot_hash: ScreenshotHash(1),
            },
            vec![],
        );
        cache.put(
            PerceptionCacheKey {
                url: "https://b".into(),
                screenshot_hash: ScreenshotHash(2),
            },
            vec![],
        );
        invalidate_url(&mut cache, "https://a");
        assert_eq!(cache.len(), 1);
    }
}
