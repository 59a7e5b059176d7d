//! Tag-indexed TTL cache for query results.
//!
//! Keys and tags are opaque strings; by convention callers build keys as
//! `table:operation:param-hash` and tag entries with the entity types they
//! contain, then invalidate those tags after mutations
//! (write-through-invalidate; the cache does no dependency tracking).
//!
//! Expiry is lazy: an expired entry is dropped when a read observes it.
//! There is no background sweeper.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use wellspring_core::clock::{system_clock, Clock};

struct CacheEntry<V> {
    value: V,
    tags: Vec<String>,
    expires_at: Instant,
}

#[derive(Default)]
struct CacheState<V> {
    entries: HashMap<String, CacheEntry<V>>,
    tag_index: HashMap<String, HashSet<String>>,
}

impl<V> CacheState<V> {
    /// Remove one entry and scrub it from the tag index.
    fn remove_entry(&mut self, key: &str) -> bool {
        let Some(entry) = self.entries.remove(key) else {
            return false;
        };
        for tag in &entry.tags {
            if let Some(keys) = self.tag_index.get_mut(tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.tag_index.remove(tag);
                }
            }
        }
        true
    }
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    /// Entries currently stored (expired entries are dropped lazily)
    pub entries: usize,
    /// Distinct tags currently indexed
    pub tags: usize,
}

/// Tag-indexed, TTL-based cache of query results.
///
/// Value and tags for a key are replaced under a single lock acquisition,
/// so no reader observes a half-updated entry.
pub struct QueryCache<V> {
    state: RwLock<CacheState<V>>,
    default_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<V: Clone> QueryCache<V> {
    /// Create a cache with the given default TTL.
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            state: RwLock::new(CacheState {
                entries: HashMap::new(),
                tag_index: HashMap::new(),
            }),
            default_ttl,
            clock: system_clock(),
        }
    }

    /// Inject a clock (tests use a manual one).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Return the value for `key` unless it is absent or past its TTL.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        let mut state = self.state.write();

        if let Some(entry) = state.entries.get(key) {
            if now < entry.expires_at {
                return Some(entry.value.clone());
            }
            trace!(key, "dropping expired cache entry");
            state.remove_entry(key);
        }
        None
    }

    /// Insert or replace the entry for `key`.
    ///
    /// Passing `None` for `ttl` uses the cache-wide default. An existing
    /// entry's value and tags are replaced together.
    pub fn insert(&self, key: impl Into<String>, value: V, tags: &[&str], ttl: Option<Duration>) {
        let key = key.into();
        let now = self.clock.now();
        let ttl = ttl.unwrap_or(self.default_ttl);
        let mut state = self.state.write();

        state.remove_entry(&key);
        for tag in tags {
            state
                .tag_index
                .entry((*tag).to_string())
                .or_default()
                .insert(key.clone());
        }
        state.entries.insert(
            key,
            CacheEntry {
                value,
                tags: tags.iter().map(|tag| (*tag).to_string()).collect(),
                expires_at: now + ttl,
            },
        );
    }

    /// Remove every entry whose tag set intersects `tags`.
    ///
    /// Returns how many entries were removed. Callers invoke this after a
    /// mutation completes against the backing store.
    pub fn invalidate_tags(&self, tags: &[&str]) -> usize {
        let mut state = self.state.write();
        let keys: HashSet<String> = tags
            .iter()
            .filter_map(|tag| state.tag_index.get(*tag))
            .flatten()
            .cloned()
            .collect();

        let mut removed = 0;
        for key in &keys {
            if state.remove_entry(key) {
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(?tags, removed, "invalidated cache entries by tag");
        }
        removed
    }

    /// Remove one entry by exact key.
    pub fn remove(&self, key: &str) -> bool {
        self.state.write().remove_entry(key)
    }

    /// Remove everything.
    pub fn clear(&self) {
        let mut state = self.state.write();
        state.entries.clear();
        state.tag_index.clear();
    }

    /// Number of entries currently stored.
    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.state.read().entries.is_empty()
    }

    /// Point-in-time counters.
    pub fn stats(&self) -> CacheStats {
        let state = self.state.read();
        CacheStats {
            entries: state.entries.len(),
            tags: state.tag_index.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wellspring_testkit::ManualClock;

    fn cache_with_clock() -> (QueryCache<i64>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let cache = QueryCache::new(Duration::from_secs(60)).with_clock(clock.clone());
        (cache, clock)
    }

    #[test]
    fn values_expire_at_their_ttl() {
        let (cache, clock) = cache_with_clock();
        cache.insert("activities:list:abc", 1, &["activities"], Some(Duration::from_millis(100)));

        assert_eq!(cache.get("activities:list:abc"), Some(1));

        clock.advance(Duration::from_millis(150));
        assert_eq!(cache.get("activities:list:abc"), None);
        // The expired entry was dropped, not just hidden.
        assert!(cache.is_empty());
    }

    #[test]
    fn tag_invalidation_removes_exactly_the_intersecting_entries() {
        let (cache, _clock) = cache_with_clock();
        cache.insert("a", 1, &["activities"], None);
        cache.insert("b", 2, &["activities", "goals"], None);
        cache.insert("c", 3, &["profile"], None);

        let removed = cache.invalidate_tags(&["activities"]);

        assert_eq!(removed, 2);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("c"), Some(3));
    }

    #[test]
    fn insert_replaces_value_and_tags_together() {
        let (cache, _clock) = cache_with_clock();
        cache.insert("k", 1, &["old"], None);
        cache.insert("k", 2, &["new"], None);

        // The old tag no longer reaches the entry.
        assert_eq!(cache.invalidate_tags(&["old"]), 0);
        assert_eq!(cache.get("k"), Some(2));

        assert_eq!(cache.invalidate_tags(&["new"]), 1);
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn remove_and_clear_scrub_the_tag_index() {
        let (cache, _clock) = cache_with_clock();
        cache.insert("a", 1, &["t"], None);
        cache.insert("b", 2, &["t"], None);

        assert!(cache.remove("a"));
        assert!(!cache.remove("a"));
        assert_eq!(cache.stats().tags, 1);

        cache.clear();
        let stats = cache.stats();
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.tags, 0);
    }

    #[test]
    fn default_ttl_applies_when_no_ttl_is_given() {
        let clock = Arc::new(ManualClock::new());
        let cache = QueryCache::new(Duration::from_millis(50)).with_clock(clock.clone());
        cache.insert("k", 1, &[], None);

        clock.advance(Duration::from_millis(30));
        assert_eq!(cache.get("k"), Some(1));

        clock.advance(Duration::from_millis(30));
        assert_eq!(cache.get("k"), None);
    }
}
