//! In-process LRU cache with per-entry TTL.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::warn;

use crate::ports::{Cache, CacheStats};

use super::{glob_to_regex, normalize_ttl};

#[derive(Debug)]
struct Entry {
    value: Vec<u8>,
    /// Monotonic expiry instant; `None` never expires.
    expires_at: Option<Instant>,
    /// Logical access tick for LRU ordering.
    last_access: u64,
}

#[derive(Debug, Default)]
struct Inner {
    map: HashMap<String, Entry>,
    tick: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl Inner {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Evicts least-recently-used entries until the map fits `max_size`.
    fn enforce_capacity(&mut self, max_size: usize) {
        while self.map.len() > max_size {
            let Some(victim) = self
                .map
                .iter()
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(key, _)| key.clone())
            else {
                break;
            };
            self.map.remove(&victim);
            self.evictions += 1;
        }
    }
}

/// Bounded in-process cache: LRU eviction on insert, per-entry TTL on a
/// monotonic clock, exact hit/miss/eviction counters.
///
/// All operations are serializable with respect to each other — a
/// single mutex guards the whole structure, and critical sections never
/// await.
#[derive(Debug)]
pub struct MemoryCache {
    inner: Mutex<Inner>,
    max_size: usize,
}

impl MemoryCache {
    /// Creates a cache bounded to `max_size` entries.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_size: max_size.max(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned mutex means a panic mid-operation; the cache is
        // advisory, so continuing with whatever state remains is safe.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut inner = self.lock();
        let now = Instant::now();
        let tick = inner.next_tick();

        let expired = matches!(
            inner.map.get(key),
            Some(entry) if entry.expires_at.is_some_and(|at| at <= now)
        );
        if expired {
            // Drop the expired entry so size reflects live entries.
            inner.map.remove(key);
        }

        let value = inner.map.get_mut(key).map(|entry| {
            entry.last_access = tick;
            entry.value.clone()
        });
        match value {
            Some(v) => {
                inner.hits += 1;
                Some(v)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) {
        let mut inner = self.lock();
        let tick = inner.next_tick();
        let expires_at = normalize_ttl(ttl).map(|t| Instant::now() + t);
        inner.map.insert(
            key.to_string(),
            Entry {
                value,
                expires_at,
                last_access: tick,
            },
        );
        inner.enforce_capacity(self.max_size);
    }

    async fn delete(&self, key: &str) -> bool {
        self.lock().map.remove(key).is_some()
    }

    async fn delete_matching(&self, pattern: &str) -> u64 {
        let Ok(re) = glob_to_regex(pattern) else {
            warn!(pattern, "invalid cache invalidation pattern ignored");
            return 0;
        };
        let mut inner = self.lock();
        let victims: Vec<String> = inner
            .map
            .keys()
            .filter(|k| re.is_match(k))
            .cloned()
            .collect();
        for key in &victims {
            inner.map.remove(key);
        }
        victims.len() as u64
    }

    async fn clear(&self) {
        self.lock().map.clear();
    }

    async fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            size: inner.map.len() as u64,
            evictions: inner.evictions,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_round_trip() {
        let cache = MemoryCache::new(10);
        cache.set("a", b"value".to_vec(), None).await;
        assert_eq!(cache.get("a").await.as_deref(), Some(b"value".as_ref()));
    }

    #[tokio::test]
    async fn test_miss_and_hit_counters() {
        let cache = MemoryCache::new(10);
        assert!(cache.get("missing").await.is_none());
        cache.set("a", b"1".to_vec(), None).await;
        cache.get("a").await;
        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let cache = MemoryCache::new(10);
        cache
            .set("short", b"x".to_vec(), Some(Duration::from_millis(10)))
            .await;
        assert!(cache.get("short").await.is_some());
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(cache.get("short").await.is_none());
        // Expired entry was removed, not merely hidden.
        assert_eq!(cache.stats().await.size, 0);
    }

    #[tokio::test]
    async fn test_zero_ttl_never_expires() {
        let cache = MemoryCache::new(10);
        cache.set("k", b"x".to_vec(), Some(Duration::ZERO)).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(cache.get("k").await.is_some());
    }

    #[tokio::test]
    async fn test_lru_eviction_order() {
        let cache = MemoryCache::new(2);
        cache.set("a", b"1".to_vec(), None).await;
        cache.set("b", b"2".to_vec(), None).await;
        // Touch "a" so "b" becomes the LRU victim.
        cache.get("a").await;
        cache.set("c", b"3".to_vec(), None).await;

        assert!(cache.get("a").await.is_some());
        assert!(cache.get("b").await.is_none());
        assert!(cache.get("c").await.is_some());
        assert_eq!(cache.stats().await.evictions, 1);
    }

    #[tokio::test]
    async fn test_pattern_delete() {
        let cache = MemoryCache::new(10);
        cache.set("search:v1:aa", b"1".to_vec(), None).await;
        cache.set("search:v1:bb", b"2".to_vec(), None).await;
        cache.set("emb:v1:cc", b"3".to_vec(), None).await;

        let removed = cache.delete_matching("search:*").await;
        assert_eq!(removed, 2);
        assert!(cache.get("search:v1:aa").await.is_none());
        assert!(cache.get("emb:v1:cc").await.is_some());
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let cache = MemoryCache::new(10);
        cache.set("a", b"1".to_vec(), None).await;
        assert!(cache.delete("a").await);
        assert!(!cache.delete("a").await);

        cache.set("b", b"2".to_vec(), None).await;
        cache.clear().await;
        assert_eq!(cache.stats().await.size, 0);
    }

    #[tokio::test]
    async fn test_overwrite_is_last_writer_wins() {
        let cache = MemoryCache::new(10);
        cache.set("k", b"old".to_vec(), None).await;
        cache.set("k", b"new".to_vec(), None).await;
        assert_eq!(cache.get("k").await.as_deref(), Some(b"new".as_ref()));
        assert_eq!(cache.stats().await.size, 1);
    }
}
