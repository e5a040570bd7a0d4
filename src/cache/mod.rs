//! Pluggable cache layer.
//!
//! Two concrete adapters implement [`Cache`](crate::ports::Cache): an
//! in-process LRU ([`MemoryCache`]) and a Redis-backed distributed
//! variant ([`RedisCache`]). The cache is advisory — a miss must always
//! be handleable by recomputation — so backend failures are logged and
//! reported as misses, never as errors.
//!
//! # Key composition
//!
//! Keys are structured strings `<namespace>:<version>:<hash>` where the
//! hash is a truncated SHA-256 over a canonical serialization of the
//! logical input. Namespaces: `emb`, `search`, `rag`.

pub mod memory;
pub mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::config::{CacheBackend, CacheConfig};
use crate::ports::{Cache, CacheStats};

pub use memory::MemoryCache;
pub use redis::RedisCache;

/// Embedding cache namespace.
pub const NS_EMBEDDING: &str = "emb";
/// Search result cache namespace.
pub const NS_SEARCH: &str = "search";
/// RAG answer cache namespace.
pub const NS_RAG: &str = "rag";

/// Key schema version, bumped when a cached value's shape changes.
const KEY_VERSION: &str = "v1";

/// Separator between hashed parts; prevents `["ab","c"]` and
/// `["a","bc"]` from colliding.
const PART_SEPARATOR: u8 = 0x1f;

/// Composes a cache key from a namespace and the logical input parts.
#[must_use]
pub fn cache_key(namespace: &str, parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([PART_SEPARATOR]);
    }
    let digest = hasher.finalize();
    // 16 bytes of digest is plenty for key uniqueness.
    let mut hash = String::with_capacity(32);
    for byte in &digest[..16] {
        hash.push_str(&format!("{byte:02x}"));
    }
    format!("{namespace}:{KEY_VERSION}:{hash}")
}

/// Glob pattern matching every key in a namespace.
#[must_use]
pub fn namespace_pattern(namespace: &str) -> String {
    format!("{namespace}:*")
}

/// Normalizes a TTL: zero means "no expiry" per the configuration
/// contract, which adapters encode as `None`.
#[must_use]
pub fn normalize_ttl(ttl: Option<Duration>) -> Option<Duration> {
    ttl.filter(|t| !t.is_zero())
}

/// Translates a glob pattern (`*` wildcard only) into an anchored regex.
pub(crate) fn glob_to_regex(pattern: &str) -> Result<regex::Regex, regex::Error> {
    let mut expr = String::with_capacity(pattern.len() + 4);
    expr.push('^');
    for ch in pattern.chars() {
        if ch == '*' {
            expr.push_str(".*");
        } else {
            expr.push_str(&regex::escape(&ch.to_string()));
        }
    }
    expr.push('$');
    regex::Regex::new(&expr)
}

/// Cache that stores nothing; used when caching is disabled.
#[derive(Debug, Default)]
pub struct NoopCache;

#[async_trait]
impl Cache for NoopCache {
    async fn get(&self, _key: &str) -> Option<Vec<u8>> {
        None
    }

    async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Option<Duration>) {}

    async fn delete(&self, _key: &str) -> bool {
        false
    }

    async fn delete_matching(&self, _pattern: &str) -> u64 {
        0
    }

    async fn clear(&self) {}

    async fn stats(&self) -> CacheStats {
        CacheStats::default()
    }
}

/// Builds the configured cache backend.
///
/// When the distributed backend cannot be reached at initialization the
/// factory falls back to the in-process variant with a warning; runtime
/// failures of a connected distributed backend are then handled inside
/// the adapter as misses.
pub async fn create_cache(config: &CacheConfig) -> Arc<dyn Cache> {
    if !config.enabled {
        return Arc::new(NoopCache);
    }
    match config.backend {
        CacheBackend::Memory => Arc::new(MemoryCache::new(config.max_size)),
        CacheBackend::Distributed => {
            let url = config.url.as_deref().unwrap_or_default();
            match RedisCache::connect(url).await {
                Ok(cache) => Arc::new(cache),
                Err(e) => {
                    warn!(
                        error = %e,
                        "distributed cache unreachable at startup, falling back to in-process LRU"
                    );
                    Arc::new(MemoryCache::new(config.max_size))
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_key_shape() {
        let key = cache_key(NS_SEARCH, &["query", "5"]);
        let parts: Vec<&str> = key.split(':').collect();
        assert_eq!(parts[0], "search");
        assert_eq!(parts[1], "v1");
        assert_eq!(parts[2].len(), 32);
    }

    #[test]
    fn test_key_is_stable() {
        assert_eq!(
            cache_key(NS_EMBEDDING, &["hello", "model-a"]),
            cache_key(NS_EMBEDDING, &["hello", "model-a"])
        );
    }

    #[test]
    fn test_key_differs_on_parts_and_namespace() {
        assert_ne!(
            cache_key(NS_EMBEDDING, &["hello"]),
            cache_key(NS_EMBEDDING, &["world"])
        );
        assert_ne!(
            cache_key(NS_EMBEDDING, &["hello"]),
            cache_key(NS_SEARCH, &["hello"])
        );
    }

    #[test]
    fn test_part_boundaries_do_not_collide() {
        assert_ne!(
            cache_key(NS_SEARCH, &["ab", "c"]),
            cache_key(NS_SEARCH, &["a", "bc"])
        );
    }

    #[test]
    fn test_glob_translation() {
        let re = glob_to_regex("search:*").unwrap();
        assert!(re.is_match("search:v1:abc"));
        assert!(!re.is_match("emb:v1:abc"));

        let re = glob_to_regex("emb:v1:ff").unwrap();
        assert!(re.is_match("emb:v1:ff"));
        assert!(!re.is_match("emb:v1:ffx"));
    }

    #[test]
    fn test_zero_ttl_means_no_expiry() {
        assert_eq!(normalize_ttl(Some(Duration::ZERO)), None);
        assert_eq!(
            normalize_ttl(Some(Duration::from_secs(1))),
            Some(Duration::from_secs(1))
        );
        assert_eq!(normalize_ttl(None), None);
    }

    #[tokio::test]
    async fn test_noop_cache_behaviour() {
        let cache = NoopCache;
        cache.set("k", b"v".to_vec(), None).await;
        assert!(cache.get("k").await.is_none());
        assert!(!cache.delete("k").await);
        assert_eq!(cache.delete_matching("*").await, 0);
        assert_eq!(cache.stats().await, CacheStats::default());
    }
}
