//! Redis-backed distributed cache.
//!
//! Honours the same [`Cache`] contract as the in-process variant. TTLs
//! are passed to the server; pattern deletion uses server-side `SCAN`.
//! Runtime failures are logged and reported as misses — the contract
//! forbids cache errors from reaching callers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::ports::{Cache, CacheStats};

use super::normalize_ttl;

/// Keys scanned per `SCAN` round during pattern deletion.
const SCAN_BATCH: usize = 200;

/// Distributed cache over a Redis server.
///
/// Hit/miss counters are tracked locally; `size` reflects the server's
/// `DBSIZE`. Eviction counting is the server's concern and reported as
/// zero here.
pub struct RedisCache {
    manager: ConnectionManager,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl std::fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCache")
            .field("manager", &"<redis::ConnectionManager>")
            .finish()
    }
}

impl RedisCache {
    /// Connects to the server and verifies it responds to `PING`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cache`] when the URL is malformed or the server
    /// is unreachable — the factory uses this to fall back to the
    /// in-process cache.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| Error::Cache(format!("invalid redis url: {e}")))?;
        let mut manager = ConnectionManager::new(client)
            .await
            .map_err(|e| Error::Cache(format!("redis connection failed: {e}")))?;
        let _: () = redis::cmd("PING")
            .query_async(&mut manager)
            .await
            .map_err(|e| Error::Cache(format!("redis ping failed: {e}")))?;
        Ok(Self {
            manager,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut conn = self.manager.clone();
        match conn.get::<_, Option<Vec<u8>>>(key).await {
            Ok(Some(value)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            Ok(None) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                debug!(key, error = %e, "redis get failed, treating as miss");
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) {
        let mut conn = self.manager.clone();
        let outcome = match normalize_ttl(ttl) {
            Some(ttl) => {
                conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
                    .await
            }
            None => conn.set::<_, _, ()>(key, value).await,
        };
        if let Err(e) = outcome {
            debug!(key, error = %e, "redis set failed, value not cached");
        }
    }

    async fn delete(&self, key: &str) -> bool {
        let mut conn = self.manager.clone();
        match conn.del::<_, u64>(key).await {
            Ok(removed) => removed > 0,
            Err(e) => {
                debug!(key, error = %e, "redis del failed");
                false
            }
        }
    }

    async fn delete_matching(&self, pattern: &str) -> u64 {
        let mut conn = self.manager.clone();
        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;

        loop {
            let scan: std::result::Result<(u64, Vec<String>), _> = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await;

            let (next, keys) = match scan {
                Ok(page) => page,
                Err(e) => {
                    warn!(pattern, error = %e, "redis scan failed mid-invalidation");
                    return removed;
                }
            };

            if !keys.is_empty() {
                match conn.del::<_, u64>(keys).await {
                    Ok(count) => removed += count,
                    Err(e) => debug!(pattern, error = %e, "redis del batch failed"),
                }
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        removed
    }

    async fn clear(&self) {
        let mut conn = self.manager.clone();
        let flushed: std::result::Result<(), _> =
            redis::cmd("FLUSHDB").query_async(&mut conn).await;
        if let Err(e) = flushed {
            warn!(error = %e, "redis flushdb failed");
        }
    }

    async fn stats(&self) -> CacheStats {
        let mut conn = self.manager.clone();
        let size: u64 = redis::cmd("DBSIZE")
            .query_async(&mut conn)
            .await
            .unwrap_or(0);
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size,
            evictions: 0,
        }
    }
}
