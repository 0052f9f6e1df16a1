// Workspace cache: per-path {hash, is_deleted} in one Redis hash
//
// This is the loop-suppression state. It is written synchronously
// immediately BEFORE the underlying mutation (by the origin node and by
// every subscriber), so a watcher seeing the mutation afterwards can
// recognize it as already-known. Writes are fire-and-forget: a miss only
// costs a slower authoritative lookup.

use bifrost_contracts::CacheEntry;
use bifrost_core::Result;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::warn;

const CACHE_KEY: &str = "workspace:cache";

#[derive(Clone)]
pub struct WorkspaceCache {
    redis: ConnectionManager,
}

impl WorkspaceCache {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    /// Record a path's state. Failures are logged, never propagated.
    pub async fn set(&self, path: &str, entry: &CacheEntry) {
        let payload = match serde_json::to_string(entry) {
            Ok(p) => p,
            Err(e) => {
                warn!(path, error = %e, "failed to serialize cache entry");
                return;
            }
        };

        let mut conn = self.redis.clone();
        let result: redis::RedisResult<()> = conn.hset(CACHE_KEY, path, payload).await;
        if let Err(e) = result {
            warn!(path, error = %e, "workspace cache write failed");
        }
    }

    pub async fn get(&self, path: &str) -> Result<Option<CacheEntry>> {
        let mut conn = self.redis.clone();
        let raw: Option<String> = conn
            .hget(CACHE_KEY, path)
            .await
            .map_err(|e| bifrost_core::Error::transient(format!("cache read failed: {e}")))?;

        Ok(raw.and_then(|r| serde_json::from_str(&r).ok()))
    }

    /// Drop a path's entry entirely (used when pruning stale state).
    pub async fn remove(&self, path: &str) {
        let mut conn = self.redis.clone();
        let result: redis::RedisResult<()> = conn.hdel(CACHE_KEY, path).await;
        if let Err(e) = result {
            warn!(path, error = %e, "workspace cache delete failed");
        }
    }

    /// Full snapshot, used by reindex to prune entries without files.
    pub async fn snapshot(&self) -> Result<std::collections::HashMap<String, CacheEntry>> {
        let mut conn = self.redis.clone();
        let raw: std::collections::HashMap<String, String> = conn
            .hgetall(CACHE_KEY)
            .await
            .map_err(|e| bifrost_core::Error::transient(format!("cache scan failed: {e}")))?;

        Ok(raw
            .into_iter()
            .filter_map(|(path, entry)| {
                serde_json::from_str(&entry).ok().map(|e| (path, e))
            })
            .collect())
    }
}
