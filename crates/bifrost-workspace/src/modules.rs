// Redis-backed workspace module cache
//
// Worker executions import workspace modules served from this cache
// rather than the node's filesystem. The candidate index is loaded
// lazily and invalidated whenever a sync event touches the workspace, so
// the next execution sees fresh code without a worker restart.

use std::collections::HashSet;
use std::sync::Arc;

use bifrost_core::{Error, Result};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

const MODULE_INDEX_KEY: &str = "workspace:module_index";

fn module_key(path: &str) -> String {
    format!("workspace:module:{path}")
}

/// Cached module source plus its content hash
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedModule {
    pub source: String,
    pub hash: String,
}

/// A successful module resolution
#[derive(Debug, Clone)]
pub struct ModuleResolution {
    /// Workspace-relative path of the resolved file
    pub path: String,
    pub source: String,
    /// True when resolved through `__init__.py`
    pub is_package: bool,
}

/// Candidate workspace paths for a dotted module name, in probe order.
pub fn module_candidates(name: &str) -> [String; 2] {
    let base = name.replace('.', "/");
    [format!("{base}.py"), format!("{base}/__init__.py")]
}

#[derive(Clone)]
pub struct ModuleCacheStore {
    redis: ConnectionManager,
    index: Arc<RwLock<Option<HashSet<String>>>>,
}

impl ModuleCacheStore {
    pub fn new(redis: ConnectionManager) -> Self {
        Self {
            redis,
            index: Arc::new(RwLock::new(None)),
        }
    }

    /// Publish a module's source into the cache (called on file writes).
    pub async fn store_module(&self, path: &str, source: &str, hash: &str) -> Result<()> {
        let payload = serde_json::to_string(&CachedModule {
            source: source.to_string(),
            hash: hash.to_string(),
        })
        .map_err(|e| Error::validation(format!("unserializable module payload: {e}")))?;

        let mut conn = self.redis.clone();
        let _: () = conn
            .sadd(MODULE_INDEX_KEY, path)
            .await
            .map_err(|e| Error::transient(format!("module index add failed: {e}")))?;
        let _: () = conn
            .set(module_key(path), payload)
            .await
            .map_err(|e| Error::transient(format!("module store failed: {e}")))?;

        self.invalidate().await;
        Ok(())
    }

    pub async fn remove_module(&self, path: &str) -> Result<()> {
        let mut conn = self.redis.clone();
        let _: () = conn
            .srem(MODULE_INDEX_KEY, path)
            .await
            .map_err(|e| Error::transient(format!("module index remove failed: {e}")))?;
        let _: () = conn
            .del(module_key(path))
            .await
            .map_err(|e| Error::transient(format!("module delete failed: {e}")))?;

        self.invalidate().await;
        Ok(())
    }

    /// Drop the in-memory candidate index; the next resolve reloads it.
    pub async fn invalidate(&self) {
        *self.index.write().await = None;
    }

    async fn index(&self) -> Result<HashSet<String>> {
        if let Some(index) = self.index.read().await.as_ref() {
            return Ok(index.clone());
        }

        let mut conn = self.redis.clone();
        let members: Vec<String> = conn
            .smembers(MODULE_INDEX_KEY)
            .await
            .map_err(|e| Error::transient(format!("module index load failed: {e}")))?;
        let loaded: HashSet<String> = members.into_iter().collect();

        *self.index.write().await = Some(loaded.clone());
        Ok(loaded)
    }

    pub async fn get_module(&self, path: &str) -> Result<Option<CachedModule>> {
        let mut conn = self.redis.clone();
        let raw: Option<String> = conn
            .get(module_key(path))
            .await
            .map_err(|e| Error::transient(format!("module read failed: {e}")))?;

        Ok(raw.and_then(|r| serde_json::from_str(&r).ok()))
    }

    /// Resolve a dotted import name against the cache.
    ///
    /// The first candidate that is both in the index and retrievable
    /// wins. A candidate the index claims but the cache cannot produce
    /// resolves to nothing so the default finder gets its chance; a later
    /// reindex reconciles.
    pub async fn resolve(&self, name: &str) -> Result<Option<ModuleResolution>> {
        let index = self.index().await?;

        for (i, candidate) in module_candidates(name).into_iter().enumerate() {
            if !index.contains(&candidate) {
                continue;
            }
            match self.get_module(&candidate).await? {
                Some(module) => {
                    return Ok(Some(ModuleResolution {
                        path: candidate,
                        source: module.source,
                        is_package: i == 1,
                    }));
                }
                None => {
                    debug!(candidate, "module index claims path but cache is empty");
                }
            }
        }

        Ok(None)
    }

    /// Every module path currently claimed by the index.
    pub async fn list_paths(&self) -> Result<Vec<String>> {
        Ok(self.index().await?.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidates_follow_import_layout() {
        assert_eq!(
            module_candidates("shared.helpers"),
            ["shared/helpers.py".to_string(), "shared/helpers/__init__.py".to_string()]
        );
        assert_eq!(
            module_candidates("utils"),
            ["utils.py".to_string(), "utils/__init__.py".to_string()]
        );
    }
}
