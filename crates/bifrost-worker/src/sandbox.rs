// Per-execution sandbox
//
// Materializes the workspace module tree from the Redis module cache
// into a fresh directory before every run. Rebuilding from the cache
// each time is what clears stale module state: the next execution
// always sees current sources without a worker restart, and imports
// resolve against the cache-served tree rather than the node's own
// working copy.

use std::path::{Path, PathBuf};

use bifrost_core::{Error, Result};
use bifrost_workspace::ModuleCacheStore;
use tracing::{debug, warn};

pub struct Sandbox {
    root: tempfile::TempDir,
}

impl Sandbox {
    /// Create a sandbox and lay out every cached module in it.
    pub async fn materialize(modules: &ModuleCacheStore) -> Result<Self> {
        let root = tempfile::TempDir::new()
            .map_err(|e| Error::Fatal(anyhow::anyhow!("cannot create sandbox dir: {e}")))?;

        let mut written = 0usize;
        for path in modules.list_paths().await? {
            let Some(module) = modules.get_module(&path).await? else {
                // Index claims the path but the cache came up empty; a
                // later reindex reconciles.
                debug!(path, "module missing from cache, skipping");
                continue;
            };

            let target = root.path().join(&path);
            if let Some(parent) = target.parent() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    warn!(path, error = %e, "sandbox dir create failed");
                    continue;
                }
            }
            if let Err(e) = std::fs::write(&target, module.source.as_bytes()) {
                warn!(path, error = %e, "sandbox module write failed");
                continue;
            }
            written += 1;
        }

        debug!(written, "sandbox materialized");
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }

    /// Write an extra file (inline script, params) into the sandbox.
    pub fn write_file(&self, name: &str, content: &[u8]) -> Result<PathBuf> {
        let target = self.root.path().join(name);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Fatal(anyhow::anyhow!("sandbox write failed: {e}")))?;
        }
        std::fs::write(&target, content)
            .map_err(|e| Error::Fatal(anyhow::anyhow!("sandbox write failed: {e}")))?;
        Ok(target)
    }
}
