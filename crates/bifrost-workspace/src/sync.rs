// Workspace sync service (subscriber side)
//
// Applies remote workspace events to the local working copy. The cache
// is updated BEFORE the disk mutation so the local watcher recognizes
// the resulting filesystem event as not-ours and stays quiet.

use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bifrost_contracts::{CacheEntry, WorkspaceEvent};
use bifrost_core::Result;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::WorkspaceCache;
use crate::discovery::DiscoveryService;
use crate::file_index::sha256_hex;
use crate::mirror::S3Mirror;
use crate::modules::ModuleCacheStore;
use crate::pubsub::SyncBus;

/// Canonical cache key for a folder path (trailing slash)
pub fn folder_key(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    format!("{trimmed}/")
}

pub struct WorkspaceSyncService {
    bus: SyncBus,
    cache: WorkspaceCache,
    modules: ModuleCacheStore,
    discovery: DiscoveryService,
    mirror: Option<S3Mirror>,
    workspace_root: PathBuf,
    listener: Option<JoinHandle<()>>,
    applier: Option<JoinHandle<()>>,
}

impl WorkspaceSyncService {
    pub fn new(
        bus: SyncBus,
        cache: WorkspaceCache,
        modules: ModuleCacheStore,
        discovery: DiscoveryService,
        mirror: Option<S3Mirror>,
        workspace_root: PathBuf,
    ) -> Self {
        Self {
            bus,
            cache,
            modules,
            discovery,
            mirror,
            workspace_root,
            listener: None,
            applier: None,
        }
    }

    /// Start the service: ensure the workspace directory, pull the
    /// initial tree from the mirror, reindex with write-back disabled,
    /// then subscribe for events.
    pub async fn start(&mut self) -> Result<()> {
        std::fs::create_dir_all(&self.workspace_root).map_err(|e| {
            bifrost_core::Error::Fatal(anyhow::anyhow!(
                "cannot create workspace dir {}: {e}",
                self.workspace_root.display()
            ))
        })?;
        info!(root = %self.workspace_root.display(), "workspace directory ready");

        if let Some(mirror) = self.mirror.clone() {
            if let Err(e) = self.pull_initial_workspace(&mirror).await {
                warn!(error = %e, "initial workspace pull failed");
            }

            match self.discovery.full_reindex(false).await {
                Ok(report) => {
                    if !report.files_needing_ids.is_empty() {
                        info!(
                            count = report.files_needing_ids.len(),
                            files = ?report.files_needing_ids,
                            "files need decorator id injection; run maintenance reindex"
                        );
                    }
                }
                Err(e) => warn!(error = %e, "startup reindex failed"),
            }
        }

        let (tx, mut rx) = mpsc::channel::<WorkspaceEvent>(256);
        self.listener = Some(self.bus.subscribe(tx).await?);

        let applier = SyncApplier {
            cache: self.cache.clone(),
            modules: self.modules.clone(),
            workspace_root: self.workspace_root.clone(),
        };
        self.applier = Some(tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(e) = applier.apply(&event).await {
                    warn!(path = event.path(), error = %e, "failed to apply workspace event");
                }
            }
        }));

        info!("workspace sync service started");
        Ok(())
    }

    pub async fn stop(&mut self) {
        if let Some(handle) = self.listener.take() {
            handle.abort();
        }
        if let Some(handle) = self.applier.take() {
            handle.abort();
        }
        info!("workspace sync service stopped");
    }

    async fn pull_initial_workspace(&self, mirror: &S3Mirror) -> Result<()> {
        let paths = mirror.list().await?;
        let mut pulled = 0usize;

        for path in paths {
            let content = match mirror.get(&path).await {
                Ok(c) => c,
                Err(e) => {
                    warn!(path, error = %e, "failed to pull mirrored file");
                    continue;
                }
            };

            let hash = sha256_hex(&content);
            self.cache.set(&path, &CacheEntry::live(&hash)).await;

            let local = self.workspace_root.join(&path);
            if let Some(parent) = local.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            if let Err(e) = std::fs::write(&local, &content) {
                warn!(path, error = %e, "failed to write pulled file");
                continue;
            }
            pulled += 1;
        }

        info!(pulled, "initial workspace pulled from object store");
        Ok(())
    }
}

/// Applies individual events to cache and disk
struct SyncApplier {
    cache: WorkspaceCache,
    modules: ModuleCacheStore,
    workspace_root: PathBuf,
}

impl SyncApplier {
    async fn apply(&self, event: &WorkspaceEvent) -> Result<()> {
        match event {
            WorkspaceEvent::WorkspaceFileWrite {
                path,
                content_b64,
                content_hash,
            } => self.apply_write(path, content_b64, content_hash).await,
            WorkspaceEvent::WorkspaceFileDelete { path } => self.apply_delete(path).await,
            WorkspaceEvent::WorkspaceFileRename { old_path, new_path } => {
                self.apply_rename(old_path, new_path).await
            }
            WorkspaceEvent::WorkspaceFolderCreate { path } => self.apply_folder_create(path).await,
            WorkspaceEvent::WorkspaceFolderDelete { path } => self.apply_folder_delete(path).await,
        }
    }

    async fn apply_write(&self, path: &str, content_b64: &str, content_hash: &str) -> Result<()> {
        let content = match BASE64.decode(content_b64) {
            Ok(c) => c,
            Err(e) => {
                warn!(path, error = %e, "dropping write event with invalid base64");
                return Ok(());
            }
        };

        // Hash mismatch means a corrupt or stale event: log and drop, a
        // later reindex reconciles.
        let actual = sha256_hex(&content);
        if actual != content_hash {
            warn!(
                path,
                advertised = content_hash,
                actual, "dropping write event with hash mismatch"
            );
            return Ok(());
        }

        // Cache BEFORE disk, so our own watcher sees a known hash.
        self.cache.set(path, &CacheEntry::live(content_hash)).await;

        let local = self.workspace_root.join(path);

        // Skip the disk write when content is already current; avoids a
        // no-op watcher event on the origin node.
        if let Ok(existing) = std::fs::read(&local) {
            if sha256_hex(&existing) == actual {
                debug!(path, "local copy already current");
                self.modules.invalidate().await;
                return Ok(());
            }
        }

        if let Some(parent) = local.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        std::fs::write(&local, &content).map_err(|e| {
            bifrost_core::Error::transient(format!("local write failed for {path}: {e}"))
        })?;

        self.modules.invalidate().await;
        debug!(path, "applied remote write");
        Ok(())
    }

    async fn apply_delete(&self, path: &str) -> Result<()> {
        self.cache.set(path, &CacheEntry::deleted()).await;

        let local = self.workspace_root.join(path);
        if local.exists() {
            if let Err(e) = std::fs::remove_file(&local) {
                warn!(path, error = %e, "local delete failed");
            }
        }

        self.modules.invalidate().await;
        debug!(path, "applied remote delete");
        Ok(())
    }

    async fn apply_rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        self.cache.set(old_path, &CacheEntry::deleted()).await;

        let old_local = self.workspace_root.join(old_path);
        let new_local = self.workspace_root.join(new_path);

        if old_local.exists() {
            if let Some(parent) = new_local.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            if let Err(e) = std::fs::rename(&old_local, &new_local) {
                warn!(old_path, new_path, error = %e, "local rename failed");
                return Ok(());
            }
        }

        if let Ok(content) = std::fs::read(&new_local) {
            self.cache
                .set(new_path, &CacheEntry::live(sha256_hex(&content)))
                .await;
        }

        self.modules.invalidate().await;
        debug!(old_path, new_path, "applied remote rename");
        Ok(())
    }

    async fn apply_folder_create(&self, path: &str) -> Result<()> {
        let key = folder_key(path);
        self.cache.set(&key, &CacheEntry::folder()).await;

        let local = self.workspace_root.join(key.trim_end_matches('/'));
        if let Err(e) = std::fs::create_dir_all(&local) {
            warn!(path, error = %e, "local folder create failed");
        }
        Ok(())
    }

    async fn apply_folder_delete(&self, path: &str) -> Result<()> {
        let key = folder_key(path);
        self.cache.set(&key, &CacheEntry::deleted()).await;

        let local = self.workspace_root.join(key.trim_end_matches('/'));
        if local.exists() {
            if let Err(e) = std::fs::remove_dir_all(&local) {
                warn!(path, error = %e, "local folder delete failed");
            }
        }

        self.modules.invalidate().await;
        Ok(())
    }
}

/// Make a local path workspace-relative with forward slashes.
pub fn relative_path(root: &Path, absolute: &Path) -> Option<String> {
    absolute
        .strip_prefix(root)
        .ok()
        .map(|p| p.to_string_lossy().replace('\\', "/"))
        .filter(|p| !p.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folder_keys_are_slash_terminated() {
        assert_eq!(folder_key("pkg"), "pkg/");
        assert_eq!(folder_key("pkg/"), "pkg/");
        assert_eq!(folder_key("a/b//"), "a/b/");
    }

    #[test]
    fn relative_paths_are_forward_slashed() {
        let root = Path::new("/tmp/ws");
        assert_eq!(
            relative_path(root, Path::new("/tmp/ws/workflows/x.py")),
            Some("workflows/x.py".to_string())
        );
        assert_eq!(relative_path(root, Path::new("/elsewhere/x.py")), None);
        assert_eq!(relative_path(root, Path::new("/tmp/ws")), None);
    }
}
