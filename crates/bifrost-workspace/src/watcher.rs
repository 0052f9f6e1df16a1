// Workspace watcher (publisher side)
//
// An OS-native observer thread feeds filesystem events through a channel
// into a debounced coalescing loop. After the window closes, the cache
// decides origination: a change whose hash the cache already carries was
// applied from pub/sub and is not re-published.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bifrost_contracts::{CacheEntry, WorkspaceEvent};
use bifrost_core::Result;
use notify::{EventKind, RecursiveMode, Watcher};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::WorkspaceCache;
use crate::discovery::DiscoveryService;
use crate::file_index::{sha256_hex, FileIndexStore};
use crate::filter::PathFilter;
use crate::pubsub::SyncBus;
use crate::sync::{folder_key, relative_path};

/// Coalesced change kinds; delete dominates modify for the same path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingChange {
    Write,
    Delete,
    FolderCreate,
    FolderDelete,
}

impl PendingChange {
    fn is_delete(&self) -> bool {
        matches!(self, PendingChange::Delete | PendingChange::FolderDelete)
    }

    /// Cross-path processing order within one drained window. Deletes go
    /// first so a rename (delete old + write new) frees the old name
    /// before the new registration claims it.
    fn order(&self) -> u8 {
        match self {
            PendingChange::Delete => 0,
            PendingChange::FolderDelete => 1,
            PendingChange::FolderCreate => 2,
            PendingChange::Write => 3,
        }
    }
}

/// Coalesce a new observation into the pending map.
pub fn coalesce(pending: &mut HashMap<String, PendingChange>, path: String, change: PendingChange) {
    match pending.get(&path) {
        Some(existing) if existing.is_delete() && !change.is_delete() => {
            // Delete already recorded; a lingering modify does not undo it.
        }
        _ => {
            pending.insert(path, change);
        }
    }
}

/// Origination check for a write: true when this node must publish.
/// False means the cache already carries the exact local state, i.e. the
/// change was just applied from pub/sub.
pub fn is_originated_write(cached: Option<&CacheEntry>, local_hash: &str) -> bool {
    match cached {
        Some(entry) if !entry.is_deleted && entry.hash.as_deref() == Some(local_hash) => false,
        _ => true,
    }
}

pub struct WorkspaceWatcher {
    cache: WorkspaceCache,
    bus: SyncBus,
    files: FileIndexStore,
    discovery: DiscoveryService,
    filter: PathFilter,
    workspace_root: PathBuf,
    debounce: Duration,
    observer: Option<notify::RecommendedWatcher>,
    task: Option<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
}

impl WorkspaceWatcher {
    pub fn new(
        cache: WorkspaceCache,
        bus: SyncBus,
        files: FileIndexStore,
        discovery: DiscoveryService,
        filter: PathFilter,
        workspace_root: PathBuf,
        debounce: Duration,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            cache,
            bus,
            files,
            discovery,
            filter,
            workspace_root,
            debounce,
            observer: None,
            task: None,
            shutdown_tx,
        }
    }

    /// Start the observer thread and the debounced processing loop.
    pub fn start(&mut self) -> Result<()> {
        std::fs::create_dir_all(&self.workspace_root).map_err(|e| {
            bifrost_core::Error::Fatal(anyhow::anyhow!(
                "cannot create workspace dir {}: {e}",
                self.workspace_root.display()
            ))
        })?;

        let (tx, rx) = mpsc::unbounded_channel::<notify::Event>();

        // The observer callback runs on notify's own thread; an unbounded
        // send is the thread-safe bridge into the async loop.
        let mut observer =
            notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
                match result {
                    Ok(event) => {
                        let _ = tx.send(event);
                    }
                    Err(e) => warn!(error = %e, "filesystem observer error"),
                }
            })
            .map_err(|e| {
                bifrost_core::Error::Fatal(anyhow::anyhow!("cannot create watcher: {e}"))
            })?;

        observer
            .watch(&self.workspace_root, RecursiveMode::Recursive)
            .map_err(|e| {
                bifrost_core::Error::Fatal(anyhow::anyhow!(
                    "cannot watch {}: {e}",
                    self.workspace_root.display()
                ))
            })?;
        self.observer = Some(observer);

        let processor = ChangeProcessor {
            cache: self.cache.clone(),
            bus: self.bus.clone(),
            files: self.files.clone(),
            discovery: self.discovery.clone(),
            workspace_root: self.workspace_root.clone(),
        };
        let filter = self.filter.clone();
        let root = self.workspace_root.clone();
        let debounce = self.debounce;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        self.task = Some(tokio::spawn(async move {
            let mut rx = rx;
            let mut pending: HashMap<String, PendingChange> = HashMap::new();

            loop {
                let window = tokio::time::sleep(debounce);
                tokio::pin!(window);

                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    maybe = rx.recv() => {
                        match maybe {
                            Some(event) => intake(&mut pending, &event, &root, &filter),
                            None => break,
                        }
                    }
                    _ = &mut window, if !pending.is_empty() => {
                        let mut drained: Vec<(String, PendingChange)> = pending.drain().collect();
                        drained.sort_by_key(|(path, change)| (change.order(), path.clone()));
                        for (path, change) in drained {
                            if let Err(e) = processor.process(&path, change).await {
                                warn!(path, error = %e, "error processing workspace change");
                            }
                        }
                    }
                }
            }
        }));

        info!(root = %self.workspace_root.display(), "workspace watcher started");
        Ok(())
    }

    pub async fn stop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(observer) = self.observer.take() {
            drop(observer);
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        info!("workspace watcher stopped");
    }
}

/// Translate an observer event into pending changes.
fn intake(
    pending: &mut HashMap<String, PendingChange>,
    event: &notify::Event,
    root: &std::path::Path,
    filter: &PathFilter,
) {
    for absolute in &event.paths {
        let Some(rel) = relative_path(root, absolute) else {
            continue;
        };
        if filter.is_excluded(&rel) {
            continue;
        }

        let is_dir_hint = absolute.is_dir();
        let change = match event.kind {
            EventKind::Create(notify::event::CreateKind::Folder) => PendingChange::FolderCreate,
            EventKind::Create(_) if is_dir_hint => PendingChange::FolderCreate,
            EventKind::Create(_) => PendingChange::Write,
            EventKind::Modify(_) => {
                // Renames surface as modify events on paths that may no
                // longer exist; existence decides write vs delete.
                if absolute.exists() {
                    if is_dir_hint {
                        continue;
                    }
                    PendingChange::Write
                } else {
                    PendingChange::Delete
                }
            }
            EventKind::Remove(notify::event::RemoveKind::Folder) => PendingChange::FolderDelete,
            EventKind::Remove(_) => PendingChange::Delete,
            _ => continue,
        };

        coalesce(pending, rel, change);
    }
}

/// Executes the originated-change pipeline after the debounce window.
struct ChangeProcessor {
    cache: WorkspaceCache,
    bus: SyncBus,
    files: FileIndexStore,
    discovery: DiscoveryService,
    workspace_root: PathBuf,
}

impl ChangeProcessor {
    async fn process(&self, path: &str, change: PendingChange) -> Result<()> {
        match change {
            PendingChange::Write => self.process_write(path).await,
            PendingChange::Delete => self.process_delete(path).await,
            PendingChange::FolderCreate => self.process_folder_create(path).await,
            PendingChange::FolderDelete => self.process_folder_delete(path).await,
        }
    }

    async fn process_write(&self, path: &str) -> Result<()> {
        let local = self.workspace_root.join(path);
        if !local.is_file() {
            return Ok(());
        }

        let content = match std::fs::read(&local) {
            Ok(c) => c,
            Err(e) => {
                warn!(path, error = %e, "failed to read changed file");
                return Ok(());
            }
        };
        let local_hash = sha256_hex(&content);

        let cached = self.cache.get(path).await.unwrap_or(None);
        if !is_originated_write(cached.as_ref(), &local_hash) {
            debug!(path, "suppressing write applied from pub/sub");
            return Ok(());
        }

        info!(path, bytes = content.len(), "originating file write");

        // Discovery persists to the file index (and may inject ids);
        // cache and publish carry the final content.
        let processed = self.discovery.process_file(path, &content, true).await?;
        if processed.modified {
            info!(path, "decorator ids injected");
        }

        self.cache
            .set(path, &CacheEntry::live(&processed.hash))
            .await;

        let event = WorkspaceEvent::WorkspaceFileWrite {
            path: path.to_string(),
            content_b64: BASE64.encode(&processed.content),
            content_hash: processed.hash.clone(),
        };
        if let Err(e) = self.bus.publish(&event).await {
            warn!(path, error = %e, "workspace publish failed");
        }

        Ok(())
    }

    async fn process_delete(&self, path: &str) -> Result<()> {
        let cached = self.cache.get(path).await.unwrap_or(None);
        match cached {
            Some(entry) if entry.is_deleted => {
                debug!(path, "suppressing delete applied from pub/sub");
                return Ok(());
            }
            None => {
                // Never synced; nothing to tear down or announce.
                debug!(path, "ignoring delete of unsynced path");
                return Ok(());
            }
            Some(_) => {}
        }

        info!(path, "originating file delete");
        self.cache.set(path, &CacheEntry::deleted()).await;
        self.discovery.process_removed(path).await?;

        let event = WorkspaceEvent::WorkspaceFileDelete {
            path: path.to_string(),
        };
        if let Err(e) = self.bus.publish(&event).await {
            warn!(path, error = %e, "workspace publish failed");
        }

        Ok(())
    }

    async fn process_folder_create(&self, path: &str) -> Result<()> {
        let key = folder_key(path);
        let cached = self.cache.get(&key).await.unwrap_or(None);
        if matches!(cached, Some(ref entry) if !entry.is_deleted) {
            debug!(path, "suppressing folder create applied from pub/sub");
            return Ok(());
        }

        info!(path, "originating folder create");
        self.cache.set(&key, &CacheEntry::folder()).await;

        let event = WorkspaceEvent::WorkspaceFolderCreate { path: key };
        if let Err(e) = self.bus.publish(&event).await {
            warn!(path, error = %e, "workspace publish failed");
        }

        Ok(())
    }

    async fn process_folder_delete(&self, path: &str) -> Result<()> {
        let key = folder_key(path);
        let cached = self.cache.get(&key).await.unwrap_or(None);
        match cached {
            Some(entry) if entry.is_deleted => {
                debug!(path, "suppressing folder delete applied from pub/sub");
                return Ok(());
            }
            None => {
                debug!(path, "ignoring delete of unsynced folder");
                return Ok(());
            }
            Some(_) => {}
        }

        info!(path, "originating folder delete");
        self.cache.set(&key, &CacheEntry::deleted()).await;

        // Tear down every indexed file under the folder.
        for meta in self.files.list(Some(&key)).await? {
            if let Err(e) = self.discovery.process_removed(&meta.path).await {
                warn!(path = meta.path, error = %e, "failed to remove folder member");
            }
        }

        let event = WorkspaceEvent::WorkspaceFolderDelete { path: key };
        if let Err(e) = self.bus.publish(&event).await {
            warn!(path, error = %e, "workspace publish failed");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delete_dominates_modify() {
        let mut pending = HashMap::new();
        coalesce(&mut pending, "a.py".into(), PendingChange::Write);
        coalesce(&mut pending, "a.py".into(), PendingChange::Delete);
        coalesce(&mut pending, "a.py".into(), PendingChange::Write);
        assert_eq!(pending["a.py"], PendingChange::Delete);
    }

    #[test]
    fn rapid_writes_collapse_to_one() {
        let mut pending = HashMap::new();
        for _ in 0..10 {
            coalesce(&mut pending, "a.py".into(), PendingChange::Write);
        }
        assert_eq!(pending.len(), 1);
        assert_eq!(pending["a.py"], PendingChange::Write);
    }

    #[test]
    fn paths_coalesce_independently() {
        let mut pending = HashMap::new();
        coalesce(&mut pending, "a.py".into(), PendingChange::Write);
        coalesce(&mut pending, "b.py".into(), PendingChange::Delete);
        assert_eq!(pending["a.py"], PendingChange::Write);
        assert_eq!(pending["b.py"], PendingChange::Delete);
    }

    #[test]
    fn deletes_process_before_writes_in_a_window() {
        let mut drained = vec![
            ("b_new.py".to_string(), PendingChange::Write),
            ("a_old.py".to_string(), PendingChange::Delete),
            ("pkg/".to_string(), PendingChange::FolderCreate),
        ];
        drained.sort_by_key(|(path, change)| (change.order(), path.clone()));
        assert_eq!(drained[0].1, PendingChange::Delete);
        assert_eq!(drained[1].1, PendingChange::FolderCreate);
        assert_eq!(drained[2].1, PendingChange::Write);
    }

    #[test]
    fn matching_cache_hash_suppresses_publish() {
        let entry = CacheEntry::live("abc");
        assert!(!is_originated_write(Some(&entry), "abc"));
        assert!(is_originated_write(Some(&entry), "def"));
        assert!(is_originated_write(None, "abc"));

        let deleted = CacheEntry::deleted();
        assert!(is_originated_write(Some(&deleted), "abc"));
    }
}
