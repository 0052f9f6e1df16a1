// Discovery pipeline: parse workspace sources, register entities,
// deactivate orphans
//
// Driven two ways: a single changed path (from the watcher) and a full
// workspace reindex (at node startup). Entities are deactivated, never
// deleted - execution history keeps its foreign keys.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use bifrost_core::{Error, Result};
use bifrost_storage::{Database, UpsertEntity};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::file_index::FileIndexStore;
use crate::filter::PathFilter;
use crate::modules::ModuleCacheStore;
use crate::rewriter::{self, DecoratorInfo, PropertyValue};

/// Outcome of processing one file
#[derive(Debug, Clone)]
pub struct ProcessedFile {
    /// Final content, after any id injection
    pub content: Vec<u8>,
    pub hash: String,
    /// True when injection or id reconciliation rewrote the source
    pub modified: bool,
    /// Live (function_name, entity id) pairs registered from this file
    pub registered: Vec<(String, Uuid)>,
    /// True when the source failed to parse; registrations at this path
    /// are left untouched until a clean pass
    pub parse_failed: bool,
}

/// Summary of a full workspace reindex
#[derive(Debug, Clone, Default)]
pub struct ReindexReport {
    pub files_indexed: usize,
    pub entities_upserted: usize,
    pub entities_deactivated: usize,
    pub file_rows_deleted: usize,
    /// Files with decorators still missing ids (write-back was disabled)
    pub files_needing_ids: Vec<String>,
}

#[derive(Clone)]
pub struct DiscoveryService {
    db: Database,
    files: FileIndexStore,
    modules: ModuleCacheStore,
    filter: PathFilter,
    workspace_root: PathBuf,
}

impl DiscoveryService {
    pub fn new(
        db: Database,
        files: FileIndexStore,
        modules: ModuleCacheStore,
        filter: PathFilter,
        workspace_root: PathBuf,
    ) -> Self {
        Self {
            db,
            files,
            modules,
            filter,
            workspace_root,
        }
    }

    /// Per-file flow for a changed path. `inject` enables id write-back.
    ///
    /// Non-Python files are indexed and done. Python files are parsed,
    /// get ids injected when missing, land in the module cache, and have
    /// their decorators registered; declarations that vanished from the
    /// file are deactivated.
    pub async fn process_file(
        &self,
        path: &str,
        content: &[u8],
        inject: bool,
    ) -> Result<ProcessedFile> {
        if !path.ends_with(".py") {
            let hash = self.files.write(path, content, Some("discovery")).await?;
            return Ok(ProcessedFile {
                content: content.to_vec(),
                hash,
                modified: false,
                registered: Vec::new(),
                parse_failed: false,
            });
        }

        // A file that does not parse still syncs: its bytes are indexed
        // and cached for imports (where it will raise at import time),
        // but no entities register from it.
        let Ok(source) = String::from_utf8(content.to_vec()) else {
            warn!(path, "python file is not valid UTF-8, indexing bytes only");
            return self.index_unparsed(path, content).await;
        };

        let mut current = source;
        let mut modified = false;

        if inject {
            match rewriter::inject_ids(&current) {
                Ok(outcome) => {
                    if outcome.modified {
                        debug!(path, injected = outcome.injected.len(), "injected decorator ids");
                        current = outcome.source;
                        modified = true;
                    }
                }
                Err(Error::Validation(msg)) => {
                    warn!(path, "source does not parse, indexing bytes only: {msg}");
                    return self.index_unparsed(path, content).await;
                }
                Err(e) => return Err(e),
            }
        }

        let decorators = match rewriter::read_decorators(&current) {
            Ok(d) => d,
            Err(Error::Validation(msg)) => {
                warn!(path, "source does not parse, indexing bytes only: {msg}");
                return self.index_unparsed(path, content).await;
            }
            Err(e) => return Err(e),
        };
        let mut registered = Vec::new();

        for decorator in &decorators {
            let input = entity_from_decorator(decorator, path);
            match self.db.upsert_entity_by_path_and_function(input).await {
                Ok(row) => {
                    // A renamed file carries the old declaration's id; the
                    // row keeps its identity and the source gets the row's
                    // id written back.
                    let declared = decorator
                        .kwarg("id")
                        .and_then(|v| v.as_str())
                        .and_then(|s| Uuid::parse_str(s).ok());
                    if inject && declared != Some(row.id) {
                        let outcome = rewriter::write_properties(
                            &current,
                            &decorator.function_name,
                            &[("id".to_string(), PropertyValue::Str(row.id.to_string()))],
                        )?;
                        if outcome.modified {
                            current = outcome.source;
                            modified = true;
                        }
                    }
                    registered.push((decorator.function_name.clone(), row.id));
                }
                Err(Error::Conflict(msg)) => {
                    // Duplicate name in scope: the first registration
                    // stays active, this one is surfaced and skipped.
                    warn!(
                        path,
                        function = decorator.function_name,
                        "duplicate entity name in scope: {msg}"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        // Declarations that disappeared from this file go inactive.
        let live: HashSet<&str> = registered.iter().map(|(f, _)| f.as_str()).collect();
        let stale: Vec<Uuid> = self
            .db
            .get_entities_by_path(path)
            .await?
            .into_iter()
            .filter(|row| row.is_active && !live.contains(row.function_name.as_str()))
            .map(|row| row.id)
            .collect();
        if !stale.is_empty() {
            self.db.deactivate_entities(&stale).await?;
        }

        let final_bytes = current.into_bytes();
        let hash = self
            .files
            .write(path, &final_bytes, Some("discovery"))
            .await?;

        if let Err(e) = self
            .modules
            .store_module(path, std::str::from_utf8(&final_bytes).unwrap_or(""), &hash)
            .await
        {
            warn!(path, error = %e, "module cache update failed");
        }

        Ok(ProcessedFile {
            content: final_bytes,
            hash,
            modified,
            registered,
            parse_failed: false,
        })
    }

    /// Index a Python file whose source could not be parsed: bytes into
    /// the file row, source into the module cache (imports surface the
    /// syntax error), no entity registrations touched.
    async fn index_unparsed(&self, path: &str, content: &[u8]) -> Result<ProcessedFile> {
        let hash = self.files.write(path, content, Some("discovery")).await?;
        if let Ok(source) = std::str::from_utf8(content) {
            if let Err(e) = self.modules.store_module(path, source, &hash).await {
                warn!(path, error = %e, "module cache update failed");
            }
        }
        Ok(ProcessedFile {
            content: content.to_vec(),
            hash,
            modified: false,
            registered: Vec::new(),
            parse_failed: true,
        })
    }

    /// A path was removed: drop its file row and module cache entry and
    /// deactivate every entity registered at it.
    pub async fn process_removed(&self, path: &str) -> Result<()> {
        self.files.delete(path).await?;
        if path.ends_with(".py") {
            if let Err(e) = self.modules.remove_module(path).await {
                warn!(path, error = %e, "module cache removal failed");
            }
        }

        let stale: Vec<Uuid> = self
            .db
            .get_entities_by_path(path)
            .await?
            .into_iter()
            .filter(|row| row.is_active)
            .map(|row| row.id)
            .collect();
        if !stale.is_empty() {
            let count = self.db.deactivate_entities(&stale).await?;
            info!(path, count, "deactivated entities for removed file");
        }

        Ok(())
    }

    /// Full workspace walk reconciling the entity table and the file
    /// index against the tree on disk.
    ///
    /// With `inject` disabled (startup on a fresh node) files whose
    /// decorators still lack ids are reported instead of rewritten;
    /// their entities are registered only for declarations that already
    /// carry an id.
    pub async fn full_reindex(&self, inject: bool) -> Result<ReindexReport> {
        let mut report = ReindexReport::default();
        let paths = walk_workspace(&self.workspace_root, &self.filter)?;

        let mut live: HashSet<(String, String)> = HashSet::new();
        let mut protected: HashSet<String> = HashSet::new();

        for rel_path in &paths {
            let absolute = self.workspace_root.join(rel_path);
            let content = match std::fs::read(&absolute) {
                Ok(c) => c,
                Err(e) => {
                    warn!(path = rel_path, error = %e, "skipping unreadable file");
                    continue;
                }
            };

            if !inject && rel_path.ends_with(".py") {
                // Detect-only pass: flag files that would need rewriting.
                if let Ok(source) = std::str::from_utf8(&content) {
                    if let Ok(decorators) = rewriter::read_decorators(source) {
                        if decorators.iter().any(|d| !d.has_id()) {
                            report.files_needing_ids.push(rel_path.clone());
                        }
                    }
                }
            }

            match self.process_file(rel_path, &content, inject).await {
                Ok(processed) => {
                    report.files_indexed += 1;
                    report.entities_upserted += processed.registered.len();
                    if processed.parse_failed {
                        protected.insert(rel_path.clone());
                    }
                    for (function, _) in processed.registered {
                        live.insert((rel_path.clone(), function));
                    }
                }
                Err(e @ Error::Fatal(_)) => return Err(e),
                Err(e) => {
                    warn!(path = rel_path, error = %e, "skipping file during reindex");
                }
            }
        }

        // Orphan deactivation: active entities whose (path, function) is
        // not in the live set. Paths that failed to parse are protected -
        // a syntax error must not orphan registrations.
        let stale: Vec<Uuid> = self
            .db
            .list_active_entities()
            .await?
            .into_iter()
            .filter(|row| !live.contains(&(row.path.clone(), row.function_name.clone())))
            .filter(|row| !protected.contains(&row.path))
            .map(|row| row.id)
            .collect();
        report.entities_deactivated = self.db.deactivate_entities(&stale).await? as usize;

        // File rows whose path no longer exists on disk are hard-deleted.
        let on_disk: HashSet<&String> = paths.iter().collect();
        for meta in self.files.list(None).await? {
            if !on_disk.contains(&meta.path) {
                self.files.delete(&meta.path).await?;
                if meta.path.ends_with(".py") {
                    let _ = self.modules.remove_module(&meta.path).await;
                }
                report.file_rows_deleted += 1;
            }
        }

        info!(
            files = report.files_indexed,
            upserted = report.entities_upserted,
            deactivated = report.entities_deactivated,
            deleted_rows = report.file_rows_deleted,
            needing_ids = report.files_needing_ids.len(),
            "workspace reindex complete"
        );

        Ok(report)
    }
}

/// Map a parsed decorator onto an entity upsert
fn entity_from_decorator(decorator: &DecoratorInfo, path: &str) -> UpsertEntity {
    let id = decorator
        .kwarg("id")
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok());

    let name = decorator
        .kwarg("name")
        .and_then(|v| v.as_str())
        .unwrap_or(&decorator.function_name)
        .to_string();

    let tags = match decorator.kwarg("tags") {
        Some(PropertyValue::List(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(|s| s.to_string()))
            .collect(),
        _ => Vec::new(),
    };

    let access_level = decorator
        .kwarg("access_level")
        .and_then(|v| v.as_str())
        .filter(|v| matches!(*v, "role" | "authenticated"))
        .unwrap_or("role")
        .to_string();

    UpsertEntity {
        id,
        name,
        entity_type: decorator.decorator_type.as_str().to_string(),
        function_name: decorator.function_name.clone(),
        path: path.to_string(),
        organization_id: None,
        endpoint_enabled: decorator
            .kwarg("endpoint_enabled")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
        schedule: decorator
            .kwarg("schedule")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
        access_level,
        parameters_schema: rewriter::parameters_schema(&decorator.function_params),
        category: decorator
            .kwarg("category")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
        tags,
    }
}

/// Collect workspace-relative file paths, excluding filtered ones.
fn walk_workspace(root: &Path, filter: &PathFilter) -> Result<Vec<String>> {
    let mut paths = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let entries = std::fs::read_dir(&dir)
            .map_err(|e| Error::Fatal(anyhow::anyhow!("cannot read {}: {e}", dir.display())))?;

        for entry in entries {
            let entry =
                entry.map_err(|e| Error::Fatal(anyhow::anyhow!("directory walk failed: {e}")))?;
            let path = entry.path();
            let rel = match path.strip_prefix(root) {
                Ok(r) => r.to_string_lossy().replace('\\', "/"),
                Err(_) => continue,
            };

            if filter.is_excluded(&rel) {
                continue;
            }

            if path.is_dir() {
                stack.push(path);
            } else {
                paths.push(rel);
            }
        }
    }

    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bifrost_contracts::EntityType;

    fn sample_decorator() -> DecoratorInfo {
        let source = "@workflow(id=\"6f9e2acb-9a4d-4d35-a86c-3d4ab0a5d7ce\", name=\"sync_data\", schedule=\"0 2 * * *\", endpoint_enabled=True, category=\"etl\", tags=[\"nightly\", \"crm\"])\nasync def sync_data(org: str, limit: int = 100) -> dict:\n    pass\n";
        rewriter::read_decorators(source).unwrap().remove(0)
    }

    #[test]
    fn maps_decorator_kwargs_onto_entity() {
        let input = entity_from_decorator(&sample_decorator(), "workflows/sync.py");
        assert_eq!(
            input.id,
            Some(Uuid::parse_str("6f9e2acb-9a4d-4d35-a86c-3d4ab0a5d7ce").unwrap())
        );
        assert_eq!(input.name, "sync_data");
        assert_eq!(input.entity_type, "workflow");
        assert_eq!(input.function_name, "sync_data");
        assert_eq!(input.path, "workflows/sync.py");
        assert!(input.endpoint_enabled);
        assert_eq!(input.schedule.as_deref(), Some("0 2 * * *"));
        assert_eq!(input.category.as_deref(), Some("etl"));
        assert_eq!(input.tags, vec!["nightly".to_string(), "crm".to_string()]);
        assert_eq!(input.parameters_schema["properties"]["org"]["type"], "string");
        assert_eq!(input.parameters_schema["required"], serde_json::json!(["org"]));
    }

    #[test]
    fn name_defaults_to_function_name() {
        let source = "@tool(id=\"0b6f36b2-89c8-41dc-9f2b-4f6fd6a5a3b1\")\ndef lookup(q: str):\n    pass\n";
        let decorator = rewriter::read_decorators(source).unwrap().remove(0);
        let input = entity_from_decorator(&decorator, "tools/lookup.py");
        assert_eq!(input.name, "lookup");
        assert_eq!(input.entity_type, "tool");
        assert_eq!(input.access_level, "role");
    }

    #[test]
    fn walk_skips_excluded_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("workflows")).unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join("workflows/a.py"), "x = 1\n").unwrap();
        std::fs::write(dir.path().join(".git/config"), "[core]\n").unwrap();
        std::fs::write(dir.path().join("notes.py~"), "junk\n").unwrap();

        let paths = walk_workspace(dir.path(), &PathFilter::default()).unwrap();
        assert_eq!(paths, vec!["workflows/a.py".to_string()]);
    }

    #[test]
    fn entity_type_strings_round_trip() {
        assert_eq!(
            "data_provider".parse::<EntityType>().unwrap().as_str(),
            "data_provider"
        );
    }
}
