// File-index store: canonical per-path bytes
//
// Postgres holds the authoritative row; every write mirrors the bytes to
// S3 at the same key. Reads always come from Postgres - the object store
// exists for out-of-process consumers pulling an initial workspace.

use bifrost_core::Result;
use bifrost_storage::{Database, WorkspaceFileMeta, WorkspaceFileRow};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::mirror::S3Mirror;

/// Hex SHA-256 of a byte slice
pub fn sha256_hex(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

#[derive(Clone)]
pub struct FileIndexStore {
    db: Database,
    mirror: Option<S3Mirror>,
}

impl FileIndexStore {
    pub fn new(db: Database, mirror: Option<S3Mirror>) -> Self {
        Self { db, mirror }
    }

    pub fn mirror(&self) -> Option<&S3Mirror> {
        self.mirror.as_ref()
    }

    pub async fn read(&self, path: &str) -> Result<Option<WorkspaceFileRow>> {
        self.db.get_workspace_file(path).await
    }

    /// Upsert the row and mirror the bytes. Returns the content hash.
    /// The row reflects the new bytes before this returns; the mirror is
    /// best-effort.
    pub async fn write(
        &self,
        path: &str,
        content: &[u8],
        updated_by: Option<&str>,
    ) -> Result<String> {
        let hash = sha256_hex(content);
        self.db
            .upsert_workspace_file(path, content, &hash, updated_by)
            .await?;

        if let Some(mirror) = &self.mirror {
            if let Err(e) = mirror.put(path, content.to_vec()).await {
                warn!(path, error = %e, "s3 mirror write failed");
            }
        }

        Ok(hash)
    }

    pub async fn delete(&self, path: &str) -> Result<bool> {
        let removed = self.db.delete_workspace_file(path).await?;

        if let Some(mirror) = &self.mirror {
            if let Err(e) = mirror.delete(path).await {
                warn!(path, error = %e, "s3 mirror delete failed");
            }
        }

        Ok(removed)
    }

    /// Delete all rows under a folder prefix (trailing slash expected).
    pub async fn delete_folder(&self, prefix: &str) -> Result<u64> {
        let metas = self.db.list_workspace_files(Some(prefix)).await?;
        let removed = self.db.delete_workspace_files_under(prefix).await?;

        if let Some(mirror) = &self.mirror {
            for meta in metas {
                if let Err(e) = mirror.delete(&meta.path).await {
                    warn!(path = meta.path, error = %e, "s3 mirror delete failed");
                }
            }
        }

        Ok(removed)
    }

    pub async fn list(&self, prefix: Option<&str>) -> Result<Vec<WorkspaceFileMeta>> {
        self.db.list_workspace_files(prefix).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_matches_known_vector() {
        // SHA-256("A")
        assert_eq!(
            sha256_hex(b"A"),
            "559aead08264d5795d3909718cdd05abd49572e84fe55590eef31a88a08fdffd"
        );
    }
}
