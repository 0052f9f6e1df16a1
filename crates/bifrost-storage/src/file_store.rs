// Workspace file index rows
//
// One row per active path; the row is the source of truth for bytes.
// The S3 mirror is layered on by bifrost-workspace's file index store.

use bifrost_core::Result;

use crate::models::{WorkspaceFileMeta, WorkspaceFileRow};
use crate::repositories::Database;

const FILE_COLUMNS: &str = "path, content, content_hash, updated_by, created_at, updated_at";

impl Database {
    pub async fn get_workspace_file(&self, path: &str) -> Result<Option<WorkspaceFileRow>> {
        let row = sqlx::query_as::<_, WorkspaceFileRow>(&format!(
            "SELECT {FILE_COLUMNS} FROM workspace_files WHERE path = $1"
        ))
        .bind(path)
        .fetch_optional(self.pool())
        .await?;

        Ok(row)
    }

    pub async fn upsert_workspace_file(
        &self,
        path: &str,
        content: &[u8],
        content_hash: &str,
        updated_by: Option<&str>,
    ) -> Result<WorkspaceFileRow> {
        let row = sqlx::query_as::<_, WorkspaceFileRow>(&format!(
            "INSERT INTO workspace_files (path, content, content_hash, updated_by) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (path) DO UPDATE SET \
                 content = EXCLUDED.content, \
                 content_hash = EXCLUDED.content_hash, \
                 updated_by = EXCLUDED.updated_by, \
                 updated_at = NOW() \
             RETURNING {FILE_COLUMNS}"
        ))
        .bind(path)
        .bind(content)
        .bind(content_hash)
        .bind(updated_by)
        .fetch_one(self.pool())
        .await?;

        Ok(row)
    }

    /// Hard delete; removal is not a soft state for file rows.
    pub async fn delete_workspace_file(&self, path: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM workspace_files WHERE path = $1")
            .bind(path)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete every row under a folder prefix (trailing slash expected).
    pub async fn delete_workspace_files_under(&self, prefix: &str) -> Result<u64> {
        let pattern = format!("{}%", prefix);
        let result = sqlx::query("DELETE FROM workspace_files WHERE path LIKE $1")
            .bind(&pattern)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected())
    }

    pub async fn list_workspace_files(
        &self,
        prefix: Option<&str>,
    ) -> Result<Vec<WorkspaceFileMeta>> {
        let pattern = prefix.map(|p| format!("{}%", p));
        let rows = sqlx::query_as::<_, WorkspaceFileMeta>(
            "SELECT path, content_hash, updated_at FROM workspace_files \
             WHERE ($1::text IS NULL OR path LIKE $1) \
             ORDER BY path",
        )
        .bind(&pattern)
        .fetch_all(self.pool())
        .await?;

        Ok(rows)
    }
}
