// Configuration store
//
// At most one row per (scope, key). Secret values arrive already
// encrypted; this store never sees cleartext secrets.

use bifrost_core::Result;
use uuid::Uuid;

use crate::models::{ConfigRow, UpsertConfig};
use crate::repositories::Database;

const CONFIG_COLUMNS: &str =
    "id, key, value, config_type, description, organization_id, created_at, updated_at";

impl Database {
    /// Rows for a scope's resolver map: global entries plus the org's own.
    /// The resolver overlays org entries on top of global on key collision.
    pub async fn list_config_for_scope(&self, org_id: Option<Uuid>) -> Result<Vec<ConfigRow>> {
        let rows = sqlx::query_as::<_, ConfigRow>(&format!(
            "SELECT {CONFIG_COLUMNS} FROM config \
             WHERE organization_id IS NULL OR organization_id = $1 \
             ORDER BY organization_id NULLS FIRST, key"
        ))
        .bind(org_id)
        .fetch_all(self.pool())
        .await?;

        Ok(rows)
    }

    pub async fn get_config(&self, key: &str, org_id: Option<Uuid>) -> Result<Option<ConfigRow>> {
        let row = match org_id {
            Some(org) => {
                sqlx::query_as::<_, ConfigRow>(&format!(
                    "SELECT {CONFIG_COLUMNS} FROM config WHERE key = $1 AND organization_id = $2"
                ))
                .bind(key)
                .bind(org)
                .fetch_optional(self.pool())
                .await?
            }
            None => {
                sqlx::query_as::<_, ConfigRow>(&format!(
                    "SELECT {CONFIG_COLUMNS} FROM config WHERE key = $1 AND organization_id IS NULL"
                ))
                .bind(key)
                .fetch_optional(self.pool())
                .await?
            }
        };

        Ok(row)
    }

    pub async fn upsert_config(&self, input: UpsertConfig) -> Result<ConfigRow> {
        // Two statements because the scope uniqueness is enforced by
        // partial indexes (NULL org and non-NULL org separately), which
        // ON CONFLICT cannot target with one clause.
        let existing = self.get_config(&input.key, input.organization_id).await?;

        let row = match existing {
            Some(current) => {
                sqlx::query_as::<_, ConfigRow>(&format!(
                    "UPDATE config SET value = $2, config_type = $3, description = $4, updated_at = NOW() \
                     WHERE id = $1 \
                     RETURNING {CONFIG_COLUMNS}"
                ))
                .bind(current.id)
                .bind(&input.value)
                .bind(&input.config_type)
                .bind(&input.description)
                .fetch_one(self.pool())
                .await?
            }
            None => {
                sqlx::query_as::<_, ConfigRow>(&format!(
                    "INSERT INTO config (id, key, value, config_type, description, organization_id) \
                     VALUES ($1, $2, $3, $4, $5, $6) \
                     RETURNING {CONFIG_COLUMNS}"
                ))
                .bind(Uuid::new_v4())
                .bind(&input.key)
                .bind(&input.value)
                .bind(&input.config_type)
                .bind(&input.description)
                .bind(input.organization_id)
                .fetch_one(self.pool())
                .await?
            }
        };

        Ok(row)
    }

    pub async fn delete_config(&self, key: &str, org_id: Option<Uuid>) -> Result<bool> {
        let result = match org_id {
            Some(org) => {
                sqlx::query("DELETE FROM config WHERE key = $1 AND organization_id = $2")
                    .bind(key)
                    .bind(org)
                    .execute(self.pool())
                    .await?
            }
            None => {
                sqlx::query("DELETE FROM config WHERE key = $1 AND organization_id IS NULL")
                    .bind(key)
                    .execute(self.pool())
                    .await?
            }
        };

        Ok(result.rows_affected() > 0)
    }
}
