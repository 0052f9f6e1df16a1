// Entity store: workflows, tools and data providers
//
// Identity rules: a row is keyed by (path, function_name) across
// re-discoveries; the row UUID is what discovery injects back into the
// source decorator. Reindex deactivates, never deletes - execution
// history holds FKs into this table.

use bifrost_core::{Error, Result};
use uuid::Uuid;

use crate::models::{EntityFilter, EntityRow, UpsertEntity};
use crate::repositories::Database;

const ENTITY_COLUMNS: &str = "id, name, entity_type, function_name, path, organization_id, \
     integration_id, is_active, endpoint_enabled, schedule, access_level, parameters_schema, \
     category, tags, created_at, updated_at";

impl Database {
    pub async fn get_entity(&self, id: Uuid) -> Result<Option<EntityRow>> {
        let row = sqlx::query_as::<_, EntityRow>(&format!(
            "SELECT {ENTITY_COLUMNS} FROM entities WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await?;

        Ok(row)
    }

    /// Scoped lookup: the org-scoped row wins; global is the fallback.
    ///
    /// Issued as two queries on purpose - a single
    /// `organization_id IN (org, NULL)` query cannot express the
    /// precedence when both scopes hold the name.
    pub async fn get_entity_by_name(
        &self,
        entity_type: &str,
        name: &str,
        org_id: Option<Uuid>,
    ) -> Result<Option<EntityRow>> {
        if let Some(org) = org_id {
            let scoped = self.entity_by_name_in_scope(entity_type, name, Some(org)).await?;
            if scoped.is_some() {
                return Ok(scoped);
            }
        }
        self.entity_by_name_in_scope(entity_type, name, None).await
    }

    async fn entity_by_name_in_scope(
        &self,
        entity_type: &str,
        name: &str,
        org_id: Option<Uuid>,
    ) -> Result<Option<EntityRow>> {
        let row = match org_id {
            Some(org) => {
                sqlx::query_as::<_, EntityRow>(&format!(
                    "SELECT {ENTITY_COLUMNS} FROM entities \
                     WHERE entity_type = $1 AND name = $2 AND organization_id = $3 AND is_active = TRUE"
                ))
                .bind(entity_type)
                .bind(name)
                .bind(org)
                .fetch_optional(self.pool())
                .await?
            }
            None => {
                sqlx::query_as::<_, EntityRow>(&format!(
                    "SELECT {ENTITY_COLUMNS} FROM entities \
                     WHERE entity_type = $1 AND name = $2 AND organization_id IS NULL AND is_active = TRUE"
                ))
                .bind(entity_type)
                .bind(name)
                .fetch_optional(self.pool())
                .await?
            }
        };

        Ok(row)
    }

    /// List entities visible in an org context: the org's own plus global.
    /// `filter.include_all_orgs` is the explicit platform-admin relaxation.
    pub async fn list_entities(
        &self,
        org_id: Option<Uuid>,
        filter: &EntityFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<EntityRow>> {
        let rows = sqlx::query_as::<_, EntityRow>(&format!(
            "SELECT {ENTITY_COLUMNS} FROM entities \
             WHERE ($1::uuid IS NULL OR organization_id = $1 OR organization_id IS NULL OR $2) \
               AND ($3::text IS NULL OR entity_type = $3) \
               AND (NOT $4 OR is_active = TRUE) \
               AND ($5::text IS NULL OR category = $5) \
             ORDER BY name \
             LIMIT $6 OFFSET $7"
        ))
        .bind(org_id)
        .bind(filter.include_all_orgs)
        .bind(&filter.entity_type)
        .bind(filter.active_only)
        .bind(&filter.category)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool())
        .await?;

        Ok(rows)
    }

    /// All active entities, used by reindex to compute orphans.
    pub async fn list_active_entities(&self) -> Result<Vec<EntityRow>> {
        let rows = sqlx::query_as::<_, EntityRow>(&format!(
            "SELECT {ENTITY_COLUMNS} FROM entities WHERE is_active = TRUE"
        ))
        .fetch_all(self.pool())
        .await?;

        Ok(rows)
    }

    pub async fn get_entities_by_path(&self, path: &str) -> Result<Vec<EntityRow>> {
        let rows = sqlx::query_as::<_, EntityRow>(&format!(
            "SELECT {ENTITY_COLUMNS} FROM entities WHERE path = $1"
        ))
        .bind(path)
        .fetch_all(self.pool())
        .await?;

        Ok(rows)
    }

    /// Upsert an entity keyed by (path, function_name).
    ///
    /// An existing row keeps its UUID whatever the decorator carries;
    /// a fresh declaration takes the decorator id when it is not already
    /// claimed by a row at another path. Returns `Conflict` when the
    /// name-in-scope uniqueness index rejects the registration.
    pub async fn upsert_entity_by_path_and_function(
        &self,
        input: UpsertEntity,
    ) -> Result<EntityRow> {
        let tags_json = serde_json::to_value(&input.tags)
            .map_err(|e| Error::validation(format!("unserializable tags: {e}")))?;

        let existing = sqlx::query_as::<_, EntityRow>(&format!(
            "SELECT {ENTITY_COLUMNS} FROM entities WHERE path = $1 AND function_name = $2"
        ))
        .bind(&input.path)
        .bind(&input.function_name)
        .fetch_optional(self.pool())
        .await?;

        if let Some(current) = existing {
            let row = sqlx::query_as::<_, EntityRow>(&format!(
                "UPDATE entities SET \
                     name = $2, \
                     entity_type = $3, \
                     organization_id = $4, \
                     is_active = TRUE, \
                     endpoint_enabled = $5, \
                     schedule = $6, \
                     access_level = $7, \
                     parameters_schema = $8, \
                     category = $9, \
                     tags = $10, \
                     updated_at = NOW() \
                 WHERE id = $1 \
                 RETURNING {ENTITY_COLUMNS}"
            ))
            .bind(current.id)
            .bind(&input.name)
            .bind(&input.entity_type)
            .bind(input.organization_id)
            .bind(input.endpoint_enabled)
            .bind(&input.schedule)
            .bind(&input.access_level)
            .bind(&input.parameters_schema)
            .bind(&input.category)
            .bind(&tags_json)
            .fetch_one(self.pool())
            .await?;

            return Ok(row);
        }

        let id = match input.id {
            // A decorator id copied along with a renamed file still points
            // at the old row; mint a fresh id in that case.
            Some(candidate) if self.get_entity(candidate).await?.is_none() => candidate,
            Some(_) => Uuid::new_v4(),
            None => Uuid::new_v4(),
        };

        let row = sqlx::query_as::<_, EntityRow>(&format!(
            "INSERT INTO entities \
                 (id, name, entity_type, function_name, path, organization_id, \
                  endpoint_enabled, schedule, access_level, parameters_schema, category, tags) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             RETURNING {ENTITY_COLUMNS}"
        ))
        .bind(id)
        .bind(&input.name)
        .bind(&input.entity_type)
        .bind(&input.function_name)
        .bind(&input.path)
        .bind(input.organization_id)
        .bind(input.endpoint_enabled)
        .bind(&input.schedule)
        .bind(&input.access_level)
        .bind(&input.parameters_schema)
        .bind(&input.category)
        .bind(&tags_json)
        .fetch_one(self.pool())
        .await?;

        Ok(row)
    }

    /// Deactivate entities whose source declarations have disappeared.
    /// Rows survive so execution history keeps its foreign keys.
    pub async fn deactivate_entities(&self, ids: &[Uuid]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            "UPDATE entities SET is_active = FALSE, updated_at = NOW() WHERE id = ANY($1)",
        )
        .bind(ids)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected())
    }
}
