// Precomputed workflow access table
//
// Rows are rebuilt inside the same transaction as the form/app mutation
// that changes the references; the authorization hot path reads them with
// a single indexed query.

use std::collections::HashSet;

use bifrost_core::Result;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::models::{AccessGrant, AccessPrincipal, WorkflowAccessRow};
use crate::repositories::Database;

const ACCESS_COLUMNS: &str =
    "id, workflow_id, organization_id, principal_type, role_id, source_type, source_id, created_at";

impl Database {
    pub async fn list_access_for_source(
        &self,
        source_type: &str,
        source_id: Uuid,
    ) -> Result<Vec<WorkflowAccessRow>> {
        let rows = sqlx::query_as::<_, WorkflowAccessRow>(&format!(
            "SELECT {ACCESS_COLUMNS} FROM workflow_access \
             WHERE source_type = $1 AND source_id = $2"
        ))
        .bind(source_type)
        .bind(source_id)
        .fetch_all(self.pool())
        .await?;

        Ok(rows)
    }

    /// Diff the source entity's current rows against `desired` and apply
    /// the minimal insert/delete set on the caller's transaction.
    pub async fn replace_access_for_source(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        source_type: &str,
        source_id: Uuid,
        organization_id: Option<Uuid>,
        desired: &[AccessGrant],
    ) -> Result<(u64, u64)> {
        let current = sqlx::query_as::<_, WorkflowAccessRow>(&format!(
            "SELECT {ACCESS_COLUMNS} FROM workflow_access \
             WHERE source_type = $1 AND source_id = $2 \
             FOR UPDATE"
        ))
        .bind(source_type)
        .bind(source_id)
        .fetch_all(&mut **tx)
        .await?;

        let desired_set: HashSet<AccessGrant> = desired.iter().copied().collect();
        let current_grants: Vec<(Uuid, AccessGrant)> = current
            .iter()
            .map(|row| {
                let principal = match row.role_id {
                    Some(role) => AccessPrincipal::Role(role),
                    None => AccessPrincipal::Authenticated,
                };
                (
                    row.id,
                    AccessGrant {
                        workflow_id: row.workflow_id,
                        principal,
                    },
                )
            })
            .collect();
        let current_set: HashSet<AccessGrant> =
            current_grants.iter().map(|(_, g)| *g).collect();

        let stale_ids: Vec<Uuid> = current_grants
            .iter()
            .filter(|(_, grant)| !desired_set.contains(grant))
            .map(|(id, _)| *id)
            .collect();

        let mut removed = 0;
        if !stale_ids.is_empty() {
            let result = sqlx::query("DELETE FROM workflow_access WHERE id = ANY($1)")
                .bind(&stale_ids)
                .execute(&mut **tx)
                .await?;
            removed = result.rows_affected();
        }

        let mut added = 0;
        for grant in desired_set.difference(&current_set) {
            sqlx::query(
                "INSERT INTO workflow_access \
                     (id, workflow_id, organization_id, principal_type, role_id, source_type, source_id) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(Uuid::new_v4())
            .bind(grant.workflow_id)
            .bind(organization_id)
            .bind(grant.principal.principal_type())
            .bind(grant.principal.role_id())
            .bind(source_type)
            .bind(source_id)
            .execute(&mut **tx)
            .await?;
            added += 1;
        }

        Ok((added, removed))
    }

    /// Remove every row contributed by a source entity (form/app deleted).
    pub async fn clear_access_for_source(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        source_type: &str,
        source_id: Uuid,
    ) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM workflow_access WHERE source_type = $1 AND source_id = $2")
                .bind(source_type)
                .bind(source_id)
                .execute(&mut **tx)
                .await?;

        Ok(result.rows_affected())
    }

    // ============================================
    // Authorization hot-path queries
    // ============================================

    /// Query A: the workflow belongs to an integration the caller's
    /// organization is connected to.
    pub async fn workflow_connected_via_integration(
        &self,
        workflow_id: Uuid,
        org_id: Uuid,
    ) -> Result<bool> {
        let (connected,): (bool,) = sqlx::query_as(
            "SELECT EXISTS( \
                 SELECT 1 FROM entities e \
                 JOIN org_integrations oi ON oi.integration_id = e.integration_id \
                 WHERE e.id = $1 AND oi.organization_id = $2)",
        )
        .bind(workflow_id)
        .bind(org_id)
        .fetch_one(self.pool())
        .await?;

        Ok(connected)
    }

    /// Query B: a workflow_access row in the caller's scope (or global)
    /// whose user-selector the caller satisfies.
    pub async fn workflow_access_exists(
        &self,
        workflow_id: Uuid,
        user_id: Uuid,
        org_id: Option<Uuid>,
    ) -> Result<bool> {
        let (granted,): (bool,) = sqlx::query_as(
            "SELECT EXISTS( \
                 SELECT 1 FROM workflow_access wa \
                 WHERE wa.workflow_id = $1 \
                   AND (wa.organization_id IS NULL OR wa.organization_id = $3) \
                   AND (wa.principal_type = 'authenticated' \
                        OR (wa.principal_type = 'role' AND wa.role_id IN ( \
                               SELECT ur.role_id FROM user_roles ur WHERE ur.user_id = $2))))",
        )
        .bind(workflow_id)
        .bind(user_id)
        .bind(org_id)
        .fetch_one(self.pool())
        .await?;

        Ok(granted)
    }
}
