// Execution records
//
// Status transitions are guarded in SQL so a late worker update can
// never move a terminal execution backwards.

use bifrost_contracts::{ExecutionMetrics, LogLine};
use bifrost_core::{Error, Result};
use uuid::Uuid;

use crate::models::{CreateExecution, ExecutionRow};
use crate::repositories::Database;

const EXECUTION_COLUMNS: &str = "id, workflow_id, script_name, status, parameters, \
     organization_id, user_id, user_name, user_email, form_id, api_key_id, \
     started_at, completed_at, duration_ms, peak_memory_kb, cpu_seconds, \
     result, error, error_kind, logs, created_at, updated_at";

impl Database {
    /// Insert a pending execution at dispatch time.
    pub async fn create_execution(&self, input: CreateExecution) -> Result<ExecutionRow> {
        let row = sqlx::query_as::<_, ExecutionRow>(&format!(
            "INSERT INTO executions \
                 (id, workflow_id, script_name, status, parameters, organization_id, \
                  user_id, user_name, user_email, form_id, api_key_id, logs) \
             VALUES ($1, $2, $3, 'pending', $4, $5, $6, $7, $8, $9, $10, '[]'::jsonb) \
             RETURNING {EXECUTION_COLUMNS}"
        ))
        .bind(input.id)
        .bind(input.workflow_id)
        .bind(&input.script_name)
        .bind(&input.parameters)
        .bind(input.organization_id)
        .bind(input.user_id)
        .bind(&input.user_name)
        .bind(&input.user_email)
        .bind(input.form_id)
        .bind(input.api_key_id)
        .fetch_one(self.pool())
        .await?;

        Ok(row)
    }

    pub async fn get_execution(&self, id: Uuid) -> Result<Option<ExecutionRow>> {
        let row = sqlx::query_as::<_, ExecutionRow>(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM executions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await?;

        Ok(row)
    }

    /// Worker pickup: pending -> running. Returns false if the execution
    /// was already past pending (e.g. cancelled while queued).
    pub async fn mark_execution_running(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE executions SET status = 'running', started_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Terminal transition with result, metrics and captured logs.
    #[allow(clippy::too_many_arguments)]
    pub async fn complete_execution(
        &self,
        id: Uuid,
        status: &str,
        result: Option<serde_json::Value>,
        error: Option<String>,
        error_kind: Option<String>,
        metrics: &ExecutionMetrics,
        logs: &[LogLine],
    ) -> Result<ExecutionRow> {
        if !matches!(status, "success" | "failed" | "cancelled") {
            return Err(Error::validation(format!(
                "'{status}' is not a terminal execution status"
            )));
        }

        let logs_json = serde_json::to_value(logs)
            .map_err(|e| Error::validation(format!("unserializable logs: {e}")))?;

        let row = sqlx::query_as::<_, ExecutionRow>(&format!(
            "UPDATE executions SET \
                 status = $2, \
                 result = $3, \
                 error = $4, \
                 error_kind = $5, \
                 completed_at = NOW(), \
                 duration_ms = $6, \
                 peak_memory_kb = $7, \
                 cpu_seconds = $8, \
                 logs = $9, \
                 updated_at = NOW() \
             WHERE id = $1 AND status IN ('pending', 'running') \
             RETURNING {EXECUTION_COLUMNS}"
        ))
        .bind(id)
        .bind(status)
        .bind(&result)
        .bind(&error)
        .bind(&error_kind)
        .bind(metrics.duration_ms)
        .bind(metrics.peak_memory_kb)
        .bind(metrics.cpu_seconds)
        .bind(&logs_json)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| {
            Error::conflict(format!("execution {id} is already terminal"))
        })?;

        Ok(row)
    }

    pub async fn list_executions(
        &self,
        org_id: Option<Uuid>,
        status: Option<&str>,
        workflow_id: Option<Uuid>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ExecutionRow>> {
        let rows = sqlx::query_as::<_, ExecutionRow>(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM executions \
             WHERE ($1::uuid IS NULL OR organization_id = $1) \
               AND ($2::text IS NULL OR status = $2) \
               AND ($3::uuid IS NULL OR workflow_id = $3) \
             ORDER BY created_at DESC \
             LIMIT $4 OFFSET $5"
        ))
        .bind(org_id)
        .bind(status)
        .bind(workflow_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool())
        .await?;

        Ok(rows)
    }

    /// Retention cleanup for terminal executions older than the horizon.
    pub async fn delete_executions_before(
        &self,
        horizon: chrono::DateTime<chrono::Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM executions \
             WHERE completed_at IS NOT NULL AND completed_at < $1 \
               AND status IN ('success', 'failed', 'cancelled')",
        )
        .bind(horizon)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected())
    }
}
