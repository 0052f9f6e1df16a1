// Executor: drives one queued execution end to end
//
// Hydrates the context from Redis, walks the status transitions on the
// execution row, runs the script runtime, and pushes the reply for
// sync-mode callers. The consumer acks only after this returns, so a
// crashed worker re-delivers the job to a replacement.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bifrost_contracts::{
    ExecutionMetrics, ExecutionQueueMessage, ExecutionReply, ExecutionStatus, LogLine,
};
use bifrost_core::settings::{exec_context_key, exec_reply_key, EXEC_QUEUE_KEY};
use bifrost_core::{Error, ExecutionContext, Result};
use bifrost_storage::Database;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{info, warn};
use uuid::Uuid;

use crate::runtime::{RunOutput, RunRequest, ScriptRuntime};

pub struct Executor {
    db: Arc<Database>,
    redis: ConnectionManager,
    runtime: Arc<dyn ScriptRuntime>,
    reply_ttl_secs: u64,
}

impl Executor {
    pub fn new(
        db: Arc<Database>,
        redis: ConnectionManager,
        runtime: Arc<dyn ScriptRuntime>,
        reply_ttl_secs: u64,
    ) -> Self {
        Self {
            db,
            redis,
            runtime,
            reply_ttl_secs,
        }
    }

    pub async fn handle(&self, message: &ExecutionQueueMessage) -> Result<()> {
        let execution_id = message.execution_id;
        self.untrack_queued(execution_id).await;

        let context = match self.load_context(execution_id).await {
            Ok(ctx) => ctx,
            Err(e) => {
                warn!(%execution_id, error = %e, "missing execution context");
                self.finish(
                    execution_id,
                    message.sync,
                    ExecutionStatus::Failed,
                    None,
                    Some("execution context expired or missing".to_string()),
                    Some("not_found".to_string()),
                    ExecutionMetrics::default(),
                    Vec::new(),
                )
                .await?;
                return Ok(());
            }
        };

        // Cancelled while still queued: honor before doing any work.
        if self.cancelled_while_queued(execution_id).await {
            info!(%execution_id, "execution cancelled before pickup");
            self.finish(
                execution_id,
                message.sync,
                ExecutionStatus::Cancelled,
                None,
                Some("execution cancelled".to_string()),
                None,
                ExecutionMetrics::default(),
                Vec::new(),
            )
            .await?;
            return Ok(());
        }

        if !self.db.mark_execution_running(execution_id).await? {
            warn!(%execution_id, "execution not pending, skipping");
            return Ok(());
        }

        let request = match self.build_request(message, &context).await {
            Ok(r) => r,
            Err(e) => {
                self.finish(
                    execution_id,
                    message.sync,
                    ExecutionStatus::Failed,
                    None,
                    Some(e.to_string()),
                    Some(e.kind().to_string()),
                    ExecutionMetrics::default(),
                    Vec::new(),
                )
                .await?;
                return Ok(());
            }
        };

        info!(%execution_id, "execution started");
        let output = match self.runtime.run(request).await {
            Ok(output) => output,
            Err(e) => RunOutput {
                success: false,
                cancelled: false,
                result: None,
                error: Some(e.to_string()),
                logs: Vec::new(),
                metrics: ExecutionMetrics::default(),
            },
        };

        let status = if output.cancelled {
            ExecutionStatus::Cancelled
        } else if output.success {
            ExecutionStatus::Success
        } else {
            ExecutionStatus::Failed
        };
        let error_kind = match status {
            ExecutionStatus::Failed => Some("execution_error".to_string()),
            _ => None,
        };

        info!(
            %execution_id,
            status = status.as_str(),
            duration_ms = output.metrics.duration_ms,
            "execution finished"
        );

        self.finish(
            execution_id,
            message.sync,
            status,
            output.result,
            output.error,
            error_kind,
            output.metrics,
            output.logs,
        )
        .await
    }

    async fn load_context(&self, execution_id: Uuid) -> Result<ExecutionContext> {
        let mut conn = self.redis.clone();
        let raw: Option<String> = conn
            .get(exec_context_key(execution_id))
            .await
            .map_err(|e| Error::transient(format!("context read failed: {e}")))?;

        let raw = raw.ok_or_else(|| Error::not_found("pending execution context"))?;
        serde_json::from_str(&raw)
            .map_err(|e| Error::validation(format!("malformed execution context: {e}")))
    }

    async fn cancelled_while_queued(&self, execution_id: Uuid) -> bool {
        let mut conn = self.redis.clone();
        let flag: redis::RedisResult<Option<String>> = conn
            .get(bifrost_core::settings::exec_cancel_key(execution_id))
            .await;
        matches!(flag, Ok(Some(_)))
    }

    async fn build_request(
        &self,
        message: &ExecutionQueueMessage,
        context: &ExecutionContext,
    ) -> Result<RunRequest> {
        if message.is_inline_code() {
            return inline_request(message, context);
        }

        let workflow_id = message
            .workflow_id
            .or(context.workflow_id)
            .ok_or_else(|| Error::validation("queue message names no workflow"))?;

        let entity = self
            .db
            .get_entity(workflow_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("workflow {workflow_id}")))?;

        if !entity.is_active {
            return Err(Error::validation(format!(
                "workflow '{}' is deactivated",
                entity.name
            )));
        }

        Ok(RunRequest {
            execution_id: message.execution_id,
            module_path: Some(entity.path),
            function_name: Some(entity.function_name),
            inline_code: None,
            script_name: None,
            parameters: context.parameters.clone(),
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish(
        &self,
        execution_id: Uuid,
        sync: bool,
        status: ExecutionStatus,
        result: Option<serde_json::Value>,
        error: Option<String>,
        error_kind: Option<String>,
        metrics: ExecutionMetrics,
        logs: Vec<LogLine>,
    ) -> Result<()> {
        if let Err(e) = self
            .db
            .complete_execution(
                execution_id,
                status.as_str(),
                result.clone(),
                error.clone(),
                error_kind.clone(),
                &metrics,
                &logs,
            )
            .await
        {
            warn!(%execution_id, error = %e, "failed to record execution result");
        }

        if sync {
            let reply = ExecutionReply {
                execution_id,
                status,
                result,
                error,
                error_kind,
                metrics,
                logs,
            };
            self.push_reply(&reply).await;
        }

        Ok(())
    }

    /// Push the sync-mode reply; best-effort with a TTL so an abandoned
    /// caller does not leak the list.
    async fn push_reply(&self, reply: &ExecutionReply) {
        let payload = match serde_json::to_string(reply) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "unserializable reply");
                return;
            }
        };

        let mut conn = self.redis.clone();
        let key = exec_reply_key(reply.execution_id);
        let pushed: redis::RedisResult<()> = conn.lpush(&key, payload).await;
        if let Err(e) = pushed {
            warn!(execution_id = %reply.execution_id, error = %e, "reply push failed");
            return;
        }
        let expired: redis::RedisResult<()> =
            conn.expire(&key, self.reply_ttl_secs as i64).await;
        if let Err(e) = expired {
            warn!(execution_id = %reply.execution_id, error = %e, "reply expire failed");
        }
    }

    /// Remove from the queue-tracking list on pickup.
    async fn untrack_queued(&self, execution_id: Uuid) {
        let mut conn = self.redis.clone();
        let result: redis::RedisResult<i64> = conn
            .lrem(EXEC_QUEUE_KEY, 0, execution_id.to_string())
            .await;
        if let Err(e) = result {
            warn!(%execution_id, error = %e, "queue untrack failed");
        }
    }
}

/// Inline-script request: decode the carried code, no storage involved.
fn inline_request(
    message: &ExecutionQueueMessage,
    context: &ExecutionContext,
) -> Result<RunRequest> {
    let code_b64 = message.code.as_deref().unwrap_or_default();
    let code = BASE64
        .decode(code_b64)
        .map_err(|e| Error::validation(format!("invalid inline code base64: {e}")))?;
    let code = String::from_utf8(code)
        .map_err(|_| Error::validation("inline code is not valid UTF-8"))?;

    Ok(RunRequest {
        execution_id: message.execution_id,
        module_path: None,
        function_name: None,
        inline_code: Some(code),
        script_name: message.script_name.clone(),
        parameters: context.parameters.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_code_request_decodes_base64() {
        let execution_id = Uuid::new_v4();
        let code = "def main(**kwargs):\n    return kwargs\n";
        let message = ExecutionQueueMessage::for_code(
            execution_id,
            "adhoc.py".into(),
            BASE64.encode(code),
            false,
        );
        let mut context = ExecutionContext::new(execution_id, None);
        context.parameters = serde_json::json!({"x": "a"});

        let request = inline_request(&message, &context).unwrap();
        assert_eq!(request.inline_code.as_deref(), Some(code));
        assert_eq!(request.script_name.as_deref(), Some("adhoc.py"));
        assert_eq!(request.parameters["x"], "a");
        assert!(request.module_path.is_none());
    }

    #[test]
    fn malformed_inline_base64_is_a_validation_error() {
        let message = ExecutionQueueMessage::for_code(
            Uuid::new_v4(),
            "adhoc.py".into(),
            "not-base64!!".into(),
            false,
        );
        let context = ExecutionContext::new(message.execution_id, None);
        let err = inline_request(&message, &context).unwrap_err();
        assert_eq!(err.kind(), "validation_error");
    }
}
