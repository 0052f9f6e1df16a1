// Execution dispatch
//
// Enqueue path: pending row in Postgres, full context in Redis, minimal
// message to RabbitMQ. The MQ publish is the one step that must not fail
// silently - an execution may never be lost. Sync mode blocks on the
// reply list with a bounded timeout that does NOT cancel the execution.

use std::sync::Arc;
use std::time::Duration;

use bifrost_contracts::{ExecutionQueueMessage, ExecutionReply};
use bifrost_core::settings::{
    exec_context_key, exec_events_channel, exec_reply_key, EXECUTION_QUEUE, EXEC_QUEUE_KEY,
};
use bifrost_core::{Error, ExecutionContext, Result};
use bifrost_storage::{CreateExecution, Database};
use lapin::options::{BasicPublishOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Result of a sync-mode dispatch wait
#[derive(Debug)]
pub enum DispatchOutcome {
    Completed(ExecutionReply),
    /// Timed out waiting; the execution continues and stays retrievable.
    Pending { execution_id: Uuid },
}

/// Process-singleton RabbitMQ publisher with explicit lifecycle.
/// The connection handle is held for the publisher's whole life.
pub struct MqPublisher {
    amqp_url: String,
    link: Mutex<Option<(Connection, Channel)>>,
}

impl MqPublisher {
    pub fn new(amqp_url: String) -> Self {
        Self {
            amqp_url,
            link: Mutex::new(None),
        }
    }

    /// Connect and declare the durable work queue.
    pub async fn start(&self) -> Result<()> {
        let mut guard = self.link.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let connection = Connection::connect(&self.amqp_url, ConnectionProperties::default())
            .await
            .map_err(|e| Error::transient(format!("amqp connect failed: {e}")))?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| Error::transient(format!("amqp channel failed: {e}")))?;

        channel
            .queue_declare(
                EXECUTION_QUEUE,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| Error::transient(format!("queue declare failed: {e}")))?;

        *guard = Some((connection, channel));
        info!(queue = EXECUTION_QUEUE, "mq publisher started");
        Ok(())
    }

    pub async fn stop(&self) {
        let mut guard = self.link.lock().await;
        if let Some((connection, channel)) = guard.take() {
            let _ = channel.close(200, "shutdown").await;
            let _ = connection.close(200, "shutdown").await;
        }
        info!("mq publisher stopped");
    }

    /// Publish a persistent message and wait for broker confirmation.
    pub async fn publish(&self, message: &ExecutionQueueMessage) -> Result<()> {
        let payload = serde_json::to_vec(message)
            .map_err(|e| Error::validation(format!("unserializable queue message: {e}")))?;

        let guard = self.link.lock().await;
        let (_, channel) = guard
            .as_ref()
            .ok_or_else(|| Error::transient("mq publisher not started".to_string()))?;

        channel
            .basic_publish(
                "",
                EXECUTION_QUEUE,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default().with_delivery_mode(2),
            )
            .await
            .map_err(|e| Error::transient(format!("mq publish failed: {e}")))?
            .await
            .map_err(|e| Error::transient(format!("mq publish unconfirmed: {e}")))?;

        Ok(())
    }
}

pub struct DispatchService {
    db: Arc<Database>,
    redis: ConnectionManager,
    mq: Arc<MqPublisher>,
    execution_ttl: Duration,
    sync_reply_timeout: Duration,
}

impl DispatchService {
    pub fn new(
        db: Arc<Database>,
        redis: ConnectionManager,
        mq: Arc<MqPublisher>,
        execution_ttl: Duration,
        sync_reply_timeout: Duration,
    ) -> Self {
        Self {
            db,
            redis,
            mq,
            execution_ttl,
            sync_reply_timeout,
        }
    }

    /// Enqueue a registered workflow. Returns immediately with the
    /// execution id; pair with `wait_for_reply` for sync mode.
    pub async fn enqueue_workflow(
        &self,
        mut context: ExecutionContext,
        workflow_id: Uuid,
        parameters: serde_json::Value,
        form_id: Option<Uuid>,
        sync: bool,
        api_key_id: Option<Uuid>,
    ) -> Result<Uuid> {
        let execution_id = context.execution_id;
        context.workflow_id = Some(workflow_id);
        context.parameters = parameters.clone();
        context.form_id = form_id;
        context.caller.api_key_id = api_key_id;

        self.db
            .create_execution(CreateExecution {
                id: execution_id,
                workflow_id: Some(workflow_id),
                script_name: None,
                parameters,
                organization_id: context.organization_id,
                user_id: context.caller.user_id,
                user_name: context.caller.user_name.clone(),
                user_email: context.caller.user_email.clone(),
                form_id,
                api_key_id,
            })
            .await?;

        self.store_context(&context).await?;
        self.track_queued(execution_id).await;

        // Losing the message would orphan the pending row: bubble up.
        self.mq
            .publish(&ExecutionQueueMessage::for_workflow(
                execution_id,
                workflow_id,
                sync,
            ))
            .await?;

        info!(%execution_id, %workflow_id, sync, "enqueued workflow execution");
        Ok(execution_id)
    }

    /// Enqueue an inline script (base64 code instead of a workflow id).
    pub async fn enqueue_code(
        &self,
        mut context: ExecutionContext,
        script_name: String,
        code_b64: String,
        parameters: serde_json::Value,
        sync: bool,
    ) -> Result<Uuid> {
        let execution_id = context.execution_id;
        context.workflow_id = None;
        context.parameters = parameters.clone();

        self.db
            .create_execution(CreateExecution {
                id: execution_id,
                workflow_id: None,
                script_name: Some(script_name.clone()),
                parameters,
                organization_id: context.organization_id,
                user_id: context.caller.user_id,
                user_name: context.caller.user_name.clone(),
                user_email: context.caller.user_email.clone(),
                form_id: None,
                api_key_id: None,
            })
            .await?;

        self.store_context(&context).await?;
        self.track_queued(execution_id).await;

        self.mq
            .publish(&ExecutionQueueMessage::for_code(
                execution_id,
                script_name.clone(),
                code_b64,
                sync,
            ))
            .await?;

        info!(%execution_id, script_name, sync, "enqueued code execution");
        Ok(execution_id)
    }

    /// Sync mode: block on the reply list. A timeout means the execution
    /// is still running; the caller polls with the returned id.
    pub async fn wait_for_reply(&self, execution_id: Uuid) -> Result<DispatchOutcome> {
        let mut conn = self.redis.clone();
        let popped: Option<(String, String)> = conn
            .blpop(
                exec_reply_key(execution_id),
                self.sync_reply_timeout.as_secs_f64(),
            )
            .await
            .map_err(|e| Error::transient(format!("reply wait failed: {e}")))?;

        match popped {
            Some((_, payload)) => {
                let reply: ExecutionReply = serde_json::from_str(&payload)
                    .map_err(|e| Error::validation(format!("malformed reply payload: {e}")))?;
                Ok(DispatchOutcome::Completed(reply))
            }
            None => {
                debug!(%execution_id, "sync reply timed out; execution continues");
                Ok(DispatchOutcome::Pending { execution_id })
            }
        }
    }

    /// Cooperative cancellation flag; the worker honors it at suspension
    /// points. Does not interrupt a run mid-flight.
    pub async fn request_cancel(&self, execution_id: Uuid) -> Result<()> {
        let mut conn = self.redis.clone();
        let ttl = self.execution_ttl.as_secs();
        let _: () = conn
            .set_ex(
                bifrost_core::settings::exec_cancel_key(execution_id),
                "1",
                ttl,
            )
            .await
            .map_err(|e| Error::transient(format!("cancel flag write failed: {e}")))?;
        Ok(())
    }

    async fn store_context(&self, context: &ExecutionContext) -> Result<()> {
        let payload = serde_json::to_string(context)
            .map_err(|e| Error::validation(format!("unserializable context: {e}")))?;

        let mut conn = self.redis.clone();
        let ttl = self.execution_ttl.as_secs();
        let _: () = conn
            .set_ex(exec_context_key(context.execution_id), payload, ttl)
            .await
            .map_err(|e| Error::transient(format!("context write failed: {e}")))?;
        Ok(())
    }

    /// Add to the queue-tracking list and publish fresh positions to
    /// every queued execution's status channel. Best-effort - the queue
    /// still drains if tracking fails.
    async fn track_queued(&self, execution_id: Uuid) {
        let mut conn = self.redis.clone();

        let pushed: redis::RedisResult<()> =
            conn.rpush(EXEC_QUEUE_KEY, execution_id.to_string()).await;
        if let Err(e) = pushed {
            warn!(%execution_id, error = %e, "queue tracking push failed");
            return;
        }

        let queued: Vec<String> = match conn.lrange(EXEC_QUEUE_KEY, 0, -1).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "queue position read failed");
                return;
            }
        };

        for (position, id) in queued.iter().enumerate() {
            if let Ok(parsed) = Uuid::parse_str(id) {
                let update = serde_json::json!({
                    "event": "queue_position",
                    "execution_id": parsed,
                    "position": position + 1,
                });
                let result: redis::RedisResult<i64> = conn
                    .publish(exec_events_channel(parsed), update.to_string())
                    .await;
                if let Err(e) = result {
                    debug!(error = %e, "queue position publish failed");
                }
            }
        }
    }
}
