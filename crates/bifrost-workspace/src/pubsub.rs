// Workspace sync bus: Redis pub/sub on `bifrost:workspace:sync`
//
// Publishes are best-effort - a missed event is recovered by the next
// full reindex - but malformed inbound payloads are rejected loudly.

use bifrost_contracts::WorkspaceEvent;
use bifrost_core::settings::WORKSPACE_SYNC_CHANNEL;
use bifrost_core::{Error, Result};
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct SyncBus {
    redis: ConnectionManager,
    redis_url: String,
}

impl SyncBus {
    pub fn new(redis: ConnectionManager, redis_url: String) -> Self {
        Self { redis, redis_url }
    }

    /// Publish a workspace event. Transient failure is returned so the
    /// watcher can log it; subscribers converge on the next reindex.
    pub async fn publish(&self, event: &WorkspaceEvent) -> Result<()> {
        let payload = serde_json::to_string(event)
            .map_err(|e| Error::validation(format!("unserializable event: {e}")))?;

        let mut conn = self.redis.clone();
        let receivers: i64 = conn
            .publish(WORKSPACE_SYNC_CHANNEL, payload)
            .await
            .map_err(|e| Error::transient(format!("workspace publish failed: {e}")))?;

        debug!(path = event.path(), receivers, "published workspace event");
        Ok(())
    }

    /// Subscribe and forward decoded events into a channel until the
    /// returned task is aborted. Invalid payloads are logged and dropped.
    pub async fn subscribe(
        &self,
        tx: mpsc::Sender<WorkspaceEvent>,
    ) -> Result<tokio::task::JoinHandle<()>> {
        let mut pubsub = crate::redis_conn::pubsub(&self.redis_url).await?;
        pubsub
            .subscribe(WORKSPACE_SYNC_CHANNEL)
            .await
            .map_err(|e| Error::transient(format!("subscribe failed: {e}")))?;

        let handle = tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(message) = stream.next().await {
                let payload: String = match message.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(error = %e, "non-text payload on workspace channel");
                        continue;
                    }
                };

                match serde_json::from_str::<WorkspaceEvent>(&payload) {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "invalid workspace sync message");
                    }
                }
            }
        });

        Ok(handle)
    }
}
