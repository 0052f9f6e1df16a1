// Shared Redis connection plumbing
//
// A ConnectionManager multiplexes commands and reconnects on its own;
// pub/sub needs a dedicated connection because SUBSCRIBE takes the
// connection out of command mode.

use bifrost_core::{Error, Result};
use redis::aio::ConnectionManager;

pub async fn connect(redis_url: &str) -> Result<ConnectionManager> {
    let client = redis::Client::open(redis_url)
        .map_err(|e| Error::transient(format!("invalid redis url: {e}")))?;
    client
        .get_connection_manager()
        .await
        .map_err(|e| Error::transient(format!("redis connect failed: {e}")))
}

pub async fn pubsub(redis_url: &str) -> Result<redis::aio::PubSub> {
    let client = redis::Client::open(redis_url)
        .map_err(|e| Error::transient(format!("invalid redis url: {e}")))?;
    client
        .get_async_pubsub()
        .await
        .map_err(|e| Error::transient(format!("redis pubsub connect failed: {e}")))
}
