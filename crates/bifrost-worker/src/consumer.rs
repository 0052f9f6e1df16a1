// Worker pool: one consumer task per execution slot
//
// Each slot holds its own channel with prefetch 1 and runs one job at a
// time; cross-slot parallelism is the pool size. Messages are acked
// only after the result is written, so a dead worker's job re-delivers.

use std::sync::Arc;

use bifrost_contracts::ExecutionQueueMessage;
use bifrost_core::settings::EXECUTION_QUEUE;
use bifrost_core::{Error, Result};
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{Connection, ConnectionProperties};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::executor::Executor;

pub struct WorkerPool {
    amqp_url: String,
    executor: Arc<Executor>,
    pool_size: usize,
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
    connection: Option<Connection>,
}

impl WorkerPool {
    pub fn new(amqp_url: String, executor: Arc<Executor>, pool_size: usize) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            amqp_url,
            executor,
            pool_size,
            shutdown_tx,
            handles: Vec::new(),
            connection: None,
        }
    }

    pub async fn start(&mut self) -> Result<()> {
        let connection = Connection::connect(&self.amqp_url, ConnectionProperties::default())
            .await
            .map_err(|e| Error::transient(format!("amqp connect failed: {e}")))?;

        for slot in 0..self.pool_size {
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

            channel
                .basic_qos(1, BasicQosOptions::default())
                .await
                .map_err(|e| Error::transient(format!("qos failed: {e}")))?;

            let consumer_tag = format!("bifrost-worker-{slot}");
            let mut consumer = channel
                .basic_consume(
                    EXECUTION_QUEUE,
                    &consumer_tag,
                    BasicConsumeOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| Error::transient(format!("consume failed: {e}")))?;

            let executor = self.executor.clone();
            let mut shutdown_rx = self.shutdown_tx.subscribe();

            self.handles.push(tokio::spawn(async move {
                info!(consumer_tag, "worker slot consuming");
                loop {
                    tokio::select! {
                        _ = shutdown_rx.changed() => break,
                        delivery = consumer.next() => {
                            let Some(delivery) = delivery else { break };
                            let delivery = match delivery {
                                Ok(d) => d,
                                Err(e) => {
                                    error!(consumer_tag, error = %e, "consume error");
                                    continue;
                                }
                            };

                            let message: ExecutionQueueMessage =
                                match serde_json::from_slice(&delivery.data) {
                                    Ok(m) => m,
                                    Err(e) => {
                                        // Poison message: reject without requeue.
                                        warn!(consumer_tag, error = %e, "malformed queue message");
                                        let _ = delivery
                                            .nack(BasicNackOptions {
                                                requeue: false,
                                                ..Default::default()
                                            })
                                            .await;
                                        continue;
                                    }
                                };

                            match executor.handle(&message).await {
                                Ok(()) => {
                                    if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                                        warn!(consumer_tag, error = %e, "ack failed");
                                    }
                                }
                                Err(e) => {
                                    // Result was not recorded; requeue for
                                    // a healthy worker.
                                    error!(consumer_tag, error = %e, "execution handling failed");
                                    let _ = delivery
                                        .nack(BasicNackOptions {
                                            requeue: true,
                                            ..Default::default()
                                        })
                                        .await;
                                }
                            }
                        }
                    }
                }
                info!(consumer_tag, "worker slot stopped");
            }));
        }

        self.connection = Some(connection);
        info!(pool_size = self.pool_size, "worker pool started");
        Ok(())
    }

    /// Signal shutdown and wait for in-flight jobs to finish.
    pub async fn stop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles.drain(..) {
            let _ = handle.await;
        }
        if let Some(connection) = self.connection.take() {
            let _ = connection.close(200, "shutdown").await;
        }
        info!("worker pool stopped");
    }
}
