// Bifrost worker runtime
//
// Bootstrap installs cached requirements, then a consumer pool pulls
// execution jobs and runs them in sandboxed interpreter subprocesses.
// SIGTERM/SIGINT finishes the current jobs before exiting.

use anyhow::{Context, Result};
use bifrost_core::Settings;
use bifrost_storage::Database;
use bifrost_worker::{Executor, PythonRuntime, WorkerPool};
use bifrost_workspace::{ModuleCacheStore, SyncBus};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bifrost_worker=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("bifrost-worker starting...");

    let settings = Settings::from_env().context("failed to load settings")?;
    let worker_id = format!("worker-{}", std::process::id());

    // Package bootstrap is log-and-continue: the worker still serves
    // executions if Redis or pip are unavailable.
    bifrost_worker::bootstrap::install_requirements_from_cache(&settings.redis_url, &worker_id)
        .await;

    let db = Arc::new(
        Database::from_url(&settings.database_url)
            .await
            .context("failed to connect to database")?,
    );
    tracing::info!("connected to database");

    let redis = bifrost_workspace::redis_conn::connect(&settings.redis_url)
        .await
        .context("failed to connect to redis")?;
    tracing::info!("connected to redis");

    let modules = ModuleCacheStore::new(redis.clone());

    // Workspace sync events invalidate the module index so the next
    // execution resolves fresh sources without a worker restart.
    let bus = SyncBus::new(redis.clone(), settings.redis_url.clone());
    let (event_tx, mut event_rx) = tokio::sync::mpsc::channel(64);
    let sync_listener = bus
        .subscribe(event_tx)
        .await
        .context("workspace subscription failed")?;
    let invalidator_modules = modules.clone();
    let invalidator = tokio::spawn(async move {
        while event_rx.recv().await.is_some() {
            invalidator_modules.invalidate().await;
        }
    });

    let runtime = Arc::new(PythonRuntime::new(modules, redis.clone()));
    let executor = Arc::new(Executor::new(
        db,
        redis,
        runtime,
        settings.execution_ttl.as_secs(),
    ));

    let mut pool = WorkerPool::new(
        settings.amqp_url.clone(),
        executor,
        settings.worker_pool_size,
    );
    pool.start()
        .await
        .context("worker pool failed to start")?;

    tracing::info!(worker_id, "bifrost-worker ready");

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("SIGINT received"),
        _ = sigterm.recv() => tracing::info!("SIGTERM received"),
    }

    // Finish in-flight jobs, then exit.
    pool.stop().await;
    sync_listener.abort();
    invalidator.abort();
    tracing::info!("bifrost-worker stopped");

    Ok(())
}
