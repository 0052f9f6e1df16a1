// Bifrost API-node runtime
//
// Boots the process singletons in dependency order: database, Redis,
// object-store mirror, sync subscriber, filesystem watcher, MQ
// publisher. The HTTP surface lives outside this workspace and drives
// the services through their library APIs.

use anyhow::{Context, Result};
use bifrost_core::Settings;
use bifrost_storage::{Database, EncryptionService};
use bifrost_workspace::{
    DiscoveryService, FileIndexStore, ModuleCacheStore, PathFilter, S3Mirror, SyncBus,
    WorkspaceCache, WorkspaceSyncService, WorkspaceWatcher,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bifrost_api::services::{ConfigResolver, DispatchService, ExecutionAuthService, MqPublisher};
use bifrost_api::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bifrost_api=debug,bifrost_workspace=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("bifrost-api starting...");

    let settings = Settings::from_env().context("failed to load settings")?;

    let db = Arc::new(
        Database::from_url(&settings.database_url)
            .await
            .context("failed to connect to database")?,
    );
    db.migrate().await.context("migrations failed")?;
    tracing::info!("connected to database");

    let redis = bifrost_workspace::redis_conn::connect(&settings.redis_url)
        .await
        .context("failed to connect to redis")?;
    tracing::info!("connected to redis");

    let mirror = match &settings.s3 {
        Some(s3) => Some(S3Mirror::from_settings(s3).await),
        None => {
            tracing::info!("s3 not configured, workspace mirror disabled");
            None
        }
    };

    let encryption =
        EncryptionService::from_env().context("failed to load encryption keys")?;

    // Workspace plane
    let cache = WorkspaceCache::new(redis.clone());
    let files = FileIndexStore::new(db.as_ref().clone(), mirror.clone());
    let modules = ModuleCacheStore::new(redis.clone());
    let filter = PathFilter::new(&settings.excluded_paths);
    let discovery = DiscoveryService::new(
        db.as_ref().clone(),
        files.clone(),
        modules.clone(),
        filter.clone(),
        settings.workspace_root.clone(),
    );
    let bus = SyncBus::new(redis.clone(), settings.redis_url.clone());

    let mut sync_service = WorkspaceSyncService::new(
        bus.clone(),
        cache.clone(),
        modules.clone(),
        discovery.clone(),
        mirror.clone(),
        settings.workspace_root.clone(),
    );
    sync_service
        .start()
        .await
        .context("workspace sync failed to start")?;

    let mut watcher = WorkspaceWatcher::new(
        cache.clone(),
        bus.clone(),
        files.clone(),
        discovery.clone(),
        filter.clone(),
        settings.workspace_root.clone(),
        settings.debounce,
    );
    watcher
        .start()
        .context("workspace watcher failed to start")?;

    // Dispatch plane
    let mq = Arc::new(MqPublisher::new(settings.amqp_url.clone()));
    mq.start()
        .await
        .context("mq publisher failed to start")?;

    let _state = AppState {
        db: db.clone(),
        dispatch: Arc::new(DispatchService::new(
            db.clone(),
            redis.clone(),
            mq.clone(),
            settings.execution_ttl,
            settings.sync_reply_timeout,
        )),
        auth: Arc::new(ExecutionAuthService::new(db.clone())),
        config: Arc::new(ConfigResolver::new(
            db.clone(),
            redis.clone(),
            encryption,
            settings.config_cache_ttl,
        )),
    };

    tracing::info!("bifrost-api ready");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");

    watcher.stop().await;
    sync_service.stop().await;
    mq.stop().await;

    Ok(())
}
