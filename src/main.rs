use std::sync::Arc;

use anyhow::{Error, Result, anyhow};
use notification_dispatch::{
    api::{AppState, run_api_server},
    app::{Dependencies, NotificationDispatch},
    clients::{
        rbmq::RabbitMqConnector,
        redis::{self as redis_client, RedisCache, RedisJobStore},
        users::{CachedUserDirectory, HttpUserDirectory},
    },
    config::{Config, JobStoreKind},
    notification::{JOB_QUEUE_NAME, LogEmailSender},
    queue::{JobStore, MemoryJobStore},
    utils::init_tracing,
};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = Config::load()?;
    init_tracing();

    info!("Configuration validated");

    let redis = redis_client::connect(&config).await?;

    let job_store: Arc<dyn JobStore> = match config.job_store {
        JobStoreKind::Redis => Arc::new(RedisJobStore::new(redis.clone(), &config, JOB_QUEUE_NAME)),
        JobStoreKind::Memory => Arc::new(MemoryJobStore::new()),
    };

    let users = Arc::new(CachedUserDirectory::new(
        Arc::new(HttpUserDirectory::new(&config)?),
        Arc::new(RedisCache::new(redis)),
        config.user_cache_ttl_seconds,
    ));

    let dispatch = NotificationDispatch::start(
        &config,
        Dependencies {
            connector: Arc::new(RabbitMqConnector::new(&config)),
            job_store,
            users,
            sender: Arc::new(LogEmailSender),
        },
    )
    .await?;

    let state = Arc::new(AppState {
        service: Arc::clone(&dispatch.service),
        health_checker: dispatch.health_checker(),
    });

    let served = run_api_server(config.server_port, state, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
        }
        info!("Shutdown signal received");
    })
    .await
    .map_err(|e| anyhow!("API server failed: {}", e));

    dispatch.shutdown().await;
    served
}
