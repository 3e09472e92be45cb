mod common;

use anyhow::Result;
use common::test_config;
use notification_dispatch::{
    clients::{
        cache::KeyValueCache,
        redis::{self as redis_client, RedisCache, RedisJobStore},
    },
    config::Config,
    models::job::{Job, JobOptions},
    queue::JobStore,
};
use redis::{AsyncCommands, aio::ConnectionManager};
use std::time::Duration;
use testcontainers::{
    ContainerAsync, GenericImage,
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
};

const QUEUE: &str = "user-notifications";

struct TestRedis {
    _container: ContainerAsync<GenericImage>,
    config: Config,
    connection: ConnectionManager,
}

async fn start_redis(overrides: &[(&str, &str)]) -> Result<TestRedis> {
    let container = GenericImage::new("redis", "7-alpine")
        .with_exposed_port(6379.tcp())
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"))
        .start()
        .await?;

    let port = container.get_host_port_ipv4(6379.tcp()).await?.to_string();

    let mut vars = vec![("REDIS_HOST", "127.0.0.1"), ("REDIS_PORT", port.as_str())];
    vars.extend_from_slice(overrides);

    let config = test_config(&vars);
    let connection = redis_client::connect(&config).await?;

    Ok(TestRedis {
        _container: container,
        config,
        connection,
    })
}

fn job(name: &str, priority: u8) -> Job {
    Job::new(
        QUEUE,
        name,
        serde_json::json!({ "recipientId": name }),
        JobOptions::default().with_priority(priority),
    )
}

async fn drain(store: &RedisJobStore) -> Result<Vec<String>> {
    let mut names = Vec::new();
    while let Some(job) = store.pop().await? {
        names.push(job.name);
    }
    Ok(names)
}

/// Test: Jobs pop by priority, FIFO within a priority
#[tokio::test]
async fn test_redis_store_pops_by_priority_then_fifo() -> Result<()> {
    let redis = start_redis(&[]).await?;
    let store = RedisJobStore::new(redis.connection.clone(), &redis.config, QUEUE);

    for (name, priority) in [("low-1", 3), ("high-1", 1), ("medium-1", 2), ("high-2", 1), ("low-2", 3)] {
        store.push(&job(name, priority)).await?;
    }
    assert_eq!(store.len().await?, 5);

    assert_eq!(
        drain(&store).await?,
        vec!["high-1", "high-2", "medium-1", "low-1", "low-2"]
    );
    assert_eq!(store.len().await?, 0);

    Ok(())
}

/// Test: A job whose body expired is skipped and the next one is served
#[tokio::test]
async fn test_redis_store_skips_expired_body() -> Result<()> {
    let redis = start_redis(&[]).await?;

    let mut short_config = redis.config.clone();
    short_config.job_retention_seconds = 1;

    let short_lived = RedisJobStore::new(redis.connection.clone(), &short_config, QUEUE);
    let store = RedisJobStore::new(redis.connection.clone(), &redis.config, QUEUE);

    short_lived.push(&job("expiring", 1)).await?;
    store.push(&job("kept", 3)).await?;

    tokio::time::sleep(Duration::from_millis(2100)).await;

    let popped = store.pop().await?.map(|job| job.name);
    assert_eq!(popped.as_deref(), Some("kept"));
    assert!(store.pop().await?.is_none());

    Ok(())
}

/// Test: Jobs popped but never finished are requeued in their original order
#[tokio::test]
async fn test_redis_store_requeues_interrupted_jobs() -> Result<()> {
    let redis = start_redis(&[]).await?;
    let store = RedisJobStore::new(redis.connection.clone(), &redis.config, QUEUE);

    let first = job("first", 2);
    store.push(&first).await?;
    store.push(&job("second", 2)).await?;
    store.push(&job("urgent", 1)).await?;

    // Two jobs in flight when the process stops.
    assert_eq!(store.pop().await?.map(|j| j.name).as_deref(), Some("urgent"));
    assert_eq!(store.pop().await?.map(|j| j.id), Some(first.id));
    assert_eq!(store.len().await?, 1);

    let restarted = RedisJobStore::new(redis.connection.clone(), &redis.config, QUEUE);
    assert_eq!(restarted.requeue_active().await?, 2);
    assert_eq!(restarted.requeue_active().await?, 0, "Nothing left active");
    assert_eq!(restarted.len().await?, 3);

    assert_eq!(drain(&restarted).await?, vec!["urgent", "first", "second"]);

    Ok(())
}

/// Test: Completing a job removes it and its body for good
#[tokio::test]
async fn test_redis_store_complete_forgets_job() -> Result<()> {
    let redis = start_redis(&[]).await?;
    let store = RedisJobStore::new(redis.connection.clone(), &redis.config, QUEUE);

    let submitted = job("done", 2);
    store.push(&submitted).await?;

    let popped = store.pop().await?.expect("job should be waiting");
    assert_eq!(popped.id, submitted.id);

    let mut conn = redis.connection.clone();
    let body_key = store.job_key(&submitted.id.to_string());
    assert!(conn.exists::<_, bool>(&body_key).await?, "Body kept while active");

    store.complete(&popped).await?;

    assert!(!conn.exists::<_, bool>(&body_key).await?);
    assert_eq!(store.requeue_active().await?, 0);
    assert!(store.pop().await?.is_none());

    Ok(())
}

/// Test: Job bodies carry the configured retention TTL
#[tokio::test]
async fn test_redis_store_writes_retention_ttl() -> Result<()> {
    let redis = start_redis(&[("JOB_RETENTION_SECONDS", "600")]).await?;
    let store = RedisJobStore::new(redis.connection.clone(), &redis.config, QUEUE);

    let submitted = job("ttl", 2);
    store.push(&submitted).await?;

    let mut conn = redis.connection.clone();
    let ttl: i64 = conn.ttl(store.job_key(&submitted.id.to_string())).await?;
    assert!(ttl > 0 && ttl <= 600, "Unexpected TTL {}", ttl);

    Ok(())
}

/// Test: The cache stores values with and without TTL and deletes them
#[tokio::test]
async fn test_redis_cache_set_get_delete() -> Result<()> {
    let redis = start_redis(&[]).await?;
    let cache = RedisCache::new(redis.connection.clone());
    let mut conn = redis.connection.clone();

    cache.set("users:user-1", r#"{"id":"user-1"}"#, Some(60)).await?;
    cache.set("users:user-2", r#"{"id":"user-2"}"#, None).await?;

    assert_eq!(
        cache.get("users:user-1").await?.as_deref(),
        Some(r#"{"id":"user-1"}"#)
    );

    let ttl: i64 = conn.ttl("users:user-1").await?;
    assert!(ttl > 0 && ttl <= 60, "Unexpected TTL {}", ttl);

    let ttl: i64 = conn.ttl("users:user-2").await?;
    assert_eq!(ttl, -1, "No TTL requested");

    cache.delete("users:user-1").await?;
    assert!(cache.get("users:user-1").await?.is_none());
    assert!(cache.get("users:missing").await?.is_none());

    Ok(())
}
