use anyhow::{Error, anyhow};
use async_trait::async_trait;
use redis::{AsyncCommands, Client, RedisError, Script, aio::ConnectionManager};
use tracing::{debug, info, warn};

use crate::{
    clients::cache::KeyValueCache,
    config::Config,
    error::{DispatchError, Result},
    models::job::Job,
    queue::JobStore,
};

pub async fn connect(config: &Config) -> std::result::Result<ConnectionManager, Error> {
    info!("Connecting to Redis...");

    let client = Client::open(config.redis_url().as_str())
        .map_err(|e| anyhow!("Failed to create redis client: {}", e))?;

    let connection = ConnectionManager::new(client)
        .await
        .map_err(|e| anyhow!("Failed to connect to redis client: {}", e))?;

    info!("Redis connection established");
    Ok(connection)
}

fn store_error(err: RedisError) -> DispatchError {
    DispatchError::Store(err.to_string())
}

fn cache_error(err: RedisError) -> DispatchError {
    DispatchError::Cache(err.to_string())
}

/// Moves the best waiting id into the active hash, keeping its score.
const POP_SCRIPT: &str = r"
local popped = redis.call('ZPOPMIN', KEYS[1])
if #popped == 0 then
    return false
end
redis.call('HSET', KEYS[2], popped[1], popped[2])
return popped[1]
";

/// Puts every active id back into the waiting set under its original score.
const REQUEUE_SCRIPT: &str = r"
local active = redis.call('HGETALL', KEYS[2])
for i = 1, #active, 2 do
    redis.call('ZADD', KEYS[1], active[i + 1], active[i])
end
redis.call('DEL', KEYS[2])
return #active / 2
";

/// Job store on a Redis sorted set.
///
/// Members are job ids scored `priority * 1e13 + sequence`, where the sequence
/// comes from `INCR`, so `ZPOPMIN` yields the best priority and FIFO within it.
/// A popped id moves to an `active` hash and its body is kept until the job
/// finishes, so jobs interrupted by a restart are requeued on registration.
/// Job bodies live under their own key with a retention TTL.
#[derive(Clone)]
pub struct RedisJobStore {
    connection: ConnectionManager,
    key_prefix: String,
    retention_seconds: u64,
    pop_script: Script,
    requeue_script: Script,
}

const PRIORITY_WEIGHT: f64 = 1e13;

impl RedisJobStore {
    pub fn new(connection: ConnectionManager, config: &Config, queue: &str) -> Self {
        Self {
            connection,
            key_prefix: format!("{}:{}", config.job_key_prefix, queue),
            retention_seconds: config.job_retention_seconds,
            pop_script: Script::new(POP_SCRIPT),
            requeue_script: Script::new(REQUEUE_SCRIPT),
        }
    }

    fn waiting_key(&self) -> String {
        format!("{}:waiting", self.key_prefix)
    }

    fn active_key(&self) -> String {
        format!("{}:active", self.key_prefix)
    }

    fn sequence_key(&self) -> String {
        format!("{}:sequence", self.key_prefix)
    }

    pub fn job_key(&self, id: &str) -> String {
        format!("{}:job:{}", self.key_prefix, id)
    }

    async fn forget(&self, conn: &mut ConnectionManager, id: &str) -> Result<()> {
        redis::pipe()
            .atomic()
            .hdel(self.active_key(), id)
            .ignore()
            .del(self.job_key(id))
            .ignore()
            .query_async::<()>(conn)
            .await
            .map_err(store_error)
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn push(&self, job: &Job) -> Result<()> {
        let mut conn = self.connection.clone();
        let body = serde_json::to_string(job)?;
        let id = job.id.to_string();

        let sequence: u64 = conn.incr(self.sequence_key(), 1).await.map_err(store_error)?;
        let score = f64::from(job.options.priority) * PRIORITY_WEIGHT + sequence as f64;

        let _: () = conn
            .set_ex(self.job_key(&id), body, self.retention_seconds)
            .await
            .map_err(store_error)?;
        let _: () = conn
            .zadd(self.waiting_key(), &id, score)
            .await
            .map_err(store_error)?;

        debug!(job_id = %id, score, "Stored job in redis");
        Ok(())
    }

    async fn pop(&self) -> Result<Option<Job>> {
        let mut conn = self.connection.clone();

        loop {
            let popped: Option<String> = self
                .pop_script
                .key(self.waiting_key())
                .key(self.active_key())
                .invoke_async(&mut conn)
                .await
                .map_err(store_error)?;

            let Some(id) = popped else {
                return Ok(None);
            };

            let body: Option<String> = conn.get(self.job_key(&id)).await.map_err(store_error)?;

            match body.map(|body| serde_json::from_str::<Job>(&body)) {
                Some(Ok(job)) => return Ok(Some(job)),
                Some(Err(e)) => warn!(job_id = %id, error = %e, "Dropping undecodable job"),
                None => warn!(job_id = %id, "Skipping job whose body expired"),
            }

            self.forget(&mut conn, &id).await?;
        }
    }

    async fn complete(&self, job: &Job) -> Result<()> {
        let mut conn = self.connection.clone();
        self.forget(&mut conn, &job.id.to_string()).await
    }

    async fn requeue_active(&self) -> Result<u64> {
        let mut conn = self.connection.clone();

        let requeued: u64 = self
            .requeue_script
            .key(self.waiting_key())
            .key(self.active_key())
            .invoke_async(&mut conn)
            .await
            .map_err(store_error)?;

        if requeued > 0 {
            info!(requeued, "Requeued active jobs in redis");
        }
        Ok(requeued)
    }

    async fn len(&self) -> Result<u64> {
        let mut conn = self.connection.clone();
        conn.zcard(self.waiting_key()).await.map_err(store_error)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: String = conn.ping().await.map_err(store_error)?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct RedisCache {
    connection: ConnectionManager,
}

impl RedisCache {
    pub fn new(connection: ConnectionManager) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl KeyValueCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection.clone();
        conn.get(key).await.map_err(cache_error)
    }

    async fn set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> Result<()> {
        let mut conn = self.connection.clone();

        let result = match ttl_seconds {
            Some(ttl) => conn.set_ex::<_, _, ()>(key, value, ttl).await,
            None => conn.set::<_, _, ()>(key, value).await,
        };

        result.map_err(cache_error)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(key).await.map_err(cache_error)
    }
}
