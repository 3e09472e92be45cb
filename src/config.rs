use std::time::Duration;

use anyhow::{Error, Result, anyhow, bail};
use dotenvy::dotenv;
use serde::Deserialize;

use crate::models::retry::{Backoff, RetryPolicy};

#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStoreKind {
    Redis,
    Memory,
}

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    #[serde(default)]
    pub rabbitmq_url: String,
    #[serde(default = "default_prefetch_count")]
    pub rabbitmq_prefetch_count: u16,
    #[serde(default)]
    pub dead_letter_exchange: Option<String>,

    #[serde(default = "default_connect_max_retries")]
    pub connect_max_retries: u32,
    #[serde(default = "default_connect_retry_delay_ms")]
    pub connect_retry_delay_ms: u64,
    #[serde(default = "default_reconnect_max_retries")]
    pub reconnect_max_retries: u32,
    #[serde(default = "default_reconnect_retry_delay_ms")]
    pub reconnect_retry_delay_ms: u64,

    #[serde(default = "default_redis_host")]
    pub redis_host: String,
    #[serde(default = "default_redis_port")]
    pub redis_port: u16,

    #[serde(default = "default_job_store")]
    pub job_store: JobStoreKind,
    #[serde(default = "default_job_key_prefix")]
    pub job_key_prefix: String,
    #[serde(default = "default_job_retention_seconds")]
    pub job_retention_seconds: u64,
    #[serde(default = "default_job_poll_interval_ms")]
    pub job_poll_interval_ms: u64,
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    #[serde(default = "default_user_service_url")]
    pub user_service_url: String,
    #[serde(default = "default_user_cache_ttl_seconds")]
    pub user_cache_ttl_seconds: u64,

    #[serde(default = "default_server_port")]
    pub server_port: u16,
}

fn default_prefetch_count() -> u16 {
    10
}

fn default_connect_max_retries() -> u32 {
    5
}

fn default_connect_retry_delay_ms() -> u64 {
    5000
}

fn default_reconnect_max_retries() -> u32 {
    10
}

fn default_reconnect_retry_delay_ms() -> u64 {
    3000
}

fn default_redis_host() -> String {
    "redis".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

fn default_job_store() -> JobStoreKind {
    JobStoreKind::Redis
}

fn default_job_key_prefix() -> String {
    "notification-dispatch:jobs".to_string()
}

fn default_job_retention_seconds() -> u64 {
    86400
}

fn default_job_poll_interval_ms() -> u64 {
    1000
}

fn default_worker_concurrency() -> usize {
    4
}

fn default_user_service_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_user_cache_ttl_seconds() -> u64 {
    60
}

fn default_server_port() -> u16 {
    3000
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        Self::from_iter(std::env::vars())
    }

    /// Builds and validates a configuration from `KEY=value` pairs.
    pub fn from_iter<I>(vars: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config = envy::from_iter::<_, Self>(vars)
            .map_err(|e| anyhow!("Invalid or missing environmental variable: {}", e))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.rabbitmq_url.trim().is_empty() {
            bail!("RABBITMQ_URL is not defined in configuration");
        }

        if self.worker_concurrency == 0 {
            bail!("WORKER_CONCURRENCY must be greater than zero");
        }

        Ok(())
    }

    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}", self.redis_host, self.redis_port)
    }

    /// Budget for the initial boot connection.
    pub fn connect_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.connect_max_retries,
            Backoff::fixed(self.connect_retry_delay_ms),
        )
    }

    /// Budget for reconnecting a link that degraded while running.
    pub fn reconnect_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.reconnect_max_retries,
            Backoff::fixed(self.reconnect_retry_delay_ms),
        )
    }

    pub fn job_poll_interval(&self) -> Duration {
        Duration::from_millis(self.job_poll_interval_ms)
    }
}
