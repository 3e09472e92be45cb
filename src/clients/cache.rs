use async_trait::async_trait;

use crate::error::Result;

/// Generic string cache for short-lived values.
#[async_trait]
pub trait KeyValueCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Stores `value`, expiring after `ttl_seconds` when given.
    async fn set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;
}
