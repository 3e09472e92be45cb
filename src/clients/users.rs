use std::{sync::Arc, time::Duration};

use anyhow::{Error, anyhow};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::{
    clients::cache::KeyValueCache,
    config::Config,
    error::{DispatchError, Result},
    models::user::User,
};

/// Resolves recipients. `Ok(None)` means the user does not exist.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_user(&self, id: &str) -> Result<Option<User>>;
}

#[derive(Deserialize)]
#[serde(untagged)]
enum UserResponse {
    Envelope { data: User },
    Bare(User),
}

impl From<UserResponse> for User {
    fn from(response: UserResponse) -> Self {
        match response {
            UserResponse::Envelope { data } => data,
            UserResponse::Bare(user) => user,
        }
    }
}

/// Looks users up at `GET {base_url}/v1/users/{id}`.
pub struct HttpUserDirectory {
    http_client: Client,
    base_url: Url,
}

impl HttpUserDirectory {
    pub fn new(config: &Config) -> std::result::Result<Self, Error> {
        Self::with_base_url(&config.user_service_url)
    }

    pub fn with_base_url(base_url: &str) -> std::result::Result<Self, Error> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|_| anyhow!("Failed to create HTTP client"))?;

        let base_url = Url::parse(base_url)
            .map_err(|e| anyhow!("Invalid user service URL {}: {}", base_url, e))?;

        if base_url.cannot_be_a_base() {
            return Err(anyhow!("User service URL {} cannot be a base", base_url));
        }

        info!(base_url = %base_url, "User directory client initialized");

        Ok(Self {
            http_client,
            base_url,
        })
    }

    /// The id is percent-encoded as a single path segment.
    fn user_url(&self, id: &str) -> Result<Url> {
        let mut url = self.base_url.clone();

        url.path_segments_mut()
            .map_err(|_| DispatchError::UserLookup(format!("cannot build user URL from {}", self.base_url)))?
            .pop_if_empty()
            .extend(["v1", "users", id]);

        Ok(url)
    }
}

#[async_trait]
impl UserDirectory for HttpUserDirectory {
    async fn get_user(&self, id: &str) -> Result<Option<User>> {
        // Dot segments would be dropped from the path, so they never name a user.
        if matches!(id, "" | "." | "..") {
            return Ok(None);
        }

        let url = self.user_url(id)?;

        debug!(user_id = %id, "Looking up user");

        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| DispatchError::UserLookup(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let body: UserResponse = response
                    .json()
                    .await
                    .map_err(|e| DispatchError::UserLookup(format!("invalid user response: {}", e)))?;

                Ok(Some(body.into()))
            }
            status => Err(DispatchError::UserLookup(format!(
                "user service returned {}",
                status
            ))),
        }
    }
}

/// Read-through cache in front of another directory.
///
/// Only found users are cached. Cache errors are logged and the inner
/// directory is used instead.
pub struct CachedUserDirectory {
    inner: Arc<dyn UserDirectory>,
    cache: Arc<dyn KeyValueCache>,
    ttl_seconds: u64,
}

impl CachedUserDirectory {
    pub fn new(inner: Arc<dyn UserDirectory>, cache: Arc<dyn KeyValueCache>, ttl_seconds: u64) -> Self {
        Self {
            inner,
            cache,
            ttl_seconds,
        }
    }

    fn cache_key(id: &str) -> String {
        format!("users:{}", id)
    }

    async fn cached(&self, key: &str) -> Option<User> {
        match self.cache.get(key).await {
            Ok(Some(value)) => match serde_json::from_str(&value) {
                Ok(user) => Some(user),
                Err(e) => {
                    warn!(key = %key, error = %e, "Discarding undecodable cached user");

                    if let Err(e) = self.cache.delete(key).await {
                        warn!(key = %key, error = %e, "User cache delete failed");
                    }
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(key = %key, error = %e, "User cache read failed");
                None
            }
        }
    }
}

#[async_trait]
impl UserDirectory for CachedUserDirectory {
    async fn get_user(&self, id: &str) -> Result<Option<User>> {
        let key = Self::cache_key(id);

        if let Some(user) = self.cached(&key).await {
            debug!(user_id = %id, "User cache hit");
            return Ok(Some(user));
        }

        let user = self.inner.get_user(id).await?;

        if let Some(user) = &user {
            let value = serde_json::to_string(user)?;

            if let Err(e) = self.cache.set(&key, &value, Some(self.ttl_seconds)).await {
                warn!(key = %key, error = %e, "User cache write failed");
            }
        }

        Ok(user)
    }
}
