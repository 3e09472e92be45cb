use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::models::retry::{Backoff, RetryPolicy};

pub type JobId = Uuid;

pub const DEFAULT_PRIORITY: u8 = 2;
pub const DEFAULT_ATTEMPTS: u32 = 3;
pub const DEFAULT_BACKOFF_MS: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Lower values are served first.
    pub priority: u8,
    pub attempts: u32,
    pub backoff: Backoff,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            priority: DEFAULT_PRIORITY,
            attempts: DEFAULT_ATTEMPTS,
            backoff: Backoff::exponential(DEFAULT_BACKOFF_MS),
        }
    }
}

impl JobOptions {
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.attempts, self.backoff)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub queue: String,
    pub name: String,
    pub data: serde_json::Value,
    pub options: JobOptions,

    /// Attempt currently being executed, starting at 1.
    #[serde(default)]
    pub attempts_made: u32,

    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(
        queue: impl Into<String>,
        name: impl Into<String>,
        data: serde_json::Value,
        options: JobOptions,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            queue: queue.into(),
            name: name.into(),
            data,
            options,
            attempts_made: 0,
            created_at: Utc::now(),
        }
    }

    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.data.clone())
    }
}
