//! Error types for notification dispatch.
//!
//! Validation errors are surfaced to the caller of `send_notification`;
//! transport and execution errors stay in the layer that produced them and
//! are only observable through logs and job statistics.

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Connect attempts to the broker were exhausted.
    #[error("broker unavailable after {attempts} attempts: {reason}")]
    BrokerUnavailable { attempts: u32, reason: String },

    /// A channel-level broker operation failed.
    #[error("broker transport error: {0}")]
    Transport(String),

    /// Exchange, queue or binding declaration failed.
    #[error("topology declaration failed: {0}")]
    Topology(String),

    /// A job was submitted to, or counted on, a queue that was never registered.
    #[error("queue {0} is not registered")]
    QueueNotRegistered(String),

    #[error("recipient {0} not found")]
    RecipientNotFound(String),

    #[error("publish to exchange {exchange} with routing key {routing_key} failed: {reason}")]
    PublishFailed {
        exchange: String,
        routing_key: String,
        reason: String,
    },

    /// A job failed on every allowed attempt.
    #[error("job {job_id} ({job_name}) failed after {attempts} attempts: {reason}")]
    JobExecutionFailed {
        job_id: Uuid,
        job_name: String,
        attempts: u32,
        reason: String,
    },

    #[error("job store error: {0}")]
    Store(String),

    #[error("user lookup failed: {0}")]
    UserLookup(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DispatchError {
    pub fn publish_failed(
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        reason: impl ToString,
    ) -> Self {
        Self::PublishFailed {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the error must abort the process at boot.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::BrokerUnavailable { .. } | Self::Topology(_) | Self::QueueNotRegistered(_)
        )
    }
}

impl From<lapin::Error> for DispatchError {
    fn from(err: lapin::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
