use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::status::ConnectionState;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResponse {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub checks: HashMap<String, ServiceHealth>,
}

/// Snapshot of the supervised broker link.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BrokerLinkHealth {
    pub connection_state: ConnectionState,
    /// Connect sequences started so far; grows by one per reconnect.
    pub link_generation: u64,
    pub connect_attempts: u64,
}

impl BrokerLinkHealth {
    pub fn status(&self) -> HealthStatus {
        match self.connection_state {
            ConnectionState::Connected => HealthStatus::Healthy,
            ConnectionState::Connecting => HealthStatus::Degraded,
            ConnectionState::Disconnected => HealthStatus::Unhealthy,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub status: HealthStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,

    #[serde(flatten)]
    pub broker: Option<BrokerLinkHealth>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ServiceHealth {
    pub fn healthy(response_time_ms: u64) -> Self {
        Self {
            status: HealthStatus::Healthy,
            response_time_ms: Some(response_time_ms),
            broker: None,
            error: None,
        }
    }

    pub fn unhealthy(error: String) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            response_time_ms: None,
            broker: None,
            error: Some(error),
        }
    }

    pub fn broker(link: BrokerLinkHealth) -> Self {
        let status = link.status();
        let error = match status {
            HealthStatus::Healthy => None,
            HealthStatus::Degraded => Some("Reconnecting to broker".to_string()),
            HealthStatus::Unhealthy => Some("Broker link is down".to_string()),
        };

        Self {
            status,
            response_time_ms: None,
            broker: Some(link),
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_health_flattens_link_fields() {
        let health = ServiceHealth::broker(BrokerLinkHealth {
            connection_state: ConnectionState::Connecting,
            link_generation: 3,
            connect_attempts: 7,
        });

        assert_eq!(health.status, HealthStatus::Degraded);
        assert_eq!(
            serde_json::to_value(&health).unwrap(),
            serde_json::json!({
                "status": "degraded",
                "connection_state": "connecting",
                "link_generation": 3,
                "connect_attempts": 7,
                "error": "Reconnecting to broker"
            })
        );
    }

    #[test]
    fn plain_health_has_no_link_fields() {
        let value = serde_json::to_value(ServiceHealth::healthy(4)).unwrap();

        assert_eq!(
            value,
            serde_json::json!({ "status": "healthy", "response_time_ms": 4 })
        );
    }
}
