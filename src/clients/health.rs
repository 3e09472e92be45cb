use std::{collections::HashMap, sync::Arc, time::Instant};

use chrono::Utc;
use tracing::{debug, warn};

use crate::{
    broker::BrokerSupervisor,
    models::health::{BrokerLinkHealth, HealthCheckResponse, HealthStatus, ServiceHealth},
    queue::JobStore,
};

pub struct HealthChecker {
    supervisor: Arc<BrokerSupervisor>,
    job_store: Arc<dyn JobStore>,
}

impl HealthChecker {
    pub fn new(supervisor: Arc<BrokerSupervisor>, job_store: Arc<dyn JobStore>) -> Self {
        Self {
            supervisor,
            job_store,
        }
    }

    pub async fn check_all(&self) -> HealthCheckResponse {
        let mut checks = HashMap::new();

        checks.insert("message_broker".to_string(), self.check_broker());
        checks.insert("job_store".to_string(), self.check_job_store().await);

        HealthCheckResponse {
            status: determine_overall_status(&checks),
            timestamp: Utc::now(),
            checks,
        }
    }

    fn check_broker(&self) -> ServiceHealth {
        let link = BrokerLinkHealth {
            connection_state: self.supervisor.state(),
            link_generation: self.supervisor.link_generation(),
            connect_attempts: self.supervisor.connect_attempts(),
        };

        debug!(
            connection_state = %link.connection_state,
            link_generation = link.link_generation,
            connect_attempts = link.connect_attempts,
            "Broker connection state checked"
        );

        ServiceHealth::broker(link)
    }

    async fn check_job_store(&self) -> ServiceHealth {
        let start = Instant::now();

        match self.job_store.ping().await {
            Ok(()) => {
                let elapsed = start.elapsed().as_millis() as u64;
                debug!(response_time_ms = elapsed, "Job store health check passed");
                ServiceHealth::healthy(elapsed)
            }
            Err(e) => {
                warn!(error = %e, "Job store ping failed");
                ServiceHealth::unhealthy(format!("Ping failed: {}", e))
            }
        }
    }
}

fn determine_overall_status(checks: &HashMap<String, ServiceHealth>) -> HealthStatus {
    if checks
        .values()
        .any(|health| health.status == HealthStatus::Unhealthy)
    {
        HealthStatus::Unhealthy
    } else if checks
        .values()
        .any(|health| health.status == HealthStatus::Degraded)
    {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}
