use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::{
    broker::{Publisher, topology::NOTIFICATION_EXCHANGE},
    clients::users::UserDirectory,
    error::{DispatchError, Result},
    models::{
        job::{DEFAULT_ATTEMPTS, DEFAULT_BACKOFF_MS, JobId, JobOptions},
        notification::NotificationPayload,
        retry::Backoff,
        stats::NotificationStats,
    },
    notification::{JOB_QUEUE_NAME, PROCESS_NOTIFICATION_JOB, stats::StatsAggregator},
    queue::JobQueueEngine,
};

/// Outcome of one dispatch. Channel failures show up as `published == false`
/// or a missing `job_id`; they do not fail the call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchReceipt {
    pub routing_key: String,
    pub published: bool,
    pub job_id: Option<JobId>,
}

/// Validates the recipient, then fans a notification out to the bus and to
/// the job queue.
pub struct NotificationService {
    users: Arc<dyn UserDirectory>,
    publisher: Publisher,
    jobs: Arc<JobQueueEngine>,
    stats: StatsAggregator,
}

impl NotificationService {
    pub fn new(users: Arc<dyn UserDirectory>, publisher: Publisher, jobs: Arc<JobQueueEngine>) -> Self {
        Self {
            users,
            publisher,
            stats: StatsAggregator::new(Arc::clone(&jobs), JOB_QUEUE_NAME),
            jobs,
        }
    }

    pub async fn send_notification(&self, payload: NotificationPayload) -> Result<DispatchReceipt> {
        let recipient = self
            .users
            .get_user(&payload.recipient_id)
            .await
            .map_err(|e| {
                error!(recipient_id = %payload.recipient_id, error = %e, "Failed to look up recipient");
                e
            })?;

        if recipient.is_none() {
            warn!(recipient_id = %payload.recipient_id, "Notification recipient not found");
            return Err(DispatchError::RecipientNotFound(payload.recipient_id));
        }

        let routing_key = payload.routing_key();
        let options = JobOptions::default()
            .with_priority(payload.priority.level())
            .with_attempts(DEFAULT_ATTEMPTS)
            .with_backoff(Backoff::exponential(DEFAULT_BACKOFF_MS));

        let (published, submitted) = tokio::join!(
            self.publisher
                .publish(NOTIFICATION_EXCHANGE, &routing_key, &payload),
            self.jobs
                .submit(JOB_QUEUE_NAME, PROCESS_NOTIFICATION_JOB, &payload, options),
        );

        let published = match published {
            Ok(accepted) => accepted,
            Err(e) => {
                error!(
                    recipient_id = %payload.recipient_id,
                    routing_key = %routing_key,
                    error = %e,
                    "Notification was not published to the bus"
                );
                false
            }
        };

        let job_id = match submitted {
            Ok(job_id) => Some(job_id),
            Err(e @ DispatchError::QueueNotRegistered(_)) => return Err(e),
            Err(e) => {
                error!(
                    recipient_id = %payload.recipient_id,
                    error = %e,
                    "Notification job was not queued"
                );
                None
            }
        };

        info!(
            recipient_id = %payload.recipient_id,
            notification_type = %payload.notification_type,
            published,
            job_id = ?job_id,
            "Notification queued"
        );

        Ok(DispatchReceipt {
            routing_key,
            published,
            job_id,
        })
    }

    pub fn get_notification_stats(&self) -> Result<NotificationStats> {
        self.stats.get_stats()
    }
}
