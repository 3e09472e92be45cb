use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{error, info};

use crate::{
    error::Result as DispatchResult,
    models::{
        job::Job,
        notification::{NotificationPayload, NotificationType},
    },
    notification::{JOB_QUEUE_NAME, PROCESS_NOTIFICATION_JOB},
    queue::JobQueueEngine,
};

/// Performs the actual delivery of a notification.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send_email(&self, payload: &NotificationPayload) -> Result<()>;
}

/// Sender that only logs what it would deliver.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEmailSender;

#[async_trait]
impl NotificationSender for LogEmailSender {
    async fn send_email(&self, payload: &NotificationPayload) -> Result<()> {
        info!(
            recipient_id = %payload.recipient_id,
            message = %payload.message,
            "[MOCK] Sending email"
        );
        Ok(())
    }
}

/// Handler of `process-notification` jobs.
pub struct NotificationProcessor {
    sender: Arc<dyn NotificationSender>,
}

impl NotificationProcessor {
    pub fn new(sender: Arc<dyn NotificationSender>) -> Self {
        Self { sender }
    }

    pub async fn process(&self, job: Job) -> Result<()> {
        let payload: NotificationPayload = job
            .payload()
            .with_context(|| format!("job {} carries an invalid notification payload", job.id))?;

        info!(
            job_id = %job.id,
            attempt = job.attempts_made,
            recipient_id = %payload.recipient_id,
            notification_type = %payload.notification_type,
            "Processing notification job"
        );

        let result = match payload.notification_type {
            NotificationType::Email => self.sender.send_email(&payload).await,
        };

        match &result {
            Ok(()) => info!(job_id = %job.id, "Successfully processed notification job"),
            Err(e) => error!(job_id = %job.id, error = %e, "Error processing notification job"),
        }

        result
    }

    /// Installs this processor as the `process-notification` handler.
    pub fn register(self: Arc<Self>, engine: &JobQueueEngine) -> DispatchResult<()> {
        engine.register_handler(JOB_QUEUE_NAME, PROCESS_NOTIFICATION_JOB, move |job| {
            let processor = Arc::clone(&self);
            async move { processor.process(job).await }
        })
    }
}
