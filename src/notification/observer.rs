use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::info;

use crate::{
    broker::{Delivery, MessageHandler},
    models::notification::NotificationPayload,
};

/// Bus-side consumer of the email queue. Observes events only; delivery
/// itself happens on the job queue.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmailNotificationObserver;

#[async_trait]
impl MessageHandler for EmailNotificationObserver {
    async fn handle(&self, delivery: &Delivery) -> Result<()> {
        let payload: NotificationPayload = serde_json::from_slice(&delivery.body)
            .context("email notification event is not a valid payload")?;

        info!(
            routing_key = %delivery.routing_key,
            recipient_id = %payload.recipient_id,
            priority = ?payload.priority,
            "Processing email notification"
        );

        Ok(())
    }
}
