use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Serialize;
use tokio::{task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    broker::{BrokerChannel, BrokerSupervisor, Delivery, DeliveryStream},
    error::{DispatchError, Result},
};

const DEFAULT_RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

/// Publishes JSON events through the supervised channel.
#[derive(Clone)]
pub struct Publisher {
    supervisor: Arc<BrokerSupervisor>,
}

impl Publisher {
    pub fn new(supervisor: Arc<BrokerSupervisor>) -> Self {
        Self { supervisor }
    }

    /// Serializes `payload` and publishes it as a persistent message.
    ///
    /// `Ok(true)` only means the transport accepted the write locally.
    pub async fn publish<T>(&self, exchange: &str, routing_key: &str, payload: &T) -> Result<bool>
    where
        T: Serialize + Sync + ?Sized,
    {
        let body = serde_json::to_vec(payload)?;

        let channel = self.supervisor.ensure_connected().await.map_err(|e| {
            error!(
                exchange = %exchange,
                routing_key = %routing_key,
                error = %e,
                "No broker channel available for publish"
            );
            DispatchError::publish_failed(exchange, routing_key, e)
        })?;

        let accepted = channel
            .publish(exchange, routing_key, &body)
            .await
            .map_err(|e| {
                error!(
                    exchange = %exchange,
                    routing_key = %routing_key,
                    error = %e,
                    "Failed to publish message"
                );
                DispatchError::publish_failed(exchange, routing_key, e)
            })?;

        debug!(
            exchange = %exchange,
            routing_key = %routing_key,
            accepted,
            bytes = body.len(),
            "Published message"
        );

        Ok(accepted)
    }
}

/// Callback invoked once per delivered message. An `Err` rejects the message
/// without requeue.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, delivery: &Delivery) -> anyhow::Result<()>;
}

pub struct Consumer {
    supervisor: Arc<BrokerSupervisor>,
    resubscribe_delay: Duration,
}

impl Consumer {
    pub fn new(supervisor: Arc<BrokerSupervisor>) -> Self {
        Self {
            supervisor,
            resubscribe_delay: DEFAULT_RESUBSCRIBE_DELAY,
        }
    }

    /// Pause between failed attempts to re-register after the delivery stream ended.
    pub fn with_resubscribe_delay(mut self, delay: Duration) -> Self {
        self.resubscribe_delay = delay;
        self
    }

    /// Registers `handler` on `queue` with manual acknowledgement.
    ///
    /// The first registration happens before returning so that a missing
    /// queue or an unavailable broker is reported to the caller. Afterwards
    /// the subscription re-registers itself whenever the link is replaced.
    pub async fn consume(&self, queue: &str, handler: Arc<dyn MessageHandler>) -> Result<Subscription> {
        let consumer_tag = format!("{}-{}", queue, Uuid::new_v4());
        let (channel, stream) = subscribe(&self.supervisor, queue, &consumer_tag).await?;

        let cancel = CancellationToken::new();
        let worker = ConsumerLoop {
            supervisor: Arc::clone(&self.supervisor),
            queue: queue.to_string(),
            consumer_tag: consumer_tag.clone(),
            handler,
            resubscribe_delay: self.resubscribe_delay,
            cancel: cancel.clone(),
        };

        let task = tokio::spawn(worker.run(channel, stream));

        Ok(Subscription {
            queue: queue.to_string(),
            consumer_tag,
            cancel,
            task,
        })
    }
}

/// Handle on a running consumer.
pub struct Subscription {
    queue: String,
    consumer_tag: String,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stops consuming. A message being handled is finished and settled first.
    pub async fn cancel(self) {
        self.cancel.cancel();

        if let Err(e) = self.task.await {
            warn!(queue = %self.queue, error = %e, "Consumer task ended abnormally");
        }
    }
}

async fn subscribe(
    supervisor: &BrokerSupervisor,
    queue: &str,
    consumer_tag: &str,
) -> Result<(Arc<dyn BrokerChannel>, DeliveryStream)> {
    let channel = supervisor.ensure_connected().await?;
    let stream = channel.consume(queue, consumer_tag).await?;

    info!(queue = %queue, consumer_tag = %consumer_tag, "Consuming messages");
    Ok((channel, stream))
}

struct ConsumerLoop {
    supervisor: Arc<BrokerSupervisor>,
    queue: String,
    consumer_tag: String,
    handler: Arc<dyn MessageHandler>,
    resubscribe_delay: Duration,
    cancel: CancellationToken,
}

impl ConsumerLoop {
    async fn run(self, mut channel: Arc<dyn BrokerChannel>, mut stream: DeliveryStream) {
        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => break,
                next = stream.next() => next,
            };

            match next {
                Some(Ok(delivery)) => self.settle(channel.as_ref(), &delivery).await,
                Some(Err(e)) => {
                    warn!(queue = %self.queue, error = %e, "Delivery stream failed");
                    match self.resubscribe().await {
                        Some((c, s)) => (channel, stream) = (c, s),
                        None => break,
                    }
                }
                None => {
                    info!(queue = %self.queue, "Delivery stream ended");
                    match self.resubscribe().await {
                        Some((c, s)) => (channel, stream) = (c, s),
                        None => break,
                    }
                }
            }
        }

        debug!(queue = %self.queue, consumer_tag = %self.consumer_tag, "Consumer stopped");
    }

    async fn settle(&self, channel: &dyn BrokerChannel, delivery: &Delivery) {
        match self.handler.handle(delivery).await {
            Ok(()) => {
                if let Err(e) = channel.ack(delivery.delivery_tag).await {
                    error!(
                        queue = %self.queue,
                        delivery_tag = delivery.delivery_tag,
                        error = %e,
                        "Failed to acknowledge message"
                    );
                }
            }
            Err(e) => {
                warn!(
                    queue = %self.queue,
                    delivery_tag = delivery.delivery_tag,
                    routing_key = %delivery.routing_key,
                    error = %e,
                    "Message handler failed, rejecting without requeue"
                );

                if let Err(e) = channel.reject(delivery.delivery_tag, false).await {
                    error!(
                        queue = %self.queue,
                        delivery_tag = delivery.delivery_tag,
                        error = %e,
                        "Failed to reject message"
                    );
                }
            }
        }
    }

    async fn resubscribe(&self) -> Option<(Arc<dyn BrokerChannel>, DeliveryStream)> {
        loop {
            if self.supervisor.is_shut_down() {
                return None;
            }

            let attempt = tokio::select! {
                _ = self.cancel.cancelled() => return None,
                attempt = subscribe(&self.supervisor, &self.queue, &self.consumer_tag) => attempt,
            };

            match attempt {
                Ok(subscription) => return Some(subscription),
                Err(e) => {
                    warn!(queue = %self.queue, error = %e, "Failed to resubscribe consumer");

                    tokio::select! {
                        _ = self.cancel.cancelled() => return None,
                        _ = sleep(self.resubscribe_delay) => {}
                    }
                }
            }
        }
    }
}
