use tracing::{error, info};

use crate::{
    broker::BrokerChannel,
    error::{DispatchError, Result},
    models::notification::NotificationType,
};

pub const NOTIFICATION_EXCHANGE: &str = "user.notifications";
pub const DEAD_LETTER_QUEUE_SUFFIX: &str = ".dead-letter";

/// A durable-or-not topic exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeSpec {
    pub name: String,
    pub durable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    pub name: String,
    pub durable: bool,
    pub dead_letter_exchange: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingSpec {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
}

/// Exchanges, queues and bindings declared after every successful connect.
///
/// Declarations are idempotent on the broker side, so re-running them on a
/// recovered link is safe and restores state the broker may have lost.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    pub exchanges: Vec<ExchangeSpec>,
    pub queues: Vec<QueueSpec>,
    pub bindings: Vec<BindingSpec>,
}

impl Topology {
    /// One durable topic exchange with a durable queue per notification type,
    /// bound under `notification.<type>`.
    ///
    /// With a dead-letter exchange, rejected messages are routed to a
    /// `<queue>.dead-letter` queue under the same routing key instead of being
    /// dropped.
    pub fn notifications(dead_letter_exchange: Option<&str>) -> Self {
        let mut topology = Self::default();

        topology.exchanges.push(ExchangeSpec {
            name: NOTIFICATION_EXCHANGE.to_string(),
            durable: true,
        });

        if let Some(dlx) = dead_letter_exchange {
            topology.exchanges.push(ExchangeSpec {
                name: dlx.to_string(),
                durable: true,
            });
        }

        for notification_type in NotificationType::ALL {
            let queue = notification_type.queue_name();
            let routing_key = notification_type.routing_key();

            topology.queues.push(QueueSpec {
                name: queue.clone(),
                durable: true,
                dead_letter_exchange: dead_letter_exchange.map(str::to_string),
            });
            topology.bindings.push(BindingSpec {
                queue: queue.clone(),
                exchange: NOTIFICATION_EXCHANGE.to_string(),
                routing_key: routing_key.clone(),
            });

            if let Some(dlx) = dead_letter_exchange {
                let dead_letter_queue = format!("{}{}", queue, DEAD_LETTER_QUEUE_SUFFIX);

                topology.queues.push(QueueSpec {
                    name: dead_letter_queue.clone(),
                    durable: true,
                    dead_letter_exchange: None,
                });
                topology.bindings.push(BindingSpec {
                    queue: dead_letter_queue,
                    exchange: dlx.to_string(),
                    routing_key,
                });
            }
        }

        topology
    }

    pub async fn declare(&self, channel: &dyn BrokerChannel) -> Result<()> {
        for exchange in &self.exchanges {
            info!(exchange = %exchange.name, "Asserting topic exchange");
            channel
                .declare_exchange(exchange)
                .await
                .map_err(|e| topology_error(format!("exchange {}", exchange.name), e))?;
        }

        for queue in &self.queues {
            info!(queue = %queue.name, "Asserting queue");
            channel
                .declare_queue(queue)
                .await
                .map_err(|e| topology_error(format!("queue {}", queue.name), e))?;
        }

        for binding in &self.bindings {
            info!(
                queue = %binding.queue,
                exchange = %binding.exchange,
                routing_key = %binding.routing_key,
                "Binding queue to exchange"
            );
            channel.bind_queue(binding).await.map_err(|e| {
                topology_error(
                    format!("binding {} -> {}", binding.exchange, binding.queue),
                    e,
                )
            })?;
        }

        info!("Broker topology declared");
        Ok(())
    }
}

fn topology_error(object: String, err: DispatchError) -> DispatchError {
    error!(object = %object, error = %err, "Failed to declare broker topology");
    DispatchError::Topology(format!("{}: {}", object, err))
}
