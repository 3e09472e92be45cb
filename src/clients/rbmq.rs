use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, Event, ExchangeKind,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
        BasicRejectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable},
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{
    broker::{
        BindingSpec, BrokerChannel, BrokerConnector, Delivery, DeliveryStream, ExchangeSpec,
        LinkEvents, QueueSpec,
    },
    config::Config,
    error::{DispatchError, Result},
};

/// Opens AMQP connections with one channel each.
pub struct RabbitMqConnector {
    prefetch_count: u16,
}

impl RabbitMqConnector {
    pub fn new(config: &Config) -> Self {
        Self {
            prefetch_count: config.rabbitmq_prefetch_count,
        }
    }
}

#[async_trait]
impl BrokerConnector for RabbitMqConnector {
    async fn connect(&self, url: &str, events: LinkEvents) -> Result<Arc<dyn BrokerChannel>> {
        let connection = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(|e| DispatchError::Transport(format!("Failed to connect to RabbitMQ: {}", e)))?;

        debug!(generation = events.generation(), "RabbitMQ connection established");

        let events_task = tokio::spawn(forward_connection_events(
            connection.events_listener(),
            events,
        ));

        let channel = match open_channel(&connection, self.prefetch_count).await {
            Ok(channel) => channel,
            Err(e) => {
                events_task.abort();
                if let Err(close_err) = connection.close(200, "Channel setup failed").await {
                    debug!(error = %close_err, "Failed to close connection after channel error");
                }
                return Err(e);
            }
        };

        debug!(prefetch_count = self.prefetch_count, "RabbitMQ channel created");

        Ok(Arc::new(RabbitMqChannel {
            connection,
            channel,
            events_task,
        }))
    }
}

async fn open_channel(connection: &Connection, prefetch_count: u16) -> Result<Channel> {
    let channel = connection
        .create_channel()
        .await
        .map_err(|e| DispatchError::Transport(format!("RabbitMQ channel creation failed: {}", e)))?;

    channel
        .basic_qos(prefetch_count, BasicQosOptions::default())
        .await
        .map_err(|e| DispatchError::Transport(format!("Failed to set up QoS: {}", e)))?;

    Ok(channel)
}

/// Relays connection events until the first error, which ends the link.
async fn forward_connection_events(
    listener: impl Stream<Item = Event> + Send + 'static,
    events: LinkEvents,
) {
    let mut listener = std::pin::pin!(listener);

    while let Some(event) = listener.next().await {
        match event {
            Event::Error(err) => {
                warn!(generation = events.generation(), error = %err, "RabbitMQ connection error");
                events.closed(err.to_string());
                return;
            }
            Event::ConnectionBlocked(reason) => {
                warn!(reason = %reason, "RabbitMQ connection blocked");
            }
            Event::ConnectionUnblocked => info!("RabbitMQ connection unblocked"),
            other => debug!(event = ?other, "RabbitMQ connection event"),
        }
    }
}

pub struct RabbitMqChannel {
    connection: Connection,
    channel: Channel,
    events_task: JoinHandle<()>,
}

#[async_trait]
impl BrokerChannel for RabbitMqChannel {
    async fn declare_exchange(&self, exchange: &ExchangeSpec) -> Result<()> {
        self.channel
            .exchange_declare(
                &exchange.name,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: exchange.durable,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        Ok(())
    }

    async fn declare_queue(&self, queue: &QueueSpec) -> Result<()> {
        let mut arguments = FieldTable::default();

        if let Some(dlx) = &queue.dead_letter_exchange {
            arguments.insert(
                "x-dead-letter-exchange".into(),
                AMQPValue::LongString(dlx.clone().into()),
            );
        }

        self.channel
            .queue_declare(
                &queue.name,
                QueueDeclareOptions {
                    durable: queue.durable,
                    ..Default::default()
                },
                arguments,
            )
            .await?;

        Ok(())
    }

    async fn bind_queue(&self, binding: &BindingSpec) -> Result<()> {
        self.channel
            .queue_bind(
                &binding.queue,
                &binding.exchange,
                &binding.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;

        Ok(())
    }

    async fn publish(&self, exchange: &str, routing_key: &str, body: &[u8]) -> Result<bool> {
        self.channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                body,
                BasicProperties::default()
                    .with_delivery_mode(2)
                    .with_content_type("application/json".into()),
            )
            .await?;

        Ok(true)
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        info!(queue = %queue, consumer_tag = %consumer_tag, "Consumer created for queue");

        Ok(consumer
            .map(|delivery| {
                delivery
                    .map(|delivery| Delivery {
                        delivery_tag: delivery.delivery_tag,
                        routing_key: delivery.routing_key.as_str().to_string(),
                        body: delivery.data,
                    })
                    .map_err(DispatchError::from)
            })
            .boxed())
    }

    async fn ack(&self, delivery_tag: u64) -> Result<()> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await?;

        Ok(())
    }

    async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<()> {
        self.channel
            .basic_reject(delivery_tag, BasicRejectOptions { requeue })
            .await?;

        Ok(())
    }

    fn is_open(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }

    async fn close(&self) -> Result<()> {
        self.events_task.abort();

        if self.channel.status().connected() {
            self.channel.close(200, "Normal shutdown").await?;
        }

        if self.connection.status().connected() {
            self.connection.close(200, "Normal shutdown").await?;
        }

        Ok(())
    }
}
