//! Publish/subscribe side of notification dispatch.
//!
//! The [`BrokerSupervisor`] is the only owner of the broker link. Publishing,
//! consuming and topology declaration all ask it for a channel through
//! [`BrokerSupervisor::ensure_connected`] instead of holding the transport.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use tokio::sync::mpsc;

use crate::error::Result;

pub mod pubsub;
pub mod supervisor;
pub mod topology;

pub use pubsub::{Consumer, MessageHandler, Publisher, Subscription};
pub use supervisor::BrokerSupervisor;
pub use topology::{BindingSpec, ExchangeSpec, QueueSpec, Topology};

/// A message handed to a consumer, acknowledged by its delivery tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub routing_key: String,
    pub body: Vec<u8>,
}

pub type DeliveryStream = BoxStream<'static, Result<Delivery>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The link of the given generation was closed by the broker or the network.
    Closed { generation: u64, reason: String },
}

/// Sink through which a transport reports lifecycle events of one link.
#[derive(Debug, Clone)]
pub struct LinkEvents {
    generation: u64,
    sender: mpsc::UnboundedSender<LinkEvent>,
}

impl LinkEvents {
    pub(crate) fn new(generation: u64, sender: mpsc::UnboundedSender<LinkEvent>) -> Self {
        Self { generation, sender }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Reports an unexpected close. Never blocks the caller.
    pub fn closed(&self, reason: impl Into<String>) {
        let _ = self.sender.send(LinkEvent::Closed {
            generation: self.generation,
            reason: reason.into(),
        });
    }
}

/// Opens a connection and a channel on it.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn connect(&self, url: &str, events: LinkEvents) -> Result<Arc<dyn BrokerChannel>>;
}

/// Operations on an open broker channel.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    async fn declare_exchange(&self, exchange: &ExchangeSpec) -> Result<()>;

    async fn declare_queue(&self, queue: &QueueSpec) -> Result<()>;

    async fn bind_queue(&self, binding: &BindingSpec) -> Result<()>;

    /// Publishes a persistent JSON message. `true` means the transport buffer
    /// accepted the write, not that the broker confirmed it.
    async fn publish(&self, exchange: &str, routing_key: &str, body: &[u8]) -> Result<bool>;

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream>;

    async fn ack(&self, delivery_tag: u64) -> Result<()>;

    async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<()>;

    fn is_open(&self) -> bool;

    async fn close(&self) -> Result<()>;
}
