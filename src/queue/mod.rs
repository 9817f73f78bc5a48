mod amqp;
#[cfg(test)]
mod memory;

pub use self::amqp::AmqpQueue;
#[cfg(test)]
pub use self::memory::MemoryQueue;
use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

/// An exchange, a queue, and the routing key that binds them
/// Exchanges are always direct, and both exchanges and queues are non-durable and auto-deleted, so restarting the
/// broker discards the topology along with any jobs that haven't been consumed yet.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Topology {
    pub exchange: String,
    pub queue: String,
    pub routing_key: String,
}

/// When a subscription acknowledges a message
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum AckPolicy {
    /// Acknowledge messages as soon as they are received, before they are processed
    /// A consumer that dies while processing a message loses it.
    #[default]
    OnReceipt,

    /// Leave messages unacknowledged until the consumer calls `Delivery::ack`
    /// Messages that are never acknowledged are redelivered once the subscription goes away.
    AfterProcessing,
}

#[async_trait]
pub trait Acknowledge: Send {
    async fn ack(self: Box<Self>) -> Result<()>;
}

/// A message received from a subscription
pub struct Delivery {
    pub body: Vec<u8>,
    pending_ack: Option<Box<dyn Acknowledge>>,
}

impl Delivery {
    pub fn new(body: Vec<u8>, pending_ack: Option<Box<dyn Acknowledge>>) -> Self {
        Self { body, pending_ack }
    }

    /// Acknowledge the message
    /// This is a no-op for messages that were acknowledged on receipt.
    pub async fn ack(self) -> Result<()> {
        match self.pending_ack {
            Some(pending_ack) => pending_ack.ack().await,
            None => Ok(()),
        }
    }
}

#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next message
    /// Returns `None` once the subscription has been closed by the broker.
    async fn next(&mut self) -> Result<Option<Delivery>>;

    /// Stop consuming messages
    async fn cancel(self: Box<Self>) -> Result<()>;
}

/// A client of a message broker
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Declare a direct exchange
    /// Declaring an exchange that already exists is a no-op, unless the existing exchange has a different type.
    async fn declare_exchange(&self, exchange: &str) -> Result<()>;

    /// Declare an exchange and a queue and bind the queue to the exchange with the topology's routing key
    async fn declare_topology(&self, topology: &Topology) -> Result<()>;

    /// Publish a message to an exchange
    async fn publish(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> Result<()>;

    /// Start consuming messages from a queue
    async fn subscribe(
        &self,
        queue: &str,
        consumer_tag: &str,
        ack_policy: AckPolicy,
    ) -> Result<Box<dyn Subscription>>;

    /// Close the connection to the broker
    async fn close(&self) -> Result<()>;
}
