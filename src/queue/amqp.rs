use super::{AckPolicy, Acknowledge, Delivery, JobQueue, Subscription, Topology};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use lapin::acker::Acker;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicPublishOptions,
    BasicQosOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind};
use log::debug;
use tokio::sync::Mutex;

const REPLY_SUCCESS: u16 = 200;

/// The number of unacknowledged messages the broker may send to a consumer at once
/// Messages acknowledged on receipt are never outstanding, so they need no limit.
fn prefetch_count(ack_policy: AckPolicy) -> Option<u16> {
    match ack_policy {
        AckPolicy::OnReceipt => None,
        AckPolicy::AfterProcessing => Some(1),
    }
}

/// A job queue backed by an AMQP 0-9-1 broker such as RabbitMQ
/// The connection is opened lazily and reopened after it breaks.
pub struct AmqpQueue {
    uri: String,
    connection: Mutex<Option<(Connection, Channel)>>,
}

impl AmqpQueue {
    pub fn new(uri: String) -> Self {
        Self {
            uri,
            connection: Mutex::new(None),
        }
    }

    /// Return a channel on an open connection, connecting to the broker if necessary
    async fn channel(&self) -> Result<Channel> {
        let mut guard = self.connection.lock().await;
        if let Some((connection, channel)) = guard.as_ref() {
            if connection.status().connected() && channel.status().connected() {
                return Ok(channel.clone());
            }
        }

        debug!("Connecting to message broker");
        let connection = Connection::connect(&self.uri, ConnectionProperties::default())
            .await
            .context("Failed to connect to the message broker")?;
        let channel = connection
            .create_channel()
            .await
            .context("Failed to open a channel to the message broker")?;
        *guard = Some((connection, channel.clone()));
        Ok(channel)
    }

    /// Run an operation on the channel, discarding the connection if the operation fails
    async fn with_channel<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: FnOnce(Channel) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let channel = self.channel().await?;
        let result = operation(channel).await;
        if result.is_err() {
            self.connection.lock().await.take();
        }
        result
    }
}

#[async_trait]
impl JobQueue for AmqpQueue {
    async fn declare_exchange(&self, exchange: &str) -> Result<()> {
        self.with_channel(|channel| async move {
            channel
                .exchange_declare(
                    exchange,
                    ExchangeKind::Direct,
                    ExchangeDeclareOptions {
                        durable: false,
                        auto_delete: true,
                        ..ExchangeDeclareOptions::default()
                    },
                    FieldTable::default(),
                )
                .await
                .with_context(|| format!("Failed to declare exchange {exchange}"))
        })
        .await
    }

    async fn declare_topology(&self, topology: &Topology) -> Result<()> {
        self.declare_exchange(&topology.exchange).await?;
        self.with_channel(|channel| async move {
            channel
                .queue_declare(
                    &topology.queue,
                    QueueDeclareOptions {
                        durable: false,
                        exclusive: false,
                        auto_delete: true,
                        ..QueueDeclareOptions::default()
                    },
                    FieldTable::default(),
                )
                .await
                .with_context(|| format!("Failed to declare queue {}", topology.queue))?;
            channel
                .queue_bind(
                    &topology.queue,
                    &topology.exchange,
                    &topology.routing_key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .with_context(|| {
                    format!(
                        "Failed to bind queue {} to exchange {}",
                        topology.queue, topology.exchange
                    )
                })
        })
        .await
    }

    async fn publish(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> Result<()> {
        self.with_channel(|channel| async move {
            channel
                .basic_publish(
                    exchange,
                    routing_key,
                    BasicPublishOptions::default(),
                    payload,
                    BasicProperties::default().with_content_type("application/json".into()),
                )
                .await
                .with_context(|| format!("Failed to publish to exchange {exchange}"))?
                .await
                .with_context(|| format!("Failed to publish to exchange {exchange}"))?;
            Ok(())
        })
        .await
    }

    async fn subscribe(
        &self,
        queue: &str,
        consumer_tag: &str,
        ack_policy: AckPolicy,
    ) -> Result<Box<dyn Subscription>> {
        let channel = self.channel().await?;
        if let Some(prefetch_count) = prefetch_count(ack_policy) {
            channel
                .basic_qos(prefetch_count, BasicQosOptions::default())
                .await
                .context("Failed to set the prefetch count")?;
        }
        let consumer = channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions {
                    no_ack: ack_policy == AckPolicy::OnReceipt,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .with_context(|| format!("Failed to consume queue {queue}"))?;
        Ok(Box::new(AmqpSubscription {
            channel,
            consumer,
            consumer_tag: consumer_tag.to_owned(),
            ack_policy,
        }))
    }

    async fn close(&self) -> Result<()> {
        let Some((connection, channel)) = self.connection.lock().await.take() else {
            return Ok(());
        };
        channel
            .close(REPLY_SUCCESS, "Bye")
            .await
            .context("Failed to close channel to the message broker")?;
        connection
            .close(REPLY_SUCCESS, "Bye")
            .await
            .context("Failed to close connection to the message broker")
    }
}

struct AmqpSubscription {
    channel: Channel,
    consumer: Consumer,
    consumer_tag: String,
    ack_policy: AckPolicy,
}

#[async_trait]
impl Subscription for AmqpSubscription {
    async fn next(&mut self) -> Result<Option<Delivery>> {
        let Some(delivery) = self.consumer.next().await else {
            return Ok(None);
        };
        let delivery = delivery.context("Failed to receive message from the message broker")?;
        let pending_ack: Option<Box<dyn Acknowledge>> = match self.ack_policy {
            AckPolicy::OnReceipt => None,
            AckPolicy::AfterProcessing => Some(Box::new(AmqpAck(delivery.acker))),
        };
        Ok(Some(Delivery::new(delivery.data, pending_ack)))
    }

    async fn cancel(self: Box<Self>) -> Result<()> {
        self.channel
            .basic_cancel(&self.consumer_tag, BasicCancelOptions::default())
            .await
            .with_context(|| format!("Failed to cancel consumer {}", self.consumer_tag))
    }
}

struct AmqpAck(Acker);

#[async_trait]
impl Acknowledge for AmqpAck {
    async fn ack(self: Box<Self>) -> Result<()> {
        self.0
            .ack(BasicAckOptions::default())
            .await
            .context("Failed to acknowledge message")?;
        Ok(())
    }
}
