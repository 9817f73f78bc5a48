use crate::queue::{AckPolicy, Topology};
use serde::{
    de::{Deserializer, Error},
    Deserialize,
};
use std::time::Duration;

fn default_address() -> String {
    String::from("localhost")
}

fn default_exchange() -> String {
    String::from("asteroid")
}

fn default_routing_key() -> String {
    String::from("all")
}

fn default_queue() -> String {
    String::from("asteroid_queue")
}

fn default_publish_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_max_result_size() -> usize {
    64 * 1024 * 1024
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct QueueConfig {
    /// Dispatch commands to workers instead of executing them in the server process
    pub enabled: bool,
    pub address: String,
    pub exchange: String,
    pub routing_key: String,
    pub queue: String,
    pub publish_timeout: Duration,
    pub ack_policy: AckPolicy,
    /// Largest result body in bytes that the webhook accepts from a worker
    pub max_result_size: usize,
}

impl QueueConfig {
    /// The AMQP URI of the broker
    /// A bare host like `localhost` is expanded to `amqp://localhost`.
    pub fn uri(&self) -> String {
        if self.address.contains("://") {
            self.address.clone()
        } else {
            format!("amqp://{}", self.address)
        }
    }

    /// The exchange, queue, and binding that workers consume from
    pub fn topology(&self) -> Topology {
        Topology {
            exchange: self.exchange.clone(),
            queue: self.queue.clone(),
            routing_key: self.routing_key.clone(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_address(),
            exchange: default_exchange(),
            routing_key: default_routing_key(),
            queue: default_queue(),
            publish_timeout: default_publish_timeout(),
            ack_policy: AckPolicy::default(),
            max_result_size: default_max_result_size(),
        }
    }
}

impl<'de> Deserialize<'de> for QueueConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(deny_unknown_fields)]
        struct RawConfig {
            #[serde(default)]
            enabled: bool,
            #[serde(default = "default_address")]
            address: String,
            #[serde(default = "default_exchange")]
            exchange: String,
            #[serde(default = "default_routing_key", rename = "routingKey")]
            routing_key: String,
            #[serde(default = "default_queue")]
            queue: String,
            #[serde(
                default = "default_publish_timeout",
                rename = "publishTimeout",
                with = "humantime_serde"
            )]
            publish_timeout: Duration,
            #[serde(default, rename = "ackPolicy")]
            ack_policy: AckPolicy,
            #[serde(default = "default_max_result_size", rename = "maxResultSize")]
            max_result_size: usize,
        }

        let raw = RawConfig::deserialize(deserializer)?;
        if raw.publish_timeout.is_zero() {
            return Err(Error::custom("`publishTimeout` must be greater than zero"));
        }
        if raw.max_result_size == 0 {
            return Err(Error::custom("`maxResultSize` must be greater than zero"));
        }
        for (field, value) in [
            ("address", &raw.address),
            ("exchange", &raw.exchange),
            ("routingKey", &raw.routing_key),
            ("queue", &raw.queue),
        ] {
            if value.is_empty() {
                return Err(Error::custom(format!("`{field}` cannot be empty")));
            }
        }

        Ok(Self {
            enabled: raw.enabled,
            address: raw.address,
            exchange: raw.exchange,
            routing_key: raw.routing_key,
            queue: raw.queue,
            publish_timeout: raw.publish_timeout,
            ack_policy: raw.ack_policy,
            max_result_size: raw.max_result_size,
        })
    }
}
