use super::{ExecuteError, Executor};
use crate::config::{webhook_url, QueueConfig};
use crate::database::{Command, Database, Run};
use crate::message::JobMessage;
use crate::queue::JobQueue;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{error, info};
use reqwest::Url;
use std::sync::Arc;
use std::time::Duration;

/// Executes commands by publishing them to a queue for a worker to pick up
/// The returned run stays in progress until the worker calls its webhook.
pub struct QueueDispatcher {
    db: Arc<Database>,
    queue: Arc<dyn JobQueue>,
    exchange: String,
    routing_key: String,
    publish_timeout: Duration,
    domain: Url,
}

impl QueueDispatcher {
    pub fn new(
        db: Arc<Database>,
        queue: Arc<dyn JobQueue>,
        config: &QueueConfig,
        domain: Url,
    ) -> Self {
        Self {
            db,
            queue,
            exchange: config.exchange.clone(),
            routing_key: config.routing_key.clone(),
            publish_timeout: config.publish_timeout,
            domain,
        }
    }

    async fn publish(&self, message: &JobMessage) -> Result<()> {
        let payload = serde_json::to_vec(message).context("Failed to serialize job message")?;
        let publish = async {
            self.queue
                .declare_exchange(&self.exchange)
                .await
                .with_context(|| format!("Failed to declare exchange {}", self.exchange))?;
            self.queue
                .publish(&self.exchange, &self.routing_key, &payload)
                .await
                .with_context(|| format!("Failed to publish to exchange {}", self.exchange))
        };
        tokio::time::timeout(self.publish_timeout, publish)
            .await
            .map_err(|_| {
                anyhow!(
                    "Timed out after {:?} publishing to the queue",
                    self.publish_timeout
                )
            })?
    }
}

#[async_trait]
impl Executor for QueueDispatcher {
    async fn execute(&self, command: &Command) -> Result<Run, ExecuteError> {
        let run = self.db.insert_run(command)?;
        let message = JobMessage {
            command: run.command_run.clone(),
            webhook: webhook_url(&self.domain, &command.slug, run.id),
        };

        match self.publish(&message).await {
            Ok(()) => {
                info!("{}: dispatched run {} to the queue", command.slug, run.id);
                Ok(run)
            }
            Err(source) => {
                error!(
                    "{}: failed to dispatch run {}, it will stay in progress: {source:#}",
                    command.slug, run.id
                );
                Err(ExecuteError::BrokerUnavailable { run, source })
            }
        }
    }
}
