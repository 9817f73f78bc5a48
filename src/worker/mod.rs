mod reporter;

pub use self::reporter::{HttpReporter, Reporter};
use crate::message::{JobMessage, ResultMessage};
use crate::queue::{AckPolicy, JobQueue, Topology};
use crate::shell;
use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use std::future::Future;
use std::sync::Arc;

/// Consumes jobs from a queue, executes them, and reports their results
pub struct Worker {
    queue: Arc<dyn JobQueue>,
    topology: Topology,
    shell: String,
    ack_policy: AckPolicy,
    reporter: Arc<dyn Reporter>,
}

impl Worker {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        topology: Topology,
        shell: String,
        ack_policy: AckPolicy,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            queue,
            topology,
            shell,
            ack_policy,
            reporter,
        }
    }

    /// Process jobs one at a time until `shutdown` resolves or the broker closes the subscription
    /// Shutdown only interrupts the worker while it is waiting for a job, never while it is executing one.
    pub async fn run(self, shutdown: impl Future<Output = ()> + Send) -> Result<()> {
        let Topology {
            exchange,
            queue: queue_name,
            routing_key,
        } = &self.topology;
        self.queue
            .declare_topology(&self.topology)
            .await
            .with_context(|| {
                format!("Failed to bind queue {queue_name} to exchange {exchange} with key {routing_key}")
            })?;
        let consumer_tag = format!("{queue_name}_tag");
        let mut subscription = self
            .queue
            .subscribe(queue_name, &consumer_tag, self.ack_policy)
            .await
            .with_context(|| format!("Failed to consume from queue {queue_name}"))?;
        info!("Waiting for jobs on queue {queue_name}");

        tokio::pin!(shutdown);
        let result = loop {
            let delivery = tokio::select! {
                biased;
                () = &mut shutdown => {
                    info!("Shutting down worker");
                    break Ok(());
                }
                delivery = subscription.next() => delivery,
            };

            match delivery {
                Ok(Some(delivery)) => {
                    self.process(&delivery.body).await;
                    if let Err(err) = delivery.ack().await {
                        warn!("Failed to acknowledge job: {err:#}");
                    }
                }
                Ok(None) => {
                    warn!("Queue {queue_name} was closed by the broker");
                    break Ok(());
                }
                Err(err) => break Err(err.context(format!("Failed to receive from queue {queue_name}"))),
            }
        };

        if let Err(err) = subscription.cancel().await {
            warn!("Failed to cancel consumer {consumer_tag}: {err:#}");
        }
        if let Err(err) = self.queue.close().await {
            warn!("Failed to close broker connection: {err:#}");
        }
        result
    }

    /// Execute a single job and report its result
    async fn process(&self, body: &[u8]) {
        let job = match serde_json::from_slice::<JobMessage>(body) {
            Ok(job) => job,
            Err(err) => {
                error!(
                    "Skipping malformed job {}: {err}",
                    String::from_utf8_lossy(body)
                );
                return;
            }
        };

        debug!("Received job for {}", job.webhook);
        let output = shell::execute(&self.shell, &job.command).await;
        info!(
            "Finished job for {} with exit code {}",
            job.webhook, output.code
        );
        let result = ResultMessage {
            status: output.code,
            output: output.output,
        };
        self.reporter.report(&job.webhook, &result).await;
    }
}
