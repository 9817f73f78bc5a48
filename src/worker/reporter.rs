use crate::message::ResultMessage;
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, warn};
use reqwest::Client;
use std::time::Duration;

/// How long to wait for a webhook before giving up on a delivery
const REPORT_TIMEOUT: Duration = Duration::from_secs(30);

/// Delivers the results of jobs to their webhooks
#[async_trait]
pub trait Reporter: Send + Sync {
    /// Deliver a result
    /// Delivery is best-effort, so failures are logged and never retried.
    async fn report(&self, webhook: &str, result: &ResultMessage);
}

/// Posts results to webhooks as JSON
pub struct HttpReporter {
    client: Client,
}

impl HttpReporter {
    pub fn new() -> Result<Self> {
        Self::with_timeout(REPORT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Reporter for HttpReporter {
    async fn report(&self, webhook: &str, result: &ResultMessage) {
        match self.client.post(webhook).json(result).send().await {
            Ok(res) => debug!("Reported result to {webhook}: {}", res.status()),
            Err(err) => warn!("Failed to report result to {webhook}: {err}"),
        }
    }
}
