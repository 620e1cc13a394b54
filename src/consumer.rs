//! NATS message consumer for scoring and reload requests

use anyhow::{Context, Result};
use async_nats::{Client, Subject, Subscriber};
use serde::Serialize;
use tracing::{info, warn};

/// Consumer for receiving requests from NATS
pub struct RequestConsumer {
    client: Client,
    request_subject: String,
    reload_subject: String,
}

impl RequestConsumer {
    /// Create a new request consumer
    pub fn new(client: Client, request_subject: &str, reload_subject: &str) -> Self {
        Self {
            client,
            request_subject: request_subject.to_string(),
            reload_subject: reload_subject.to_string(),
        }
    }

    /// Subscribe to the scoring request subject
    pub async fn subscribe_requests(&self) -> Result<Subscriber> {
        let subscriber = self
            .client
            .subscribe(self.request_subject.clone())
            .await
            .with_context(|| format!("Failed to subscribe to {}", self.request_subject))?;
        info!(subject = %self.request_subject, "Subscribed to scoring request subject");
        Ok(subscriber)
    }

    /// Subscribe to the store reload subject
    pub async fn subscribe_reloads(&self) -> Result<Subscriber> {
        let subscriber = self
            .client
            .subscribe(self.reload_subject.clone())
            .await
            .with_context(|| format!("Failed to subscribe to {}", self.reload_subject))?;
        info!(subject = %self.reload_subject, "Subscribed to reload subject");
        Ok(subscriber)
    }

    /// Get the request subject name
    pub fn subject(&self) -> &str {
        &self.request_subject
    }
}

/// Publish `body` as JSON to the reply subject of a request, if it has one
pub async fn respond<T: Serialize>(client: &Client, reply: Option<Subject>, body: &T) -> Result<()> {
    let Some(reply) = reply else {
        warn!("Request has no reply subject, dropping response");
        return Ok(());
    };

    let payload = serde_json::to_vec(body).context("Failed to serialize reply")?;
    client
        .publish(reply, payload.into())
        .await
        .context("Failed to publish reply")?;
    Ok(())
}
