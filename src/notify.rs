//! Best-effort Slack notifications.
//!
//! Messages go through an unbounded channel drained by a background task, so
//! a slow or failing webhook never holds up a toggle.

use std::time::Duration;

use reqwest::Client;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{error, info, warn};

use crate::config::SlackConfig;
use crate::error::{Error, Result};

/// Slack incoming-webhook client with a small persistent pool.
pub struct SlackClient {
    client: Client,
    webhook_urls: Vec<String>,
}

impl SlackClient {
    pub fn new(webhook_urls: Vec<String>) -> Result<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(5)
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| Error::Notify(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            webhook_urls,
        })
    }

    async fn post(&self, url: &str, message: &str) -> Result<()> {
        let body = serde_json::json!({ "text": message });
        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Notify(format!("failed to send webhook request: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Notify(format!(
                "webhook response was not successful: {} - {}",
                status, text
            )));
        }
        Ok(())
    }

    /// Send `message` to every webhook, returning the failures.
    pub async fn broadcast(&self, message: &str) -> Vec<Error> {
        let total = self.webhook_urls.len();
        let mut errors = Vec::new();
        for (n, url) in self.webhook_urls.iter().enumerate() {
            match self.post(url, message).await {
                Ok(()) => info!("sent slack message successfully ({}/{})", n + 1, total),
                Err(e) => {
                    error!("error sending slack message ({}/{}): {}", n + 1, total, e);
                    errors.push(e);
                }
            }
        }
        errors
    }
}

/// Handle for queueing notifications. Cheap to clone.
#[derive(Clone, Debug, Default)]
pub struct Notifier {
    tx: Option<UnboundedSender<String>>,
}

impl Notifier {
    /// Notifier that drops every message.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Start the delivery task when Slack is enabled with at least one webhook.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(config: &SlackConfig) -> Result<Self> {
        if !config.enabled || config.webhook_urls.is_empty() {
            return Ok(Self::disabled());
        }

        let client = SlackClient::new(config.webhook_urls.clone())?;
        let (notifier, mut rx) = Self::channel();
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                client.broadcast(&message).await;
            }
        });
        info!(webhooks = config.webhook_urls.len(), "slack notifications enabled");
        Ok(notifier)
    }

    /// Notifier paired with the receiving end of its queue.
    pub fn channel() -> (Self, UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Queue a message. Never blocks and never fails the caller.
    pub fn notify(&self, message: impl Into<String>) {
        let message = message.into();
        if message.is_empty() {
            return;
        }
        if let Some(tx) = &self.tx {
            if tx.send(message).is_err() {
                warn!("notification queue is closed, message dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_config_gives_disabled_notifier() {
        let notifier = Notifier::start(&SlackConfig {
            enabled: true,
            webhook_urls: vec![],
        })
        .unwrap();
        assert!(!notifier.is_enabled());
        notifier.notify("dropped");
    }

    #[tokio::test]
    async fn test_messages_are_queued_in_order() {
        let (notifier, mut rx) = Notifier::channel();
        notifier.notify("first");
        notifier.notify("");
        notifier.clone().notify("second");
        assert_eq!(rx.recv().await.as_deref(), Some("first"));
        assert_eq!(rx.recv().await.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_closed_queue_does_not_fail_caller() {
        let (notifier, rx) = Notifier::channel();
        drop(rx);
        notifier.notify("nobody listening");
    }

    #[tokio::test]
    async fn test_unreachable_webhook_is_reported_not_raised() {
        let client = SlackClient::new(vec!["http://127.0.0.1:9/hook".into()]).unwrap();
        let errors = client.broadcast("hello").await;
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], Error::Notify(_)));
    }
}
