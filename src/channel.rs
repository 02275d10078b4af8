use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

/// Outbound delivery capability for one channel kind. The dispatcher only
/// needs success/failure signaling; formatting and transport live here.
#[async_trait]
pub trait ChannelSender: Send + Sync + 'static {
    async fn send(&self, destination: &str, message: &str) -> Result<()>;
}

/// Chat delivery via an incoming-webhook URL (the destination).
pub struct WebhookSender {
    client: reqwest::Client,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    content: &'a str,
}

impl WebhookSender {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for WebhookSender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelSender for WebhookSender {
    async fn send(&self, destination: &str, message: &str) -> Result<()> {
        self.client
            .post(destination)
            .json(&ChatMessage { content: message })
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }
}

/// Email delivery through an HTTP mail API; the destination is the
/// recipient address.
pub struct MailApiSender {
    client: reqwest::Client,
    api_url: String,
}

#[derive(Serialize)]
struct MailMessage<'a> {
    to: &'a str,
    subject: &'a str,
    body: &'a str,
}

impl MailApiSender {
    pub fn new(api_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url,
        }
    }
}

#[async_trait]
impl ChannelSender for MailApiSender {
    async fn send(&self, destination: &str, message: &str) -> Result<()> {
        self.client
            .post(&self.api_url)
            .json(&MailMessage {
                to: destination,
                subject: "Court slots available",
                body: message,
            })
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }
}

/// Logs instead of delivering. Useful for dry runs.
pub struct NoopSender;

#[async_trait]
impl ChannelSender for NoopSender {
    async fn send(&self, destination: &str, message: &str) -> Result<()> {
        tracing::info!(destination, message, "noop channel send");

        Ok(())
    }
}
