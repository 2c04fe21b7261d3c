use anyhow::{anyhow, Context, Result};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::time::Duration;

use super::Notifier;
use crate::item::NewsItem;

/// Chat-bot style text webhook (`{"msgtype":"text","text":{"content":..}}`).
/// Only HTTP 200 counts as delivered. No internal retries: the dispatcher
/// requeues failed items.
#[derive(Clone)]
pub struct WebhookNotifier {
    webhook: String,
    client: Client,
    timeout: Duration,
}

impl WebhookNotifier {
    pub fn new(webhook: String) -> Self {
        Self::with_client(Client::new(), webhook)
    }

    /// Share one connection pool across channels.
    pub fn with_client(client: Client, webhook: String) -> Self {
        Self {
            webhook,
            client,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs.max(1));
        self
    }
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, item: &NewsItem) -> Result<()> {
        let payload = TextMessage::new(item.message_text());

        let rsp = self
            .client
            .post(&self.webhook)
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await
            .context("webhook post")?;

        let status = rsp.status();
        if status != StatusCode::OK {
            let body = rsp.text().await.unwrap_or_default();
            return Err(anyhow!("webhook HTTP {status}: {}", truncate(&body, 200)));
        }
        Ok(())
    }

    fn label(&self) -> String {
        redact(&self.webhook)
    }
}

#[derive(Serialize)]
struct TextBody {
    content: String,
}

#[derive(Serialize)]
struct TextMessage {
    msgtype: &'static str,
    text: TextBody,
}

impl TextMessage {
    fn new(content: String) -> Self {
        Self {
            msgtype: "text",
            text: TextBody { content },
        }
    }
}

/// Webhook URLs usually embed an access token; logs only get the tail.
fn redact(url: &str) -> String {
    let chars: Vec<char> = url.chars().collect();
    let tail: String = chars[chars.len().saturating_sub(6)..].iter().collect();
    format!("…{tail}")
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
