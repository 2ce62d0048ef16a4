//! Outbound chat notification (Slack-compatible incoming webhook).

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use reqwest::blocking::Client;
use serde::Serialize;
use tracing::{debug, instrument};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub attachments: Vec<ChatAttachment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatAttachment {
    pub fallback: String,
    pub pretext: String,
    pub title: String,
    pub text: String,
    pub color: String,
}

/// Destination for chat messages. A non-2xx response is an `Err`.
pub trait ChatSink: Send + Sync {
    fn post(&self, message: &ChatMessage) -> Result<()>;
}

impl<T: ChatSink + ?Sized> ChatSink for Arc<T> {
    fn post(&self, message: &ChatMessage) -> Result<()> {
        (**self).post(message)
    }
}

pub struct WebhookChat {
    http: Client,
    url: String,
}

impl WebhookChat {
    pub fn new(url: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("build chat http client")?;
        Ok(Self {
            http,
            url: url.to_string(),
        })
    }
}

impl ChatSink for WebhookChat {
    #[instrument(skip_all)]
    fn post(&self, message: &ChatMessage) -> Result<()> {
        let response = self
            .http
            .post(&self.url)
            .json(message)
            .send()
            .context("send chat message")?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("chat webhook responded {status}"));
        }
        debug!(%status, "chat message delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_matches_attachment_shape() {
        let message = ChatMessage {
            attachments: vec![ChatAttachment {
                fallback: "apply SUCCESS".to_string(),
                pretext: "master @ abc1234".to_string(),
                title: "terraform apply".to_string(),
                text: "Apply complete!".to_string(),
                color: "good".to_string(),
            }],
        };
        let value = serde_json::to_value(&message).expect("json");
        let attachment = &value["attachments"][0];
        for key in ["fallback", "pretext", "title", "text", "color"] {
            assert!(attachment.get(key).is_some(), "missing {key}");
        }
    }
}
