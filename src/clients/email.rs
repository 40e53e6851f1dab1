//! Outbound email delivery.
//!
//! The dispatcher and the login flow talk to an `EmailSender` trait so tests
//! can swap the transport. The production implementation posts the message
//! as JSON to an HTTP email API.

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde_json::json;

/// Email delivery failures.
#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    #[error("email request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("email API rejected the message with status {status}")]
    Rejected { status: u16 },
}

#[derive(Debug, Clone)]
pub struct EmailAttachment {
    pub filename: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
    pub attachments: Vec<EmailAttachment>,
}

/// Sends emails. Implementations must report success only when the message
/// was actually accepted for delivery: callers use the result to decide
/// whether an idempotency marker may be set.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), EmailError>;
}

/// HTTP email API client.
pub struct HttpEmailSender {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    from: String,
}

impl HttpEmailSender {
    pub fn new(api_url: &str, api_key: &str, from: &str) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            api_url: api_url.to_string(),
            api_key: api_key.to_string(),
            from: from.to_string(),
        })
    }
}

#[async_trait]
impl EmailSender for HttpEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<(), EmailError> {
        let attachments: Vec<_> = message
            .attachments
            .iter()
            .map(|attachment| {
                json!({
                    "filename": attachment.filename,
                    "content_type": attachment.content_type,
                    "content": STANDARD.encode(&attachment.content),
                })
            })
            .collect();

        let payload = json!({
            "from": self.from,
            "to": message.to,
            "subject": message.subject,
            "html": message.html,
            "text": message.text,
            "attachments": attachments,
        });

        let response = self
            .http
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(EmailError::Rejected {
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}
