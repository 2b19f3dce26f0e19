//! Email delivery through a mail provider.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::config::EmailSettings;
use crate::notification::{NotificationEnvelope, NotificationType};

use super::{cancellable, DeliveryOutcome, HandlerError, NotificationHandler, SkipReason};

const DEFAULT_SUBJECT: &str = "No Subject";

/// An address with an optional display name
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mailbox {
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Mailbox {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Single-recipient message handed to a [`MailSender`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub from: Mailbox,
    pub to: Mailbox,
    pub subject: String,
    pub plain_text: String,
    pub html: String,
}

/// Mail provider capability
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), HandlerError>;
}

/// SendGrid v3 `mail/send` client
pub struct SendGridMailer {
    client: reqwest::Client,
    api_key: String,
    url: String,
}

impl SendGridMailer {
    pub fn new(client: reqwest::Client, api_key: impl Into<String>, api_base_url: &str) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            url: format!("{}/v3/mail/send", api_base_url.trim_end_matches('/')),
        }
    }

    /// Build from settings; `None` when no API key is configured.
    pub fn from_settings(client: reqwest::Client, settings: &EmailSettings) -> Option<Self> {
        settings
            .api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .map(|key| Self::new(client, key, &settings.api_base_url))
    }

    fn body(message: &EmailMessage) -> serde_json::Value {
        json!({
            "personalizations": [{ "to": [message.to] }],
            "from": message.from,
            "subject": message.subject,
            "content": [
                { "type": "text/plain", "value": message.plain_text },
                { "type": "text/html", "value": message.html },
            ],
        })
    }
}

#[async_trait]
impl MailSender for SendGridMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), HandlerError> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&Self::body(message))
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(HandlerError::from_response(response).await)
        }
    }
}

/// Delivers EMAIL notifications.
pub struct EmailHandler {
    sender: Arc<dyn MailSender>,
    from: Mailbox,
}

impl EmailHandler {
    pub fn new(sender: Arc<dyn MailSender>, from: Mailbox) -> Self {
        Self { sender, from }
    }

    pub fn from_settings(sender: Arc<dyn MailSender>, settings: &EmailSettings) -> Self {
        Self::new(
            sender,
            Mailbox::new(settings.from_address.clone()).with_name(settings.from_name.clone()),
        )
    }

    fn build_message(&self, envelope: &NotificationEnvelope, to: &str) -> EmailMessage {
        let request = &envelope.request;
        let subject = if request.title.trim().is_empty() {
            DEFAULT_SUBJECT.to_string()
        } else {
            request.title.clone()
        };

        EmailMessage {
            from: self.from.clone(),
            to: Mailbox::new(to),
            subject,
            plain_text: request.content.clone(),
            html: request.content.clone(),
        }
    }
}

#[async_trait]
impl NotificationHandler for EmailHandler {
    fn name(&self) -> &'static str {
        "email"
    }

    fn channel(&self) -> NotificationType {
        NotificationType::Email
    }

    async fn handle(
        &self,
        envelope: &NotificationEnvelope,
        cancel: &CancellationToken,
    ) -> Result<DeliveryOutcome, HandlerError> {
        let Some(to) = envelope
            .request
            .to
            .as_deref()
            .filter(|to| !to.trim().is_empty())
        else {
            tracing::error!(notification_id = %envelope.id, "Email notification has no recipient");
            return Ok(DeliveryOutcome::Skipped(SkipReason::MissingRecipient));
        };

        if envelope.request.content.trim().is_empty() {
            tracing::error!(notification_id = %envelope.id, "Email notification has no content");
            return Ok(DeliveryOutcome::Skipped(SkipReason::MissingContent));
        }

        let message = self.build_message(envelope, to);
        cancellable(cancel, self.sender.send(&message)).await?;

        tracing::info!(notification_id = %envelope.id, "Email sent");
        Ok(DeliveryOutcome::Delivered)
    }
}
