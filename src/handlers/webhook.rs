//! Webhook delivery: one JSON POST per notification.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::WebhookSettings;
use crate::notification::{NotificationEnvelope, NotificationType};

use super::{cancellable, DeliveryOutcome, HandlerError, NotificationHandler, SkipReason};

/// Body posted to the caller's endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub title: String,
    pub content: String,
    pub trace_id: Option<String>,
    pub priority: i32,
}

impl From<&NotificationEnvelope> for WebhookPayload {
    fn from(envelope: &NotificationEnvelope) -> Self {
        Self {
            id: envelope.id,
            created_at: envelope.created_at,
            title: envelope.request.title.clone(),
            content: envelope.request.content.clone(),
            trace_id: envelope.request.trace_id.clone(),
            priority: envelope.request.priority,
        }
    }
}

/// Delivers WEBHOOK notifications.
pub struct WebhookHandler {
    client: reqwest::Client,
}

impl WebhookHandler {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub fn from_settings(settings: &WebhookSettings) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .build()?;
        Ok(Self::new(client))
    }

    async fn post(&self, endpoint: url::Url, payload: &WebhookPayload) -> Result<(), HandlerError> {
        let response = self.client.post(endpoint).json(payload).send().await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(HandlerError::from_response(response).await)
        }
    }
}

#[async_trait]
impl NotificationHandler for WebhookHandler {
    fn name(&self) -> &'static str {
        "webhook"
    }

    fn channel(&self) -> NotificationType {
        NotificationType::Webhook
    }

    async fn handle(
        &self,
        envelope: &NotificationEnvelope,
        cancel: &CancellationToken,
    ) -> Result<DeliveryOutcome, HandlerError> {
        let Some(endpoint) = envelope
            .request
            .endpoint
            .as_deref()
            .filter(|e| !e.trim().is_empty())
        else {
            tracing::error!(notification_id = %envelope.id, "Webhook notification has no endpoint");
            return Ok(DeliveryOutcome::Skipped(SkipReason::MissingEndpoint));
        };

        let url = url::Url::parse(endpoint).map_err(|e| HandlerError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })?;

        let payload = WebhookPayload::from(envelope);
        cancellable(cancel, self.post(url, &payload)).await?;

        tracing::info!(
            notification_id = %envelope.id,
            endpoint = %endpoint,
            "Webhook delivered"
        );
        Ok(DeliveryOutcome::Delivered)
    }
}
