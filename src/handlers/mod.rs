//! Channel handlers and the registry that routes envelopes to them.
//!
//! A handler owns one [`NotificationType`]. The consumer resolves the handler
//! for each decoded envelope through [`HandlerRegistry`] and commits the queue
//! position only after the handler returns a [`DeliveryOutcome`].

mod email;
mod registry;
mod webhook;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::notification::{NotificationEnvelope, NotificationType};

pub use email::{EmailHandler, EmailMessage, MailSender, Mailbox, SendGridMailer};
pub use registry::{HandlerRegistry, NoHandler, RegistryError};
pub use webhook::{WebhookHandler, WebhookPayload};

/// Longest provider response body kept in an error
const MAX_ERROR_BODY: usize = 512;

/// Delivery failures
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The remote side answered with a non-success status
    #[error("Provider returned status {status}: {body}")]
    Provider { status: u16, body: String },

    /// The request never got a response
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    /// Shutdown interrupted the delivery
    #[error("Delivery cancelled")]
    Cancelled,
}

impl HandlerError {
    /// Build a provider error from a failed response, keeping a bounded body.
    pub async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let body = if body.chars().count() > MAX_ERROR_BODY {
            body.chars().take(MAX_ERROR_BODY).collect()
        } else {
            body
        };
        HandlerError::Provider { status, body }
    }
}

/// Why an envelope was committed without delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    MissingRecipient,
    MissingContent,
    MissingEndpoint,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::MissingRecipient => "missing_recipient",
            SkipReason::MissingContent => "missing_content",
            SkipReason::MissingEndpoint => "missing_endpoint",
        }
    }
}

/// Result of a handler run that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// The envelope cannot be delivered and should not be retried
    Skipped(SkipReason),
}

/// A delivery channel.
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    /// Name used in logs and metrics
    fn name(&self) -> &'static str;

    /// The notification type this handler delivers
    fn channel(&self) -> NotificationType;

    fn can_handle(&self, envelope: &NotificationEnvelope) -> bool {
        envelope.notification_type() == self.channel()
    }

    /// Deliver an envelope. Must return `HandlerError::Cancelled` promptly once
    /// `cancel` fires.
    async fn handle(
        &self,
        envelope: &NotificationEnvelope,
        cancel: &CancellationToken,
    ) -> Result<DeliveryOutcome, HandlerError>;
}

/// Run a delivery future unless the token fires first.
pub(crate) async fn cancellable<F, T>(cancel: &CancellationToken, fut: F) -> Result<T, HandlerError>
where
    F: std::future::Future<Output = Result<T, HandlerError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(HandlerError::Cancelled),
        result = fut => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancellable_returns_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<(), HandlerError> =
            cancellable(&cancel, std::future::pending()).await;
        assert!(matches!(result, Err(HandlerError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancellable_passes_result_through() {
        let cancel = CancellationToken::new();

        let result = cancellable(&cancel, async { Ok::<_, HandlerError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[test]
    fn test_skip_reason_labels() {
        assert_eq!(SkipReason::MissingRecipient.as_str(), "missing_recipient");
        assert_eq!(SkipReason::MissingEndpoint.as_str(), "missing_endpoint");
    }
}
