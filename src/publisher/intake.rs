use std::sync::Arc;

use thiserror::Error;

use crate::metrics::PublishMetrics;
use crate::notification::{
    validate, AcceptedNotification, NotificationEnvelope, NotificationRequest, ValidationErrors,
};

use super::{NotificationPublisher, PublishError};

/// Why a submission was not accepted
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    #[error(transparent)]
    Publish(#[from] PublishError),
}

/// Accepting boundary: validate, wrap, publish.
#[derive(Clone)]
pub struct NotificationIntake {
    publisher: Arc<NotificationPublisher>,
}

impl NotificationIntake {
    pub fn new(publisher: Arc<NotificationPublisher>) -> Self {
        Self { publisher }
    }

    pub fn publisher(&self) -> &Arc<NotificationPublisher> {
        &self.publisher
    }

    /// Validate a request and queue it.
    ///
    /// Nothing is published when validation fails.
    #[tracing::instrument(
        name = "submit",
        skip(self, request),
        fields(notification_type = %request.notification_type)
    )]
    pub async fn submit(
        &self,
        request: NotificationRequest,
    ) -> Result<AcceptedNotification, SubmitError> {
        if let Err(errors) = validate(&request) {
            PublishMetrics::record_rejected();
            tracing::info!(error_count = errors.errors().len(), "Notification rejected");
            return Err(errors.into());
        }

        let envelope = NotificationEnvelope::new(request);

        match self.publisher.publish(&envelope).await {
            Ok(receipt) => {
                PublishMetrics::record_accepted(envelope.notification_type().as_str());
                tracing::info!(
                    notification_id = %envelope.id,
                    position = %receipt.position,
                    "Notification accepted"
                );
                Ok(AcceptedNotification::from(&envelope))
            }
            Err(e) => {
                tracing::error!(
                    notification_id = %envelope.id,
                    error = %e,
                    "Failed to publish notification"
                );
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::STATUS_PENDING;
    use crate::queue::MemoryQueueBackend;
    use std::time::Duration;

    fn intake() -> (Arc<MemoryQueueBackend>, NotificationIntake) {
        let backend = Arc::new(MemoryQueueBackend::new());
        let publisher =
            NotificationPublisher::new(backend.clone(), "notifications", Duration::from_secs(1));
        (backend, NotificationIntake::new(Arc::new(publisher)))
    }

    #[tokio::test]
    async fn test_submit_valid_request() {
        let (backend, intake) = intake();

        let accepted = intake
            .submit(NotificationRequest::email("Hi", "Body", "a@b.com").with_priority(5))
            .await
            .unwrap();

        assert_eq!(accepted.status, STATUS_PENDING);
        let records = backend.records("notifications").await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, accepted.notification_id.to_string());
    }

    #[tokio::test]
    async fn test_invalid_request_is_not_published() {
        let (backend, intake) = intake();
        let request = NotificationRequest::webhook("Deploy", "Done", "not-a-url", "t-1");

        let err = intake.submit(request).await.unwrap_err();

        match err {
            SubmitError::Validation(errors) => assert!(errors.has_field("endpoint")),
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(backend.is_empty("notifications").await);
    }
}
