use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::config::QueueSettings;
use crate::metrics::PublishMetrics;
use crate::notification::{encode_priority_header, NotificationEnvelope};
use crate::queue::{PublishReceipt, QueueBackend, QueueBackendError, QueueRecord, PRIORITY_HEADER};

/// Errors from appending to the queue
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Failed to serialize envelope: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Queue append failed: {0}")]
    Broker(#[from] QueueBackendError),

    #[error("Queue append timed out after {0:?}")]
    Timeout(Duration),
}

impl PublishError {
    /// Metric label for this failure
    pub fn reason(&self) -> &'static str {
        match self {
            PublishError::Serialization(_) => "serialization",
            PublishError::Broker(_) => "broker",
            PublishError::Timeout(_) => "timeout",
        }
    }
}

/// Appends envelopes to the notification topic.
///
/// One append per call with no retry. Shared across request handlers.
pub struct NotificationPublisher {
    backend: Arc<dyn QueueBackend>,
    topic: String,
    timeout: Duration,
}

impl NotificationPublisher {
    pub fn new(backend: Arc<dyn QueueBackend>, topic: impl Into<String>, timeout: Duration) -> Self {
        Self {
            backend,
            topic: topic.into(),
            timeout,
        }
    }

    pub fn from_settings(backend: Arc<dyn QueueBackend>, settings: &QueueSettings) -> Self {
        Self::new(backend, settings.topic.clone(), settings.publish_timeout())
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Serialize an envelope and append it keyed by its id, with the
    /// `priority` header.
    #[tracing::instrument(
        name = "publish",
        skip(self, envelope),
        fields(notification_id = %envelope.id, topic = %self.topic)
    )]
    pub async fn publish(
        &self,
        envelope: &NotificationEnvelope,
    ) -> Result<PublishReceipt, PublishError> {
        let payload = envelope.encode().map_err(|e| {
            PublishMetrics::record_failure("serialization");
            PublishError::from(e)
        })?;

        let record = QueueRecord::new(envelope.key(), payload).with_header(
            PRIORITY_HEADER,
            encode_priority_header(envelope.request.priority),
        );

        let receipt = self.publish_record(&self.topic, record).await?;

        tracing::debug!(position = %receipt.position, "Envelope published");
        Ok(receipt)
    }

    /// Append a prepared record to any topic under the publish timeout.
    pub async fn publish_record(
        &self,
        topic: &str,
        record: QueueRecord,
    ) -> Result<PublishReceipt, PublishError> {
        let started = Instant::now();

        let result = match tokio::time::timeout(self.timeout, self.backend.append(topic, record)).await {
            Ok(Ok(receipt)) => Ok(receipt),
            Ok(Err(e)) => Err(PublishError::Broker(e)),
            Err(_) => Err(PublishError::Timeout(self.timeout)),
        };

        PublishMetrics::observe_latency(started.elapsed().as_secs_f64());
        if let Err(ref e) = result {
            PublishMetrics::record_failure(e.reason());
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::{decode_priority_header, NotificationRequest};
    use crate::queue::{MemoryQueueBackend, QueueSubscription};
    use async_trait::async_trait;

    struct StalledBackend;

    #[async_trait]
    impl QueueBackend for StalledBackend {
        fn backend_type(&self) -> &'static str {
            "stalled"
        }

        async fn append(
            &self,
            _topic: &str,
            _record: QueueRecord,
        ) -> Result<PublishReceipt, QueueBackendError> {
            std::future::pending().await
        }

        async fn subscribe(
            &self,
            _topic: &str,
            _group: &str,
            _consumer: &str,
        ) -> Result<Box<dyn QueueSubscription>, QueueBackendError> {
            Err(QueueBackendError::Closed)
        }

        async fn flush(&self) -> Result<(), QueueBackendError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_publish_writes_key_and_priority_header() {
        let backend = Arc::new(MemoryQueueBackend::new());
        let publisher =
            NotificationPublisher::new(backend.clone(), "notifications", Duration::from_secs(1));
        let envelope = NotificationEnvelope::new(
            NotificationRequest::email("Hi", "Body", "a@b.com").with_priority(5),
        );

        let receipt = publisher.publish(&envelope).await.unwrap();
        assert_eq!(receipt.topic, "notifications");

        let records = backend.records("notifications").await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, envelope.id.to_string());
        assert_eq!(records[0].headers[0].0, "priority");
        assert_eq!(decode_priority_header(&records[0].headers[0].1), Some(5));
        assert_eq!(NotificationEnvelope::decode(&records[0].payload).unwrap(), envelope);
    }

    #[tokio::test]
    async fn test_publish_times_out() {
        let publisher = NotificationPublisher::new(
            Arc::new(StalledBackend),
            "notifications",
            Duration::from_millis(20),
        );
        let envelope = NotificationEnvelope::new(NotificationRequest::email("Hi", "Body", "a@b.com"));

        let err = publisher.publish(&envelope).await.unwrap_err();
        assert!(matches!(err, PublishError::Timeout(_)));
        assert_eq!(err.reason(), "timeout");
    }

    #[tokio::test]
    async fn test_each_call_appends_once() {
        let backend = Arc::new(MemoryQueueBackend::new());
        let publisher =
            NotificationPublisher::new(backend.clone(), "notifications", Duration::from_secs(1));
        let envelope = NotificationEnvelope::new(NotificationRequest::email("Hi", "Body", "a@b.com"));

        publisher.publish(&envelope).await.unwrap();
        publisher.publish(&envelope).await.unwrap();

        assert_eq!(backend.len("notifications").await, 2);
    }
}
