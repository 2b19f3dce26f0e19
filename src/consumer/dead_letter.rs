use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::publisher::{NotificationPublisher, PublishError};
use crate::queue::{PublishReceipt, QueueMessage, QueueRecord, PRIORITY_HEADER};

/// What lands on the dead-letter topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterRecord {
    pub source_topic: String,
    pub source_position: String,
    pub key: Option<String>,
    pub reason: String,
    /// Original queue payload, untouched
    pub payload: String,
    pub failed_at: DateTime<Utc>,
    pub delivery_count: u32,
}

impl DeadLetterRecord {
    pub fn new(message: &QueueMessage, reason: impl Into<String>) -> Self {
        Self {
            source_topic: message.topic.clone(),
            source_position: message.position.clone(),
            key: message.key.clone(),
            reason: reason.into(),
            payload: message.payload.clone(),
            failed_at: Utc::now().trunc_subsecs(3),
            delivery_count: message.delivery_count,
        }
    }
}

/// Publishes failed messages to the dead-letter topic
pub struct DeadLetterPublisher {
    publisher: Arc<NotificationPublisher>,
    topic: String,
}

impl DeadLetterPublisher {
    pub fn new(publisher: Arc<NotificationPublisher>, topic: impl Into<String>) -> Self {
        Self {
            publisher,
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub async fn publish(
        &self,
        message: &QueueMessage,
        reason: impl Into<String>,
    ) -> Result<PublishReceipt, PublishError> {
        let record = DeadLetterRecord::new(message, reason);
        let payload = serde_json::to_string(&record)?;
        let key = message.key.clone().unwrap_or_else(|| message.position.clone());

        let mut queued = QueueRecord::new(key, payload);
        if let Some(priority) = message.header(PRIORITY_HEADER) {
            queued = queued.with_header(PRIORITY_HEADER, priority.to_vec());
        }

        self.publisher.publish_record(&self.topic, queued).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryQueueBackend;
    use std::time::Duration;

    fn message() -> QueueMessage {
        QueueMessage {
            topic: "notifications".to_string(),
            position: "3".to_string(),
            key: Some("id-1".to_string()),
            payload: "{not json".to_string(),
            headers: vec![(PRIORITY_HEADER.to_string(), vec![2, 0, 0, 0])],
            delivery_count: 4,
        }
    }

    #[tokio::test]
    async fn test_publish_dead_letter() {
        let backend = Arc::new(MemoryQueueBackend::new());
        let publisher = Arc::new(NotificationPublisher::new(
            backend.clone(),
            "notifications",
            Duration::from_secs(1),
        ));
        let dead_letters = DeadLetterPublisher::new(publisher, "notifications.dlq");

        dead_letters.publish(&message(), "decode failed").await.unwrap();

        let records = backend.records("notifications.dlq").await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, "id-1");
        assert_eq!(records[0].headers[0].1, vec![2, 0, 0, 0]);

        let record: DeadLetterRecord = serde_json::from_str(&records[0].payload).unwrap();
        assert_eq!(record.source_topic, "notifications");
        assert_eq!(record.source_position, "3");
        assert_eq!(record.reason, "decode failed");
        assert_eq!(record.payload, "{not json");
        assert_eq!(record.delivery_count, 4);
        assert!(backend.is_empty("notifications").await);
    }

    #[test]
    fn test_wire_names() {
        let value = serde_json::to_value(DeadLetterRecord::new(&message(), "x")).unwrap();

        for field in [
            "sourceTopic",
            "sourcePosition",
            "key",
            "reason",
            "payload",
            "failedAt",
            "deliveryCount",
        ] {
            assert!(value.get(field).is_some(), "{}", field);
        }
    }
}
