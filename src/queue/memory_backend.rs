//! In-memory queue backend.
//!
//! Each topic is a single ordered log with a committed offset per consumer
//! group. Records are lost on restart; this backend serves tests and local
//! development.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Notify, RwLock};

use super::backend::{
    PublishReceipt, QueueBackend, QueueBackendError, QueueMessage, QueueRecord, QueueSubscription,
};

#[derive(Default)]
struct TopicLog {
    entries: RwLock<Vec<QueueRecord>>,
    /// Next offset to read for each group
    committed: DashMap<String, u64>,
    /// Delivery counts keyed by (group, offset)
    deliveries: DashMap<(String, u64), u32>,
    appended: Notify,
}

/// In-memory queue backend.
#[derive(Default)]
pub struct MemoryQueueBackend {
    topics: DashMap<String, Arc<TopicLog>>,
}

impl MemoryQueueBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn topic(&self, topic: &str) -> Arc<TopicLog> {
        self.topics
            .entry(topic.to_string())
            .or_default()
            .clone()
    }

    /// Number of records appended to a topic
    pub async fn len(&self, topic: &str) -> usize {
        match self.topics.get(topic).map(|t| t.clone()) {
            Some(log) => log.entries.read().await.len(),
            None => 0,
        }
    }

    pub async fn is_empty(&self, topic: &str) -> bool {
        self.len(topic).await == 0
    }

    /// Committed offset of a group (the next offset it will read)
    pub fn committed_offset(&self, topic: &str, group: &str) -> u64 {
        self.topics
            .get(topic)
            .and_then(|t| t.committed.get(group).map(|c| *c))
            .unwrap_or(0)
    }

    /// All records of a topic in append order
    pub async fn records(&self, topic: &str) -> Vec<QueueRecord> {
        match self.topics.get(topic).map(|t| t.clone()) {
            Some(log) => log.entries.read().await.clone(),
            None => Vec::new(),
        }
    }
}

#[async_trait]
impl QueueBackend for MemoryQueueBackend {
    fn backend_type(&self) -> &'static str {
        "memory"
    }

    async fn append(
        &self,
        topic: &str,
        record: QueueRecord,
    ) -> Result<PublishReceipt, QueueBackendError> {
        let log = self.topic(topic);

        let offset = {
            let mut entries = log.entries.write().await;
            entries.push(record);
            entries.len() - 1
        };
        log.appended.notify_waiters();

        tracing::debug!(topic = %topic, position = offset, "Record appended to memory log");

        Ok(PublishReceipt {
            topic: topic.to_string(),
            position: offset.to_string(),
        })
    }

    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
    ) -> Result<Box<dyn QueueSubscription>, QueueBackendError> {
        let log = self.topic(topic);
        let cursor = log.committed.get(group).map(|c| *c).unwrap_or(0);

        tracing::debug!(
            topic = %topic,
            group = %group,
            consumer = %consumer,
            cursor = cursor,
            "Memory subscription opened"
        );

        Ok(Box::new(MemorySubscription {
            topic: topic.to_string(),
            group: group.to_string(),
            log,
            cursor,
            closed: false,
        }))
    }

    async fn flush(&self) -> Result<(), QueueBackendError> {
        Ok(())
    }
}

struct MemorySubscription {
    topic: String,
    group: String,
    log: Arc<TopicLog>,
    cursor: u64,
    closed: bool,
}

impl MemorySubscription {
    async fn take_next(&mut self) -> Option<QueueMessage> {
        let record = {
            let entries = self.log.entries.read().await;
            entries.get(self.cursor as usize).cloned()
        }?;

        let offset = self.cursor;
        self.cursor += 1;

        let delivery_count = {
            let mut count = self
                .log
                .deliveries
                .entry((self.group.clone(), offset))
                .or_insert(0);
            *count += 1;
            *count
        };

        Some(QueueMessage {
            topic: self.topic.clone(),
            position: offset.to_string(),
            key: Some(record.key),
            payload: record.payload,
            headers: record.headers,
            delivery_count,
        })
    }
}

#[async_trait]
impl QueueSubscription for MemorySubscription {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Option<QueueMessage>, QueueBackendError> {
        if self.closed {
            return Err(QueueBackendError::Closed);
        }

        let log = self.log.clone();
        let appended = log.appended.notified();
        tokio::pin!(appended);
        // Register before checking so an append in between is not missed
        appended.as_mut().enable();

        if let Some(message) = self.take_next().await {
            return Ok(Some(message));
        }

        let _ = tokio::time::timeout(timeout, appended).await;
        Ok(self.take_next().await)
    }

    async fn commit(&mut self, message: &QueueMessage) -> Result<(), QueueBackendError> {
        if self.closed {
            return Err(QueueBackendError::Closed);
        }

        let offset: u64 = message
            .position
            .parse()
            .map_err(|_| QueueBackendError::InvalidPosition(message.position.clone()))?;

        let next = offset + 1;
        let advanced = {
            let mut committed = self.log.committed.entry(self.group.clone()).or_insert(0);
            if next > *committed {
                *committed = next;
                true
            } else {
                false
            }
        };

        // Committed offsets are never read again by this group
        if advanced {
            self.log
                .deliveries
                .retain(|(group, position), _| group != &self.group || *position >= next);
        }

        Ok(())
    }

    async fn close(&mut self) -> Result<(), QueueBackendError> {
        if self.closed {
            return Err(QueueBackendError::Closed);
        }
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOPIC: &str = "notifications";
    const GROUP: &str = "notification-processor";
    const SHORT: Duration = Duration::from_millis(20);

    async fn append_n(backend: &MemoryQueueBackend, n: usize) {
        for i in 0..n {
            backend
                .append(TOPIC, QueueRecord::new(format!("key-{}", i), format!("payload-{}", i)))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_append_assigns_sequential_positions() {
        let backend = MemoryQueueBackend::new();

        let first = backend.append(TOPIC, QueueRecord::new("a", "1")).await.unwrap();
        let second = backend.append(TOPIC, QueueRecord::new("b", "2")).await.unwrap();

        assert_eq!(first.position, "0");
        assert_eq!(second.position, "1");
        assert_eq!(backend.len(TOPIC).await, 2);
    }

    #[tokio::test]
    async fn test_poll_returns_in_order() {
        let backend = MemoryQueueBackend::new();
        append_n(&backend, 3).await;

        let mut sub = backend.subscribe(TOPIC, GROUP, "c1").await.unwrap();
        for i in 0..3 {
            let message = sub.poll(SHORT).await.unwrap().unwrap();
            assert_eq!(message.payload, format!("payload-{}", i));
            assert_eq!(message.key.as_deref(), Some(format!("key-{}", i).as_str()));
        }
        assert!(sub.poll(SHORT).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_uncommitted_message_redelivered_to_new_subscription() {
        let backend = MemoryQueueBackend::new();
        append_n(&backend, 2).await;

        let mut sub = backend.subscribe(TOPIC, GROUP, "c1").await.unwrap();
        let first = sub.poll(SHORT).await.unwrap().unwrap();
        sub.commit(&first).await.unwrap();
        let second = sub.poll(SHORT).await.unwrap().unwrap();
        assert_eq!(second.delivery_count, 1);
        sub.close().await.unwrap();

        assert_eq!(backend.committed_offset(TOPIC, GROUP), 1);

        let mut sub = backend.subscribe(TOPIC, GROUP, "c1").await.unwrap();
        let again = sub.poll(SHORT).await.unwrap().unwrap();
        assert_eq!(again.payload, second.payload);
        assert_eq!(again.delivery_count, 2);
    }

    #[tokio::test]
    async fn test_groups_are_independent() {
        let backend = MemoryQueueBackend::new();
        append_n(&backend, 1).await;

        let mut a = backend.subscribe(TOPIC, "group-a", "c").await.unwrap();
        let message = a.poll(SHORT).await.unwrap().unwrap();
        a.commit(&message).await.unwrap();

        let mut b = backend.subscribe(TOPIC, "group-b", "c").await.unwrap();
        assert!(b.poll(SHORT).await.unwrap().is_some());
        assert_eq!(backend.committed_offset(TOPIC, "group-b"), 0);
    }

    #[tokio::test]
    async fn test_poll_wakes_on_append() {
        let backend = Arc::new(MemoryQueueBackend::new());
        let mut sub = backend.subscribe(TOPIC, GROUP, "c1").await.unwrap();

        let producer = backend.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            producer.append(TOPIC, QueueRecord::new("k", "late")).await.unwrap();
        });

        let message = sub.poll(Duration::from_secs(5)).await.unwrap().unwrap();
        assert_eq!(message.payload, "late");
    }

    #[tokio::test]
    async fn test_commit_never_moves_backwards() {
        let backend = MemoryQueueBackend::new();
        append_n(&backend, 2).await;

        let mut sub = backend.subscribe(TOPIC, GROUP, "c1").await.unwrap();
        let first = sub.poll(SHORT).await.unwrap().unwrap();
        let second = sub.poll(SHORT).await.unwrap().unwrap();
        sub.commit(&second).await.unwrap();
        sub.commit(&first).await.unwrap();

        assert_eq!(backend.committed_offset(TOPIC, GROUP), 2);
    }

    #[tokio::test]
    async fn test_commit_releases_delivery_counts() {
        let backend = MemoryQueueBackend::new();
        append_n(&backend, 3).await;
        let tracked = |backend: &MemoryQueueBackend| {
            backend
                .topics
                .get(TOPIC)
                .map(|log| log.deliveries.len())
                .unwrap_or(0)
        };

        let mut other = backend.subscribe(TOPIC, "other", "c2").await.unwrap();
        other.poll(SHORT).await.unwrap().unwrap();

        let mut sub = backend.subscribe(TOPIC, GROUP, "c1").await.unwrap();
        let first = sub.poll(SHORT).await.unwrap().unwrap();
        let second = sub.poll(SHORT).await.unwrap().unwrap();
        sub.poll(SHORT).await.unwrap().unwrap();
        assert_eq!(tracked(&backend), 4);

        sub.commit(&second).await.unwrap();
        assert_eq!(tracked(&backend), 2);

        // An older commit changes nothing
        sub.commit(&first).await.unwrap();
        assert_eq!(tracked(&backend), 2);
        assert_eq!(backend.committed_offset(TOPIC, GROUP), 2);
    }

    #[tokio::test]
    async fn test_closed_subscription_rejects_calls() {
        let backend = MemoryQueueBackend::new();
        let mut sub = backend.subscribe(TOPIC, GROUP, "c1").await.unwrap();
        sub.close().await.unwrap();

        assert!(matches!(sub.poll(SHORT).await, Err(QueueBackendError::Closed)));
        assert!(matches!(sub.close().await, Err(QueueBackendError::Closed)));
    }

    #[tokio::test]
    async fn test_invalid_position_rejected() {
        let backend = MemoryQueueBackend::new();
        let mut sub = backend.subscribe(TOPIC, GROUP, "c1").await.unwrap();
        let bogus = QueueMessage {
            topic: TOPIC.to_string(),
            position: "1700000000000-0".to_string(),
            key: None,
            payload: String::new(),
            headers: Vec::new(),
            delivery_count: 1,
        };

        assert!(matches!(
            sub.commit(&bogus).await,
            Err(QueueBackendError::InvalidPosition(_))
        ));
    }
}
