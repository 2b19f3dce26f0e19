//! Redis Streams queue backend.
//!
//! Topic `T` lives in the stream `{prefix}:{T}`. Each entry carries the fields
//! `key`, `payload` and one field per header. Consumer groups map directly to
//! Redis consumer groups; committing a message is an `XACK`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamId, StreamPendingCountReply, StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;

use crate::redis::pool::{is_connection_error, RedisPool, RedisPoolExt};

use super::backend::{
    PublishReceipt, QueueBackend, QueueBackendError, QueueMessage, QueueRecord, QueueSubscription,
};

const KEY_FIELD: &str = "key";
const PAYLOAD_FIELD: &str = "payload";

/// Start of this consumer's pending entries list
const PENDING_START: &str = "0";
/// Read id for entries never delivered to the group
const NEW_ID: &str = ">";

/// Redis Streams queue backend.
pub struct RedisQueueBackend {
    pool: Arc<RedisPool>,

    /// Key prefix for stream keys
    prefix: String,

    /// Approximate cap passed to `XADD MAXLEN ~`
    max_stream_length: usize,
}

impl RedisQueueBackend {
    pub fn new(pool: Arc<RedisPool>, prefix: String, max_stream_length: usize) -> Self {
        Self {
            pool,
            prefix,
            max_stream_length,
        }
    }

    /// Stream key for a topic.
    pub fn stream_key(&self, topic: &str) -> String {
        stream_key(&self.prefix, topic)
    }
}

fn stream_key(prefix: &str, topic: &str) -> String {
    format!("{}:{}", prefix, topic)
}

/// Flatten a record into stream fields.
fn record_fields(record: QueueRecord) -> Vec<(String, Vec<u8>)> {
    let mut fields = Vec::with_capacity(2 + record.headers.len());
    fields.push((KEY_FIELD.to_string(), record.key.into_bytes()));
    fields.push((PAYLOAD_FIELD.to_string(), record.payload.into_bytes()));
    fields.extend(
        record
            .headers
            .into_iter()
            .filter(|(name, _)| name != KEY_FIELD && name != PAYLOAD_FIELD),
    );
    fields
}

/// Rebuild a message from a stream entry. `None` for entries whose fields
/// were trimmed away while still pending.
fn message_from_entry(topic: &str, entry: &StreamId, delivery_count: u32) -> Option<QueueMessage> {
    if entry.map.is_empty() {
        return None;
    }

    let payload = entry.get::<String>(PAYLOAD_FIELD).unwrap_or_default();
    let key = entry.get::<String>(KEY_FIELD);

    let mut headers: Vec<(String, Vec<u8>)> = entry
        .map
        .keys()
        .filter(|name| name.as_str() != KEY_FIELD && name.as_str() != PAYLOAD_FIELD)
        .filter_map(|name| entry.get::<Vec<u8>>(name).map(|value| (name.clone(), value)))
        .collect();
    headers.sort_by(|a, b| a.0.cmp(&b.0));

    Some(QueueMessage {
        topic: topic.to_string(),
        position: entry.id.clone(),
        key,
        payload,
        headers,
        delivery_count,
    })
}

#[async_trait]
impl QueueBackend for RedisQueueBackend {
    fn backend_type(&self) -> &'static str {
        "redis"
    }

    async fn append(
        &self,
        topic: &str,
        record: QueueRecord,
    ) -> Result<PublishReceipt, QueueBackendError> {
        let key = self.stream_key(topic);
        let fields = record_fields(record);

        let id = self
            .pool
            .xadd_maxlen(&key, self.max_stream_length, &fields)
            .await?;

        tracing::debug!(topic = %topic, stream = %key, position = %id, "Entry appended to stream");

        Ok(PublishReceipt {
            topic: topic.to_string(),
            position: id,
        })
    }

    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
    ) -> Result<Box<dyn QueueSubscription>, QueueBackendError> {
        let key = self.stream_key(topic);

        if self.pool.xgroup_create_mkstream(&key, group).await? {
            tracing::info!(stream = %key, group = %group, "Created consumer group");
        }

        let conn = self.pool.dedicated_connection().await?;

        tracing::info!(
            stream = %key,
            group = %group,
            consumer = %consumer,
            "Redis subscription opened"
        );

        Ok(Box::new(RedisSubscription {
            pool: self.pool.clone(),
            conn: Some(conn),
            topic: topic.to_string(),
            stream_key: key,
            group: group.to_string(),
            consumer: consumer.to_string(),
            pending_cursor: Some(PENDING_START.to_string()),
            closed: false,
        }))
    }

    async fn flush(&self) -> Result<(), QueueBackendError> {
        // XADD replies only after the entry is stored
        Ok(())
    }

    async fn ping(&self) -> Result<(), QueueBackendError> {
        self.pool.ping().await?;
        Ok(())
    }
}

struct RedisSubscription {
    pool: Arc<RedisPool>,
    /// Dedicated connection for blocking reads; reopened after connection errors
    conn: Option<MultiplexedConnection>,
    topic: String,
    stream_key: String,
    group: String,
    consumer: String,
    /// Last pending entry re-read in this session; `None` once the backlog is drained
    pending_cursor: Option<String>,
    closed: bool,
}

impl RedisSubscription {
    async fn connection(&mut self) -> Result<MultiplexedConnection, QueueBackendError> {
        if let Some(conn) = &self.conn {
            return Ok(conn.clone());
        }
        let conn = self.pool.dedicated_connection().await?;
        self.conn = Some(conn.clone());
        Ok(conn)
    }

    async fn read(
        &mut self,
        id: &str,
        block: Option<Duration>,
    ) -> Result<Option<StreamId>, QueueBackendError> {
        let mut conn = self.connection().await?;

        let mut options = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(1);
        if let Some(block) = block {
            // BLOCK 0 would wait forever
            options = options.block(block.as_millis().max(1) as usize);
        }

        let reply: Result<Option<StreamReadReply>, redis::RedisError> = conn
            .xread_options(&[self.stream_key.as_str()], &[id], &options)
            .await;

        match reply {
            Ok(reply) => Ok(reply
                .and_then(|r| r.keys.into_iter().next())
                .and_then(|k| k.ids.into_iter().next())),
            Err(e) => {
                if is_connection_error(&e) {
                    self.conn = None;
                }
                Err(QueueBackendError::Redis(e))
            }
        }
    }

    async fn delivery_count(&mut self, id: &str) -> Result<u32, QueueBackendError> {
        let mut conn = self.connection().await?;
        let reply: StreamPendingCountReply = conn
            .xpending_count(&self.stream_key, &self.group, id, id, 1)
            .await?;

        Ok(reply
            .ids
            .first()
            .map(|p| p.times_delivered as u32)
            .unwrap_or(1))
    }
}

#[async_trait]
impl QueueSubscription for RedisSubscription {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Option<QueueMessage>, QueueBackendError> {
        if self.closed {
            return Err(QueueBackendError::Closed);
        }

        while let Some(cursor) = self.pending_cursor.clone() {
            match self.read(&cursor, None).await? {
                Some(entry) => {
                    self.pending_cursor = Some(entry.id.clone());
                    let count = self.delivery_count(&entry.id).await?;
                    match message_from_entry(&self.topic, &entry, count) {
                        Some(message) => return Ok(Some(message)),
                        None => {
                            tracing::warn!(
                                stream = %self.stream_key,
                                position = %entry.id,
                                "Pending entry was trimmed, acknowledging"
                            );
                            self.pool
                                .xack(&self.stream_key, &self.group, &entry.id)
                                .await?;
                        }
                    }
                }
                None => self.pending_cursor = None,
            }
        }

        match self.read(NEW_ID, Some(timeout)).await? {
            Some(entry) => Ok(message_from_entry(&self.topic, &entry, 1)),
            None => Ok(None),
        }
    }

    async fn commit(&mut self, message: &QueueMessage) -> Result<(), QueueBackendError> {
        if self.closed {
            return Err(QueueBackendError::Closed);
        }

        let acked = self
            .pool
            .xack(&self.stream_key, &self.group, &message.position)
            .await?;
        if acked == 0 {
            return Err(QueueBackendError::InvalidPosition(message.position.clone()));
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), QueueBackendError> {
        if self.closed {
            return Err(QueueBackendError::Closed);
        }
        self.closed = true;
        self.conn = None;

        tracing::info!(
            stream = %self.stream_key,
            group = %self.group,
            consumer = %self.consumer,
            "Redis subscription closed"
        );
        Ok(())
    }
}
