//! Backend trait for the durable notification queue.
//!
//! A backend is an append-only, ordered log per topic with a committed read
//! position per consumer group. A new subscription starts from the group's
//! committed position, so anything read but not committed is delivered again.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::notification::decode_priority_header;

/// Header carrying the request priority as 4 little-endian bytes
pub const PRIORITY_HEADER: &str = "priority";

/// Errors that can occur during queue backend operations.
#[derive(Debug, Error)]
pub enum QueueBackendError {
    /// Redis operation failed
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The subscription was already closed
    #[error("Subscription is closed")]
    Closed,

    /// A position that this backend did not hand out
    #[error("Invalid queue position: {0}")]
    InvalidPosition(String),
}

impl From<crate::redis::PoolError> for QueueBackendError {
    fn from(err: crate::redis::PoolError) -> Self {
        match err {
            crate::redis::PoolError::Redis(e) => QueueBackendError::Redis(e),
        }
    }
}

/// A record to append
#[derive(Debug, Clone, PartialEq)]
pub struct QueueRecord {
    pub key: String,
    pub payload: String,
    pub headers: Vec<(String, Vec<u8>)>,
}

impl QueueRecord {
    pub fn new(key: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            payload: payload.into(),
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: Vec<u8>) -> Self {
        self.headers.push((name.into(), value));
        self
    }
}

/// A record read from a subscription
#[derive(Debug, Clone, PartialEq)]
pub struct QueueMessage {
    pub topic: String,
    /// Backend-specific position (log offset or stream entry id)
    pub position: String,
    pub key: Option<String>,
    pub payload: String,
    pub headers: Vec<(String, Vec<u8>)>,
    /// How many times this group has been handed this message, including now
    pub delivery_count: u32,
}

impl QueueMessage {
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }

    /// Priority header, when present and well formed
    pub fn priority(&self) -> Option<i32> {
        self.header(PRIORITY_HEADER).and_then(decode_priority_header)
    }
}

/// Where an appended record landed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishReceipt {
    pub topic: String,
    pub position: String,
}

/// Durable queue backend.
///
/// Implementations must be thread-safe (`Send + Sync`); one instance is shared
/// by the publisher, the consumer and the health endpoint.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Backend type identifier (`"memory"`, `"redis"`)
    fn backend_type(&self) -> &'static str;

    /// Append a record to the end of a topic.
    async fn append(
        &self,
        topic: &str,
        record: QueueRecord,
    ) -> Result<PublishReceipt, QueueBackendError>;

    /// Join a consumer group on a topic.
    ///
    /// Reading starts at the group's committed position.
    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
    ) -> Result<Box<dyn QueueSubscription>, QueueBackendError>;

    /// Make sure appended records are durable before the process exits.
    async fn flush(&self) -> Result<(), QueueBackendError>;

    /// Check that the backend can serve requests.
    async fn ping(&self) -> Result<(), QueueBackendError> {
        Ok(())
    }
}

/// A consumer group membership on one topic
#[async_trait]
pub trait QueueSubscription: Send {
    fn topic(&self) -> &str;

    /// Wait up to `timeout` for the next message.
    ///
    /// Returns `Ok(None)` when nothing arrived in time.
    async fn poll(&mut self, timeout: Duration) -> Result<Option<QueueMessage>, QueueBackendError>;

    /// Advance the group's committed position past `message`.
    async fn commit(&mut self, message: &QueueMessage) -> Result<(), QueueBackendError>;

    /// Leave the group. Uncommitted messages stay pending for the group.
    async fn close(&mut self) -> Result<(), QueueBackendError>;
}
