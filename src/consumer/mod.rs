//! Queue consumer: poll, decode, route, deliver, commit.
//!
//! The loop handles one message at a time. A message's position is committed
//! only after its handler succeeded, reported a skip, or no handler exists for
//! it. What happens on handler failure is chosen by [`FailurePolicy`].
//!
//! ```text
//! Idle -> Polling -> Processing -> Committing -> Polling ...
//!            \___________\______________\______-> ShuttingDown -> Closed
//! ```

mod dead_letter;
mod worker;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::{ConsumerSettings, QueueSettings};
use crate::handlers::HandlerError;
use crate::publisher::PublishError;
use crate::queue::QueueBackendError;
use crate::redis::BackoffConfig;

pub use dead_letter::{DeadLetterPublisher, DeadLetterRecord};
pub use worker::NotificationConsumer;

/// What the consumer does when a handler fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop without committing; the process exits non-zero
    #[default]
    FailFast,
    /// Publish a dead-letter record, commit, keep going
    DeadLetter,
}

/// Observable consumer loop state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumerState {
    Idle,
    Polling,
    Processing,
    Committing,
    ShuttingDown,
    Closed,
}

impl ConsumerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsumerState::Idle => "idle",
            ConsumerState::Polling => "polling",
            ConsumerState::Processing => "processing",
            ConsumerState::Committing => "committing",
            ConsumerState::ShuttingDown => "shutting_down",
            ConsumerState::Closed => "closed",
        }
    }

    /// Gauge value
    pub fn as_i64(&self) -> i64 {
        match self {
            ConsumerState::Idle => 0,
            ConsumerState::Polling => 1,
            ConsumerState::Processing => 2,
            ConsumerState::Committing => 3,
            ConsumerState::ShuttingDown => 4,
            ConsumerState::Closed => 5,
        }
    }
}

/// Consumer loop configuration
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub topic: String,
    pub group: String,
    pub consumer_name: String,
    pub poll_timeout: Duration,
    pub failure_policy: FailurePolicy,
    pub dead_letter_topic: String,
    /// Dead-letter an undecodable message once it was delivered this many times (0 = never)
    pub max_decode_attempts: u32,
    pub backoff: BackoffConfig,
}

impl ConsumerConfig {
    pub fn from_settings(queue: &QueueSettings, consumer: &ConsumerSettings) -> Self {
        Self {
            topic: queue.topic.clone(),
            group: queue.consumer_group.clone(),
            consumer_name: queue.consumer_name.clone(),
            poll_timeout: queue.poll_timeout(),
            failure_policy: consumer.failure_policy,
            dead_letter_topic: consumer.dead_letter_topic.clone(),
            max_decode_attempts: consumer.max_decode_attempts,
            backoff: BackoffConfig::from_bounds(
                consumer.backoff_initial_delay_ms,
                consumer.backoff_max_delay_ms,
            ),
        }
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self::from_settings(&QueueSettings::default(), &ConsumerSettings::default())
    }
}

/// Counters for one run of the loop
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsumerStats {
    pub consumed: u64,
    pub delivered: u64,
    pub skipped: u64,
    pub no_handler: u64,
    pub decode_failures: u64,
    pub dead_lettered: u64,
    pub committed: u64,
    pub commit_failures: u64,
    pub poll_errors: u64,
}

/// Fatal consumer outcomes
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("Failed to subscribe: {0}")]
    Subscribe(#[source] QueueBackendError),

    #[error("Handler failed for notification {notification_id}: {source}")]
    Handler {
        notification_id: Uuid,
        #[source]
        source: HandlerError,
    },

    #[error("Failed to dead-letter message at {position}: {source}")]
    DeadLetter {
        position: String,
        #[source]
        source: PublishError,
    },
}
