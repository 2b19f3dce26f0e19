//! Durable notification queue.
//!
//! # Backend Architecture
//!
//! - `MemoryQueueBackend`: in-process log, used by tests and local development
//! - `RedisQueueBackend`: Redis Streams with consumer groups
//!
//! Use `create_queue_backend()` to pick one from configuration.

mod backend;
mod factory;
mod memory_backend;
mod redis_backend;

pub use backend::{
    PublishReceipt, QueueBackend, QueueBackendError, QueueMessage, QueueRecord, QueueSubscription,
    PRIORITY_HEADER,
};
pub use factory::create_queue_backend;
pub use memory_backend::MemoryQueueBackend;
pub use redis_backend::RedisQueueBackend;
