//! Notification relay: accepts notification requests over HTTP, queues them
//! durably, and delivers them by email or webhook from a consumer loop.

// Infrastructure
pub mod config;
pub mod error;
pub mod metrics;
pub mod redis;

// Domain
pub mod consumer;
pub mod handlers;
pub mod notification;
pub mod publisher;
pub mod queue;

// Application
pub mod api;
pub mod server;
pub mod shutdown;
