//! Redis connectivity for the stream queue backend.
//!
//! - `RedisPool`: shared multiplexed connection plus dedicated read connections
//! - `RedisHealth`: connection health for the health endpoint and metrics
//! - `ExponentialBackoff`: delay schedule after poll failures

mod backoff;
mod health;
pub mod pool;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use health::{RedisHealth, RedisHealthStats, RedisHealthStatus};
pub use pool::{PoolError, RedisPool, RedisPoolExt};
