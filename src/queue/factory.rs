//! Queue backend factory

use std::sync::Arc;

use crate::config::QueueSettings;
use crate::redis::RedisPool;

use super::backend::QueueBackend;
use super::memory_backend::MemoryQueueBackend;
use super::redis_backend::RedisQueueBackend;

/// Create a queue backend based on configuration.
///
/// - `"redis"`: a `RedisQueueBackend` when a Redis pool is provided
/// - `"memory"` (default): a `MemoryQueueBackend`
///
/// ```rust,ignore
/// let backend = create_queue_backend(&settings.queue, Some(redis_pool.clone()));
/// ```
pub fn create_queue_backend(
    settings: &QueueSettings,
    redis_pool: Option<Arc<RedisPool>>,
) -> Arc<dyn QueueBackend> {
    match settings.backend.as_str() {
        "redis" => {
            if let Some(pool) = redis_pool {
                tracing::info!(
                    backend = "redis",
                    prefix = %settings.redis_prefix,
                    max_stream_length = settings.max_stream_length,
                    "Creating Redis queue backend"
                );
                Arc::new(RedisQueueBackend::new(
                    pool,
                    settings.redis_prefix.clone(),
                    settings.max_stream_length,
                ))
            } else {
                tracing::warn!(
                    "Redis backend requested but no pool provided, falling back to memory"
                );
                Arc::new(MemoryQueueBackend::new())
            }
        }
        _ => {
            tracing::info!(backend = "memory", "Creating memory queue backend");
            Arc::new(MemoryQueueBackend::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_by_default() {
        let backend = create_queue_backend(&QueueSettings::default(), None);
        assert_eq!(backend.backend_type(), "memory");
    }

    #[test]
    fn test_redis_without_pool_falls_back() {
        let settings = QueueSettings {
            backend: "redis".to_string(),
            ..Default::default()
        };

        let backend = create_queue_backend(&settings, None);
        assert_eq!(backend.backend_type(), "memory");
    }

    #[test]
    fn test_redis_with_pool() {
        let settings = QueueSettings {
            backend: "redis".to_string(),
            ..Default::default()
        };
        let pool = RedisPool::new(
            &crate::config::RedisSettings::default(),
            Arc::new(crate::redis::RedisHealth::new()),
        )
        .unwrap();

        let backend = create_queue_backend(&settings, Some(Arc::new(pool)));
        assert_eq!(backend.backend_type(), "redis");
    }
}
