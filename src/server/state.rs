use std::sync::Arc;
use std::time::Instant;

use crate::config::Settings;
use crate::publisher::NotificationIntake;
use crate::queue::QueueBackend;
use crate::redis::RedisHealth;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub intake: NotificationIntake,
    pub queue_backend: Arc<dyn QueueBackend>,
    /// Present only with the Redis backend
    pub redis_health: Option<Arc<RedisHealth>>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        settings: Settings,
        intake: NotificationIntake,
        queue_backend: Arc<dyn QueueBackend>,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            intake,
            queue_backend,
            redis_health: None,
            start_time: Instant::now(),
        }
    }

    pub fn with_redis_health(mut self, health: Arc<RedisHealth>) -> Self {
        self.redis_health = Some(health);
        self
    }
}
