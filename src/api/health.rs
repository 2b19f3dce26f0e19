//! Health check endpoint.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::redis::RedisHealthStatus;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub queue: QueueHealthResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis: Option<RedisHealthResponse>,
}

#[derive(Debug, Serialize)]
pub struct QueueHealthResponse {
    pub backend: String,
    pub topic: String,
    pub reachable: bool,
}

#[derive(Debug, Serialize)]
pub struct RedisHealthResponse {
    pub status: String,
    pub connected: bool,
    pub reconnection_attempts: u32,
    pub total_reconnections: u32,
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let reachable = match state.queue_backend.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Queue backend ping failed");
            false
        }
    };

    let redis = state.redis_health.as_ref().map(|health| {
        let stats = health.stats();
        RedisHealthResponse {
            status: stats.status.as_str().to_string(),
            connected: stats.status == RedisHealthStatus::Healthy,
            reconnection_attempts: stats.reconnection_attempts,
            total_reconnections: stats.total_reconnections,
        }
    });

    let redis_ok = redis.as_ref().map(|r| r.connected).unwrap_or(true);
    let status = if reachable && redis_ok { "healthy" } else { "degraded" };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        queue: QueueHealthResponse {
            backend: state.queue_backend.backend_type().to_string(),
            topic: state.settings.queue.topic.clone(),
            reachable,
        },
        redis,
    })
}
