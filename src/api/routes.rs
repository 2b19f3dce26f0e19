use axum::{
    routing::{get, post},
    Router,
};

use crate::server::AppState;

use super::{health, prometheus_metrics, submit_notification};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Operational
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics))
        // Intake
        .route("/api/notifications", post(submit_notification))
}
