use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

use crate::api::api_routes;

use crate::shutdown::shutdown_signal;

use super::AppState;

pub fn create_app(state: AppState) -> Router {
    let body_limit = state.settings.server.body_limit_bytes;

    Router::new()
        .merge(api_routes())
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .with_state(state)
}

/// Bind `addr` and serve `app` until a shutdown signal or `cancel` fires.
pub async fn serve(addr: &str, app: Router, cancel: CancellationToken) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel))
        .await
}
