//! Notification intake endpoint.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};

use crate::error::{AppError, Result};
use crate::notification::{AcceptedNotification, FieldError, NotificationRequest, ValidationErrors};
use crate::server::AppState;

/// POST /api/notifications - validate and queue a notification
///
/// Answers 202 once the envelope is on the queue. Delivery happens later.
#[tracing::instrument(name = "http.submit_notification", skip(state, payload))]
pub async fn submit_notification(
    State(state): State<AppState>,
    payload: std::result::Result<Json<NotificationRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AcceptedNotification>)> {
    let Json(request) = payload.map_err(|rejection| {
        AppError::Validation(ValidationErrors(vec![FieldError {
            field: "body".to_string(),
            message: rejection.body_text(),
        }]))
    })?;

    let accepted = state.intake.submit(request).await?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}
