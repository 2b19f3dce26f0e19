use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::notification::{FieldError, ValidationErrors};
use crate::publisher::{PublishError, SubmitError};

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<SubmitError> for AppError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::Validation(errors) => AppError::Validation(errors),
            SubmitError::Publish(e) => AppError::Publish(e),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Vec<FieldError>>,
}

/// Check if running in production mode (based on RUN_MODE env var)
pub fn is_production() -> bool {
    std::env::var("RUN_MODE")
        .map(|m| m == "production" || m == "prod")
        .unwrap_or(false)
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Publish(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Publish(_) => "PUBLISH_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Message shown to the caller
    fn client_message(&self, production: bool) -> String {
        match self {
            AppError::Validation(_) => "Validation failed".to_string(),
            // Broker details never reach the caller
            AppError::Publish(_) => "Error processing notification".to_string(),
            AppError::Internal(_) if production => "Internal server error".to_string(),
            AppError::Internal(_) => self.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        if status.is_server_error() {
            tracing::error!(code = %code, status = %status.as_u16(), error = %self, "API error");
        } else {
            tracing::debug!(code = %code, status = %status.as_u16(), error = %self, "API error");
        }

        let details = match &self {
            AppError::Validation(errors) => Some(errors.errors().to_vec()),
            _ => None,
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code,
                message: self.client_message(is_production()),
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use std::time::Duration;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_validation_response_lists_details() {
        let errors = ValidationErrors(vec![FieldError {
            field: "to".to_string(),
            message: "Invalid email format".to_string(),
        }]);

        let response = AppError::from(SubmitError::Validation(errors)).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
        assert_eq!(body["error"]["details"][0]["field"], "to");
        assert_eq!(body["error"]["details"][0]["message"], "Invalid email format");
    }

    #[tokio::test]
    async fn test_publish_response_is_generic() {
        let err = AppError::from(SubmitError::Publish(PublishError::Timeout(
            Duration::from_secs(5),
        )));

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "PUBLISH_ERROR");
        assert_eq!(body["error"]["message"], "Error processing notification");
        assert!(body["error"].get("details").is_none());
    }

    #[test]
    fn test_codes() {
        assert_eq!(AppError::Internal("x".into()).code(), "INTERNAL_ERROR");
        assert_eq!(
            AppError::Internal("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_internal_details_hidden_in_production() {
        let err = AppError::Internal("encoder exploded".into());

        assert_eq!(err.client_message(false), "Internal error: encoder exploded");
        assert_eq!(err.client_message(true), "Internal server error");
    }
}
