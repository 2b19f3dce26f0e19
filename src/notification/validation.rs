//! Request validation.
//!
//! Every rule is evaluated and errors accumulate in field order. A field
//! reports at most one error: a missing value reports `required` and skips the
//! format check.

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

use super::types::{NotificationRequest, NotificationType};

pub const MAX_TITLE_CHARS: usize = 200;
pub const MAX_CONTENT_CHARS: usize = 4000;
pub const MIN_PRIORITY: i32 = 1;
pub const MAX_PRIORITY: i32 = 10;

lazy_static! {
    static ref EMAIL_PATTERN: Regex =
        Regex::new(r"^[^@\s]+@[^@\s]+$").expect("email pattern is valid");
}

/// A single rejected field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Ordered, non-empty list of field errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Validation failed: {}", summary(.0))]
pub struct ValidationErrors(pub Vec<FieldError>);

fn summary(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationErrors {
    pub fn errors(&self) -> &[FieldError] {
        &self.0
    }

    /// Whether any error names the given field
    pub fn has_field(&self, field: &str) -> bool {
        self.0.iter().any(|e| e.field == field)
    }
}

/// Validate a request.
pub fn validate(request: &NotificationRequest) -> Result<(), ValidationErrors> {
    let mut errors = Vec::new();

    if let Some(message) = check_text(&request.title, MAX_TITLE_CHARS, "Title") {
        errors.push(FieldError::new("title", message));
    }

    if let Some(message) = check_text(&request.content, MAX_CONTENT_CHARS, "Content") {
        errors.push(FieldError::new("content", message));
    }

    if !request.notification_type.is_recognized() {
        errors.push(FieldError::new(
            "type",
            "Type must be one of EMAIL, WEBHOOK",
        ));
    }

    if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&request.priority) {
        errors.push(FieldError::new(
            "priority",
            format!(
                "Priority must be between {} and {}",
                MIN_PRIORITY, MAX_PRIORITY
            ),
        ));
    }

    match request.notification_type {
        NotificationType::Email => {
            match non_blank(request.to.as_deref()) {
                None => errors.push(FieldError::new(
                    "to",
                    "Recipient email is required for EMAIL notifications",
                )),
                Some(to) if !EMAIL_PATTERN.is_match(to) => {
                    errors.push(FieldError::new("to", "Invalid email format"))
                }
                Some(_) => {}
            }
        }
        NotificationType::Webhook => {
            match non_blank(request.endpoint.as_deref()) {
                None => errors.push(FieldError::new(
                    "endpoint",
                    "Endpoint is required for WEBHOOK notifications",
                )),
                Some(endpoint) if url::Url::parse(endpoint).is_err() => {
                    errors.push(FieldError::new("endpoint", "Invalid endpoint URL format"))
                }
                Some(_) => {}
            }

            if non_blank(request.trace_id.as_deref()).is_none() {
                errors.push(FieldError::new(
                    "traceId",
                    "TraceId is required for WEBHOOK notifications",
                ));
            }
        }
        NotificationType::Unrecognized => {}
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationErrors(errors))
    }
}

fn check_text(value: &str, max_chars: usize, label: &str) -> Option<String> {
    if value.trim().is_empty() {
        Some(format!("{} is required", label))
    } else if value.chars().count() > max_chars {
        Some(format!(
            "{} must not exceed {} characters",
            label, max_chars
        ))
    } else {
        None
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(result: Result<(), ValidationErrors>) -> Vec<String> {
        result
            .unwrap_err()
            .0
            .into_iter()
            .map(|e| e.field)
            .collect()
    }

    #[test]
    fn test_valid_email_request() {
        let request = NotificationRequest::email("Hi", "Body", "a@b.com").with_priority(5);
        assert!(validate(&request).is_ok());
    }

    #[test]
    fn test_valid_webhook_request() {
        let request = NotificationRequest::webhook(
            "Deploy",
            "Done",
            "https://hooks.example.com/deploy",
            "trace-42",
        );
        assert!(validate(&request).is_ok());
    }

    #[test]
    fn test_email_missing_to_reports_once() {
        let mut request = NotificationRequest::email("Hi", "Body", "");
        assert_eq!(fields(validate(&request)), vec!["to"]);

        request.to = None;
        assert_eq!(fields(validate(&request)), vec!["to"]);
    }

    #[test]
    fn test_email_format() {
        for bad in ["plainaddress", "a@@b.com", "a b@c.com", "@b.com", "a@"] {
            let request = NotificationRequest::email("Hi", "Body", bad);
            let errors = validate(&request).unwrap_err();
            assert_eq!(errors.errors().len(), 1, "{}", bad);
            assert_eq!(errors.errors()[0].message, "Invalid email format");
        }
    }

    #[test]
    fn test_webhook_requires_trace_id() {
        let mut request =
            NotificationRequest::webhook("Deploy", "Done", "https://example.com/hook", "x");
        request.trace_id = None;

        assert_eq!(fields(validate(&request)), vec!["traceId"]);
    }

    #[test]
    fn test_webhook_relative_endpoint_rejected() {
        let request = NotificationRequest::webhook("Deploy", "Done", "not-a-url", "trace-1");
        let errors = validate(&request).unwrap_err();

        assert_eq!(errors.errors().len(), 1);
        assert_eq!(errors.errors()[0].field, "endpoint");
        assert_eq!(errors.errors()[0].message, "Invalid endpoint URL format");
    }

    #[test]
    fn test_priority_bounds() {
        for priority in [0, 11, -1, i32::MAX] {
            let request = NotificationRequest::email("Hi", "Body", "a@b.com").with_priority(priority);
            assert_eq!(fields(validate(&request)), vec!["priority"]);
        }
        for priority in [1, 10] {
            let request = NotificationRequest::email("Hi", "Body", "a@b.com").with_priority(priority);
            assert!(validate(&request).is_ok());
        }
    }

    #[test]
    fn test_length_limits_count_characters() {
        let title = "é".repeat(MAX_TITLE_CHARS);
        let request = NotificationRequest::email(title, "Body", "a@b.com");
        assert!(validate(&request).is_ok());

        let request = NotificationRequest::email("x".repeat(MAX_TITLE_CHARS + 1), "Body", "a@b.com");
        assert_eq!(fields(validate(&request)), vec!["title"]);

        let request =
            NotificationRequest::email("Hi", "x".repeat(MAX_CONTENT_CHARS + 1), "a@b.com");
        assert_eq!(fields(validate(&request)), vec!["content"]);
    }

    #[test]
    fn test_errors_accumulate_in_field_order() {
        let mut request = NotificationRequest::webhook("   ", "", "not a url", "");
        request.priority = 0;

        assert_eq!(
            fields(validate(&request)),
            vec!["title", "content", "priority", "endpoint", "traceId"]
        );
    }

    #[test]
    fn test_unrecognized_type() {
        let mut request = NotificationRequest::email("Hi", "Body", "a@b.com");
        request.notification_type = NotificationType::Unrecognized;

        let errors = validate(&request).unwrap_err();
        assert!(errors.has_field("type"));
        assert!(!errors.has_field("to"));
    }
}
