//! Notification data model and request validation.
//!
//! A [`NotificationRequest`] is validated with [`validate`] and then wrapped in a
//! [`NotificationEnvelope`], which is the unit carried through the queue.

mod types;
mod validation;

pub use types::{
    decode_priority_header, encode_priority_header, AcceptedNotification, NotificationEnvelope,
    NotificationRequest, NotificationType, STATUS_PENDING,
};
pub use validation::{
    validate, FieldError, ValidationErrors, MAX_CONTENT_CHARS, MAX_PRIORITY, MAX_TITLE_CHARS,
    MIN_PRIORITY,
};
