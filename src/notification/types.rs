use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status every envelope carries when it is created
pub const STATUS_PENDING: &str = "Pending";

/// Delivery channel requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NotificationType {
    /// Delivered through the mail provider
    Email,
    /// Delivered as an HTTP POST to a caller-supplied endpoint
    Webhook,
    /// Any value produced by a foreign producer that this service does not know
    #[serde(other)]
    Unrecognized,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::Email => "EMAIL",
            NotificationType::Webhook => "WEBHOOK",
            NotificationType::Unrecognized => "UNRECOGNIZED",
        }
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, NotificationType::Unrecognized)
    }
}

impl std::fmt::Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification request as submitted by a caller.
///
/// Field names follow the camelCase wire contract. PascalCase aliases are
/// accepted so envelopes written by older producers still decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRequest {
    #[serde(default, alias = "Title")]
    pub title: String,

    #[serde(default, alias = "Content")]
    pub content: String,

    #[serde(rename = "type", alias = "Type")]
    pub notification_type: NotificationType,

    #[serde(default = "default_priority", alias = "Priority")]
    pub priority: i32,

    /// Recipient address (EMAIL only)
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "To")]
    pub to: Option<String>,

    /// Target URI (WEBHOOK only)
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "Endpoint")]
    pub endpoint: Option<String>,

    /// Caller trace identifier (required for WEBHOOK)
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "TraceId")]
    pub trace_id: Option<String>,
}

fn default_priority() -> i32 {
    1
}

fn default_status() -> String {
    STATUS_PENDING.to_string()
}

impl NotificationRequest {
    /// Create an EMAIL request
    pub fn email(
        title: impl Into<String>,
        content: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            notification_type: NotificationType::Email,
            priority: default_priority(),
            to: Some(to.into()),
            endpoint: None,
            trace_id: None,
        }
    }

    /// Create a WEBHOOK request
    pub fn webhook(
        title: impl Into<String>,
        content: impl Into<String>,
        endpoint: impl Into<String>,
        trace_id: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            notification_type: NotificationType::Webhook,
            priority: default_priority(),
            to: None,
            endpoint: Some(endpoint.into()),
            trace_id: Some(trace_id.into()),
        }
    }

    /// Set the priority
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Durable unit of queued work.
///
/// Wraps a validated request with an identity and creation time. The status is
/// written once at creation and is advisory only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEnvelope {
    #[serde(alias = "Id")]
    pub id: Uuid,

    #[serde(alias = "CreatedAt")]
    pub created_at: DateTime<Utc>,

    #[serde(alias = "Request")]
    pub request: NotificationRequest,

    #[serde(default = "default_status", alias = "Status")]
    pub status: String,
}

impl NotificationEnvelope {
    /// Wrap a request in a new envelope.
    ///
    /// The creation time is truncated to milliseconds so the text form
    /// round-trips without loss.
    pub fn new(request: NotificationRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now().trunc_subsecs(3),
            request,
            status: default_status(),
        }
    }

    pub fn notification_type(&self) -> NotificationType {
        self.request.notification_type
    }

    /// Queue partition key
    pub fn key(&self) -> String {
        self.id.to_string()
    }

    /// Serialize to the queue wire format
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from the queue wire format
    pub fn decode(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}

/// Encode a priority as the raw header bytes carried next to the queue entry
pub fn encode_priority_header(priority: i32) -> Vec<u8> {
    priority.to_le_bytes().to_vec()
}

/// Decode the raw priority header; `None` when the header is not 4 bytes
pub fn decode_priority_header(raw: &[u8]) -> Option<i32> {
    let bytes: [u8; 4] = raw.try_into().ok()?;
    Some(i32::from_le_bytes(bytes))
}

/// Acknowledgement returned to the caller once a notification is queued
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedNotification {
    pub notification_id: Uuid,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl From<&NotificationEnvelope> for AcceptedNotification {
    fn from(envelope: &NotificationEnvelope) -> Self {
        Self {
            notification_id: envelope.id,
            status: envelope.status.clone(),
            created_at: envelope.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_starts_pending() {
        let envelope = NotificationEnvelope::new(NotificationRequest::email("Hi", "Body", "a@b.com"));

        assert_eq!(envelope.status, STATUS_PENDING);
        assert_eq!(envelope.key(), envelope.id.to_string());
        assert_eq!(envelope.created_at.timestamp_subsec_nanos() % 1_000_000, 0);
    }

    #[test]
    fn test_envelope_round_trip() {
        let request = NotificationRequest::webhook("Deploy", "v2 is live", "https://hooks.example.com/x", "trace-1")
            .with_priority(7);
        let envelope = NotificationEnvelope::new(request);

        let decoded = NotificationEnvelope::decode(&envelope.encode().unwrap()).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_wire_shape() {
        let envelope = NotificationEnvelope::new(NotificationRequest::email("Hi", "Body", "a@b.com").with_priority(5));
        let value: serde_json::Value = serde_json::from_str(&envelope.encode().unwrap()).unwrap();

        assert_eq!(value["request"]["type"], "EMAIL");
        assert_eq!(value["request"]["priority"], 5);
        assert_eq!(value["request"]["to"], "a@b.com");
        assert!(value["request"].get("endpoint").is_none());
        assert!(value["request"].get("traceId").is_none());
        assert_eq!(value["status"], "Pending");
        assert!(value["createdAt"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_decode_tolerates_missing_and_unknown_fields() {
        let payload = json!({
            "id": "4a0f8a4e-5a4b-4c8e-9f59-0f6b2d0c7b11",
            "createdAt": "2024-05-01T10:00:00.123Z",
            "request": {
                "title": "Hi",
                "content": "Body",
                "type": "WEBHOOK",
                "endpoint": "https://example.com/hook",
                "extra": true
            },
            "somethingElse": 1
        });

        let envelope = NotificationEnvelope::decode(&payload.to_string()).unwrap();
        assert_eq!(envelope.request.priority, 1);
        assert_eq!(envelope.request.trace_id, None);
        assert_eq!(envelope.status, STATUS_PENDING);
    }

    #[test]
    fn test_decode_pascal_case_producer() {
        let payload = json!({
            "Id": "4a0f8a4e-5a4b-4c8e-9f59-0f6b2d0c7b11",
            "CreatedAt": "2024-05-01T10:00:00Z",
            "Request": {
                "Title": "Hi",
                "Content": "Body",
                "Type": "EMAIL",
                "Priority": 3,
                "To": "a@b.com"
            },
            "Status": "Pending"
        });

        let envelope = NotificationEnvelope::decode(&payload.to_string()).unwrap();
        assert_eq!(envelope.notification_type(), NotificationType::Email);
        assert_eq!(envelope.request.to.as_deref(), Some("a@b.com"));
        assert_eq!(envelope.request.priority, 3);
    }

    #[test]
    fn test_unknown_type_decodes_as_unrecognized() {
        let request: NotificationRequest =
            serde_json::from_value(json!({"title": "t", "content": "c", "type": "SMS"})).unwrap();

        assert_eq!(request.notification_type, NotificationType::Unrecognized);
        assert!(!request.notification_type.is_recognized());
    }

    #[test]
    fn test_priority_header_codec() {
        assert_eq!(encode_priority_header(5), vec![5, 0, 0, 0]);
        assert_eq!(decode_priority_header(&encode_priority_header(-3)), Some(-3));
        assert_eq!(decode_priority_header(&[1, 2]), None);
    }

    #[test]
    fn test_accepted_notification_shape() {
        let envelope = NotificationEnvelope::new(NotificationRequest::email("Hi", "Body", "a@b.com"));
        let accepted = AcceptedNotification::from(&envelope);
        let value = serde_json::to_value(&accepted).unwrap();

        assert_eq!(value["notificationId"], envelope.id.to_string());
        assert_eq!(value["status"], "Pending");
        assert!(value.get("createdAt").is_some());
    }
}
