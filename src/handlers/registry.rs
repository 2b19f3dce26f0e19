use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::notification::{NotificationEnvelope, NotificationType};

use super::NotificationHandler;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("A handler for {0} is already registered")]
    Duplicate(NotificationType),

    #[error("Handlers cannot be registered for unrecognized types")]
    Unrecognized,
}

/// No registered handler accepts the envelope
#[derive(Debug, Error, PartialEq, Eq)]
#[error("no handler for type {0}")]
pub struct NoHandler(pub NotificationType);

/// Lookup table from notification type to handler.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<NotificationType, Arc<dyn NotificationHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for its channel.
    ///
    /// A second handler for the same channel is rejected and the first one stays.
    pub fn register(&mut self, handler: Arc<dyn NotificationHandler>) -> Result<(), RegistryError> {
        let channel = handler.channel();
        if !channel.is_recognized() {
            return Err(RegistryError::Unrecognized);
        }
        if self.handlers.contains_key(&channel) {
            return Err(RegistryError::Duplicate(channel));
        }

        tracing::info!(handler = handler.name(), channel = %channel, "Registered handler");
        self.handlers.insert(channel, handler);
        Ok(())
    }

    /// Find the handler for an envelope.
    pub fn resolve(
        &self,
        envelope: &NotificationEnvelope,
    ) -> Result<Arc<dyn NotificationHandler>, NoHandler> {
        let notification_type = envelope.notification_type();
        self.handlers
            .get(&notification_type)
            .filter(|handler| handler.can_handle(envelope))
            .cloned()
            .ok_or(NoHandler(notification_type))
    }

    /// Registered channels in a stable order
    pub fn channels(&self) -> Vec<NotificationType> {
        let mut channels: Vec<_> = self.handlers.keys().copied().collect();
        channels.sort_by_key(|c| c.as_str());
        channels
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::{DeliveryOutcome, HandlerError};
    use crate::notification::NotificationRequest;
    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    struct StubHandler {
        name: &'static str,
        channel: NotificationType,
    }

    #[async_trait]
    impl NotificationHandler for StubHandler {
        fn name(&self) -> &'static str {
            self.name
        }

        fn channel(&self) -> NotificationType {
            self.channel
        }

        async fn handle(
            &self,
            _envelope: &NotificationEnvelope,
            _cancel: &CancellationToken,
        ) -> Result<DeliveryOutcome, HandlerError> {
            Ok(DeliveryOutcome::Delivered)
        }
    }

    fn stub(name: &'static str, channel: NotificationType) -> Arc<dyn NotificationHandler> {
        Arc::new(StubHandler { name, channel })
    }

    #[test]
    fn test_resolve_by_type() {
        let mut registry = HandlerRegistry::new();
        registry.register(stub("email", NotificationType::Email)).unwrap();
        registry.register(stub("webhook", NotificationType::Webhook)).unwrap();

        let envelope = NotificationEnvelope::new(NotificationRequest::webhook(
            "t",
            "c",
            "https://example.com",
            "trace",
        ));

        assert_eq!(registry.resolve(&envelope).unwrap().name(), "webhook");
        assert_eq!(registry.resolve(&envelope).unwrap().name(), "webhook");
        assert_eq!(
            registry.channels(),
            vec![NotificationType::Email, NotificationType::Webhook]
        );
    }

    #[test]
    fn test_duplicate_keeps_first() {
        let mut registry = HandlerRegistry::new();
        registry.register(stub("first", NotificationType::Email)).unwrap();

        let err = registry.register(stub("second", NotificationType::Email)).unwrap_err();
        assert_eq!(err, RegistryError::Duplicate(NotificationType::Email));

        let envelope = NotificationEnvelope::new(NotificationRequest::email("t", "c", "a@b.com"));
        assert_eq!(registry.resolve(&envelope).unwrap().name(), "first");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unrecognized_registration_rejected() {
        let mut registry = HandlerRegistry::new();
        assert_eq!(
            registry.register(stub("sms", NotificationType::Unrecognized)).unwrap_err(),
            RegistryError::Unrecognized
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_missing_handler() {
        let registry = HandlerRegistry::new();
        let envelope = NotificationEnvelope::new(NotificationRequest::email("t", "c", "a@b.com"));

        let err = registry.resolve(&envelope).err().unwrap();
        assert_eq!(err.to_string(), "no handler for type EMAIL");
    }
}
