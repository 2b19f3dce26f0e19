use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::handlers::{DeliveryOutcome, HandlerError, HandlerRegistry};
use crate::metrics::{ConsumerMetrics, DeliveryMetrics};
use crate::notification::NotificationEnvelope;
use crate::publisher::NotificationPublisher;
use crate::queue::{QueueBackend, QueueMessage, QueueSubscription};
use crate::redis::ExponentialBackoff;

use super::{
    ConsumerConfig, ConsumerError, ConsumerState, ConsumerStats, DeadLetterPublisher,
    FailurePolicy,
};

/// What the loop does after a message
enum Step {
    Continue,
    Stop,
}

/// Long-running queue consumer.
pub struct NotificationConsumer {
    backend: Arc<dyn QueueBackend>,
    registry: Arc<HandlerRegistry>,
    dead_letters: DeadLetterPublisher,
    config: ConsumerConfig,
    state: watch::Sender<ConsumerState>,
}

impl NotificationConsumer {
    /// `publisher` is used for dead-letter records only.
    pub fn new(
        backend: Arc<dyn QueueBackend>,
        registry: Arc<HandlerRegistry>,
        publisher: Arc<NotificationPublisher>,
        config: ConsumerConfig,
    ) -> Self {
        let dead_letters = DeadLetterPublisher::new(publisher, config.dead_letter_topic.clone());
        let (state, _) = watch::channel(ConsumerState::Idle);

        Self {
            backend,
            registry,
            dead_letters,
            config,
            state,
        }
    }

    /// Watch the loop state
    pub fn state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    fn set_state(&self, state: ConsumerState) {
        self.state.send_replace(state);
        ConsumerMetrics::set_state(state.as_i64());
    }

    /// Run until cancelled or a fatal error.
    ///
    /// The subscription is closed on every exit path.
    pub async fn run(&self, cancel: CancellationToken) -> Result<ConsumerStats, ConsumerError> {
        self.set_state(ConsumerState::Idle);

        let mut subscription = match self
            .backend
            .subscribe(&self.config.topic, &self.config.group, &self.config.consumer_name)
            .await
        {
            Ok(subscription) => subscription,
            Err(e) => {
                tracing::error!(
                    topic = %self.config.topic,
                    group = %self.config.group,
                    error = %e,
                    "Failed to subscribe"
                );
                self.set_state(ConsumerState::Closed);
                return Err(ConsumerError::Subscribe(e));
            }
        };

        tracing::info!(
            topic = %self.config.topic,
            group = %self.config.group,
            consumer = %self.config.consumer_name,
            failure_policy = ?self.config.failure_policy,
            handlers = self.registry.len(),
            "Consumer started"
        );

        let mut stats = ConsumerStats::default();
        let mut backoff = ExponentialBackoff::with_config(self.config.backoff.clone());

        let result = loop {
            if cancel.is_cancelled() {
                break Ok(());
            }

            self.set_state(ConsumerState::Polling);

            let polled = tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ok(()),
                polled = subscription.poll(self.config.poll_timeout) => polled,
            };

            let message = match polled {
                Ok(Some(message)) => {
                    backoff.reset();
                    message
                }
                Ok(None) => continue,
                Err(e) => {
                    stats.poll_errors += 1;
                    ConsumerMetrics::record_poll_error();
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        error = %e,
                        attempt = backoff.attempt(),
                        delay_ms = delay.as_millis() as u64,
                        "Poll failed, backing off"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break Ok(()),
                        _ = tokio::time::sleep(delay) => continue,
                    }
                }
            };

            stats.consumed += 1;
            ConsumerMetrics::record_consumed();

            match self
                .process(subscription.as_mut(), &message, &cancel, &mut stats)
                .await
            {
                Ok(Step::Continue) => {}
                Ok(Step::Stop) => break Ok(()),
                Err(e) => break Err(e),
            }
        };

        self.set_state(ConsumerState::ShuttingDown);
        if let Err(e) = subscription.close().await {
            tracing::warn!(error = %e, "Failed to close subscription");
        }
        self.set_state(ConsumerState::Closed);

        match result {
            Ok(()) => {
                tracing::info!(
                    consumed = stats.consumed,
                    delivered = stats.delivered,
                    committed = stats.committed,
                    "Consumer stopped"
                );
                Ok(stats)
            }
            Err(e) => {
                tracing::error!(error = %e, consumed = stats.consumed, "Consumer stopped on error");
                Err(e)
            }
        }
    }

    async fn process(
        &self,
        subscription: &mut dyn QueueSubscription,
        message: &QueueMessage,
        cancel: &CancellationToken,
        stats: &mut ConsumerStats,
    ) -> Result<Step, ConsumerError> {
        let envelope = match NotificationEnvelope::decode(&message.payload) {
            Ok(envelope) => envelope,
            Err(e) => return self.on_decode_failure(subscription, message, e, stats).await,
        };

        self.set_state(ConsumerState::Processing);

        let span = tracing::info_span!(
            "deliver",
            notification_id = %envelope.id,
            notification_type = %envelope.notification_type(),
            position = %message.position,
        );
        self.deliver(subscription, message, &envelope, cancel, stats)
            .instrument(span)
            .await
    }

    async fn deliver(
        &self,
        subscription: &mut dyn QueueSubscription,
        message: &QueueMessage,
        envelope: &NotificationEnvelope,
        cancel: &CancellationToken,
        stats: &mut ConsumerStats,
    ) -> Result<Step, ConsumerError> {
        let handler = match self.registry.resolve(envelope) {
            Ok(handler) => handler,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping notification without handler");
                stats.no_handler += 1;
                DeliveryMetrics::record_skipped("no_handler");
                return Ok(self.commit(subscription, message, stats).await);
            }
        };

        let started = Instant::now();
        let outcome = handler.handle(envelope, cancel).await;
        let elapsed = started.elapsed().as_secs_f64();

        match outcome {
            Ok(DeliveryOutcome::Delivered) => {
                stats.delivered += 1;
                DeliveryMetrics::record_delivered(handler.name(), elapsed);
                Ok(self.commit(subscription, message, stats).await)
            }
            Ok(DeliveryOutcome::Skipped(reason)) => {
                tracing::warn!(handler = handler.name(), reason = reason.as_str(), "Notification skipped");
                stats.skipped += 1;
                DeliveryMetrics::record_skipped(reason.as_str());
                Ok(self.commit(subscription, message, stats).await)
            }
            Err(HandlerError::Cancelled) if cancel.is_cancelled() => {
                tracing::info!(handler = handler.name(), "Delivery interrupted by shutdown, leaving uncommitted");
                Ok(Step::Stop)
            }
            Err(e) => {
                DeliveryMetrics::record_failed(handler.name(), elapsed);
                tracing::error!(handler = handler.name(), error = %e, "Delivery failed");

                match self.config.failure_policy {
                    FailurePolicy::FailFast => Err(ConsumerError::Handler {
                        notification_id: envelope.id,
                        source: e,
                    }),
                    FailurePolicy::DeadLetter => {
                        self.dead_letter(message, format!("handler_error: {}", e), "handler_error", stats)
                            .await?;
                        Ok(self.commit(subscription, message, stats).await)
                    }
                }
            }
        }
    }

    async fn on_decode_failure(
        &self,
        subscription: &mut dyn QueueSubscription,
        message: &QueueMessage,
        error: serde_json::Error,
        stats: &mut ConsumerStats,
    ) -> Result<Step, ConsumerError> {
        stats.decode_failures += 1;
        ConsumerMetrics::record_decode_failure();

        let max = self.config.max_decode_attempts;
        if max > 0 && message.delivery_count >= max {
            tracing::error!(
                position = %message.position,
                delivery_count = message.delivery_count,
                error = %error,
                "Undecodable message reached the attempt limit, dead-lettering"
            );
            self.dead_letter(message, format!("decode_error: {}", error), "decode_error", stats)
                .await?;
            return Ok(self.commit(subscription, message, stats).await);
        }

        tracing::error!(
            position = %message.position,
            delivery_count = message.delivery_count,
            error = %error,
            "Failed to decode message, leaving uncommitted"
        );
        Ok(Step::Continue)
    }

    async fn dead_letter(
        &self,
        message: &QueueMessage,
        reason: String,
        kind: &str,
        stats: &mut ConsumerStats,
    ) -> Result<(), ConsumerError> {
        match self.dead_letters.publish(message, reason).await {
            Ok(receipt) => {
                stats.dead_lettered += 1;
                ConsumerMetrics::record_dead_letter(kind);
                tracing::warn!(
                    position = %message.position,
                    dead_letter_topic = %self.dead_letters.topic(),
                    dead_letter_position = %receipt.position,
                    "Message dead-lettered"
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!(position = %message.position, error = %e, "Dead-letter publish failed");
                Err(ConsumerError::DeadLetter {
                    position: message.position.clone(),
                    source: e,
                })
            }
        }
    }

    async fn commit(
        &self,
        subscription: &mut dyn QueueSubscription,
        message: &QueueMessage,
        stats: &mut ConsumerStats,
    ) -> Step {
        self.set_state(ConsumerState::Committing);

        match subscription.commit(message).await {
            Ok(()) => {
                stats.committed += 1;
                ConsumerMetrics::record_commit();
            }
            Err(e) => {
                stats.commit_failures += 1;
                ConsumerMetrics::record_commit_failure();
                tracing::error!(
                    position = %message.position,
                    error = %e,
                    "Commit failed, message will be redelivered"
                );
            }
        }

        Step::Continue
    }
}
