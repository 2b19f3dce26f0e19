//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use super::{
    COMMITS_TOTAL, COMMIT_FAILURES_TOTAL, CONSUMER_STATE, DEAD_LETTERS_TOTAL,
    DECODE_FAILURES_TOTAL, DELIVERIES_TOTAL, DELIVERY_FAILURES_TOTAL, DELIVERY_SKIPPED_TOTAL,
    HANDLER_LATENCY, MESSAGES_CONSUMED_TOTAL, NOTIFICATIONS_ACCEPTED_TOTAL,
    NOTIFICATIONS_REJECTED_TOTAL, POLL_ERRORS_TOTAL, PUBLISH_FAILURES_TOTAL, PUBLISH_LATENCY,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

/// Intake and publish metrics
pub struct PublishMetrics;

impl PublishMetrics {
    pub fn record_accepted(notification_type: &str) {
        NOTIFICATIONS_ACCEPTED_TOTAL
            .with_label_values(&[notification_type])
            .inc();
    }

    pub fn record_rejected() {
        NOTIFICATIONS_REJECTED_TOTAL.inc();
    }

    /// `reason` is one of `serialization`, `broker`, `timeout`
    pub fn record_failure(reason: &str) {
        PUBLISH_FAILURES_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn observe_latency(seconds: f64) {
        PUBLISH_LATENCY.observe(seconds);
    }
}

/// Per-channel delivery metrics
pub struct DeliveryMetrics;

impl DeliveryMetrics {
    pub fn record_delivered(channel: &str, seconds: f64) {
        DELIVERIES_TOTAL.with_label_values(&[channel]).inc();
        HANDLER_LATENCY.with_label_values(&[channel]).observe(seconds);
    }

    pub fn record_failed(channel: &str, seconds: f64) {
        DELIVERY_FAILURES_TOTAL.with_label_values(&[channel]).inc();
        HANDLER_LATENCY.with_label_values(&[channel]).observe(seconds);
    }

    /// `reason` is one of `missing_recipient`, `missing_content`, `missing_endpoint`, `no_handler`
    pub fn record_skipped(reason: &str) {
        DELIVERY_SKIPPED_TOTAL.with_label_values(&[reason]).inc();
    }
}

/// Consumer loop metrics
pub struct ConsumerMetrics;

impl ConsumerMetrics {
    pub fn record_consumed() {
        MESSAGES_CONSUMED_TOTAL.inc();
    }

    pub fn record_decode_failure() {
        DECODE_FAILURES_TOTAL.inc();
    }

    /// `reason` is one of `handler_error`, `decode_error`
    pub fn record_dead_letter(reason: &str) {
        DEAD_LETTERS_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn record_commit() {
        COMMITS_TOTAL.inc();
    }

    pub fn record_commit_failure() {
        COMMIT_FAILURES_TOTAL.inc();
    }

    pub fn record_poll_error() {
        POLL_ERRORS_TOTAL.inc();
    }

    pub fn set_state(state: i64) {
        CONSUMER_STATE.set(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::SkipReason;

    #[test]
    fn test_skip_reasons_are_labelled() {
        for reason in [
            SkipReason::MissingRecipient,
            SkipReason::MissingContent,
            SkipReason::MissingEndpoint,
        ] {
            let counter = DELIVERY_SKIPPED_TOTAL.with_label_values(&[reason.as_str()]);
            let before = counter.get();
            DeliveryMetrics::record_skipped(reason.as_str());
            assert!(counter.get() > before);
        }

        assert_eq!(SkipReason::MissingContent.as_str(), "missing_content");
    }
}
