//! Prometheus metrics for the notification relay.
//!
//! - Intake metrics (accepted, rejected, publish failures and latency)
//! - Delivery metrics per channel (delivered, failed, skipped, handler latency)
//! - Consumer loop metrics (consumed, decode failures, dead letters, commits, poll errors, state)
//! - Redis connection status

mod helpers;

pub use helpers::{encode_metrics, ConsumerMetrics, DeliveryMetrics, PublishMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge, Histogram, HistogramVec, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "relay";

lazy_static! {
    // ============================================================================
    // Intake Metrics
    // ============================================================================

    /// Notifications accepted and queued, by type
    pub static ref NOTIFICATIONS_ACCEPTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_notifications_accepted_total", METRIC_PREFIX),
        "Total notifications accepted and queued",
        &["type"]
    ).unwrap();

    /// Notifications rejected by validation
    pub static ref NOTIFICATIONS_REJECTED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_notifications_rejected_total", METRIC_PREFIX),
        "Total notifications rejected by validation"
    ).unwrap();

    /// Publish failures by reason (serialization, broker, timeout)
    pub static ref PUBLISH_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_publish_failures_total", METRIC_PREFIX),
        "Total failed queue appends",
        &["reason"]
    ).unwrap();

    /// Queue append latency
    pub static ref PUBLISH_LATENCY: Histogram = register_histogram!(
        format!("{}_publish_latency_seconds", METRIC_PREFIX),
        "Queue append latency in seconds",
        vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
    ).unwrap();

    // ============================================================================
    // Delivery Metrics
    // ============================================================================

    /// Successful deliveries by channel
    pub static ref DELIVERIES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_deliveries_total", METRIC_PREFIX),
        "Total successful deliveries",
        &["channel"]
    ).unwrap();

    /// Failed deliveries by channel
    pub static ref DELIVERY_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_delivery_failures_total", METRIC_PREFIX),
        "Total failed deliveries",
        &["channel"]
    ).unwrap();

    /// Messages committed without delivery, by reason
    pub static ref DELIVERY_SKIPPED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_delivery_skipped_total", METRIC_PREFIX),
        "Total messages skipped without delivery",
        &["reason"]
    ).unwrap();

    /// Handler latency by channel
    pub static ref HANDLER_LATENCY: HistogramVec = register_histogram_vec!(
        format!("{}_handler_latency_seconds", METRIC_PREFIX),
        "Handler execution latency in seconds",
        &["channel"],
        vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    ).unwrap();

    // ============================================================================
    // Consumer Metrics
    // ============================================================================

    /// Messages read from the queue
    pub static ref MESSAGES_CONSUMED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_consumed_total", METRIC_PREFIX),
        "Total messages read from the queue"
    ).unwrap();

    /// Payloads that could not be decoded
    pub static ref DECODE_FAILURES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_decode_failures_total", METRIC_PREFIX),
        "Total queue payloads that failed to decode"
    ).unwrap();

    /// Messages moved to the dead-letter topic, by reason
    pub static ref DEAD_LETTERS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_dead_letters_total", METRIC_PREFIX),
        "Total messages published to the dead-letter topic",
        &["reason"]
    ).unwrap();

    /// Successful commits
    pub static ref COMMITS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_commits_total", METRIC_PREFIX),
        "Total read positions committed"
    ).unwrap();

    /// Failed commits
    pub static ref COMMIT_FAILURES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_commit_failures_total", METRIC_PREFIX),
        "Total failed commits"
    ).unwrap();

    /// Poll errors
    pub static ref POLL_ERRORS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_poll_errors_total", METRIC_PREFIX),
        "Total queue poll errors"
    ).unwrap();

    /// Consumer state (0=idle, 1=polling, 2=processing, 3=committing, 4=shutting down, 5=closed)
    pub static ref CONSUMER_STATE: IntGauge = register_int_gauge!(
        format!("{}_consumer_state", METRIC_PREFIX),
        "Consumer loop state (0=idle, 1=polling, 2=processing, 3=committing, 4=shutting_down, 5=closed)"
    ).unwrap();

    // ============================================================================
    // Redis Metrics
    // ============================================================================

    /// Redis connection status (1 = connected, 0 = disconnected)
    pub static ref REDIS_CONNECTION_STATUS: IntGauge = register_int_gauge!(
        format!("{}_redis_connection_status", METRIC_PREFIX),
        "Redis connection status (1=connected, 0=disconnected)"
    ).unwrap();
}
