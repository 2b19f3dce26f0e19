//! Graceful shutdown handling for the relay.
//!
//! Shutdown runs in order:
//! 1. Cancel the shared token (stops the HTTP server and the consumer loop)
//! 2. Wait for the consumer to close its subscription
//! 3. Flush the queue backend

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::consumer::{ConsumerError, ConsumerStats};
use crate::queue::QueueBackend;

/// Handle of a spawned consumer loop
pub type ConsumerHandle = JoinHandle<Result<ConsumerStats, ConsumerError>>;

/// Configuration for graceful shutdown behavior
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Time to wait for the consumer to stop (default: 10 seconds)
    pub consumer_timeout: Duration,
    /// Time to wait for the queue flush (default: 5 seconds)
    pub flush_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            consumer_timeout: Duration::from_secs(10),
            flush_timeout: Duration::from_secs(5),
        }
    }
}

impl ShutdownConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            consumer_timeout: settings.consumer.shutdown_timeout(),
            ..Default::default()
        }
    }
}

/// Wait for Ctrl+C or SIGTERM, or for the token to be cancelled elsewhere,
/// then cancel the token.
pub async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
        _ = cancel.cancelled() => {
            tracing::info!("Shutdown requested internally");
        }
    }

    cancel.cancel();
}

/// Coordinates stopping the consumer and releasing the queue backend
pub struct GracefulShutdown {
    cancel: CancellationToken,
    queue_backend: Arc<dyn QueueBackend>,
    config: ShutdownConfig,
}

impl GracefulShutdown {
    pub fn new(cancel: CancellationToken, queue_backend: Arc<dyn QueueBackend>) -> Self {
        Self::with_config(cancel, queue_backend, ShutdownConfig::default())
    }

    pub fn with_config(
        cancel: CancellationToken,
        queue_backend: Arc<dyn QueueBackend>,
        config: ShutdownConfig,
    ) -> Self {
        Self {
            cancel,
            queue_backend,
            config,
        }
    }

    /// Execute the shutdown sequence
    #[tracing::instrument(name = "graceful_shutdown", skip(self, consumer))]
    pub async fn execute(&self, reason: &str, consumer: Option<ConsumerHandle>) -> ShutdownResult {
        let start = std::time::Instant::now();
        let mut result = ShutdownResult::default();

        tracing::info!(reason = %reason, "Starting graceful shutdown - Phase 1: Cancelling tasks");
        self.cancel.cancel();

        if let Some(handle) = consumer {
            tracing::info!("Phase 2: Waiting for consumer to stop");
            self.wait_for_consumer(handle, &mut result).await;
        } else {
            result.consumer_stopped = true;
        }

        tracing::info!("Phase 3: Flushing queue backend");
        result.flushed = self.flush().await;

        result.duration = start.elapsed();
        result.success = result.consumer_stopped && result.flushed && result.consumer_error.is_none();

        tracing::info!(
            consumer_stopped = result.consumer_stopped,
            flushed = result.flushed,
            duration_ms = result.duration.as_millis() as u64,
            "Graceful shutdown completed"
        );

        result
    }

    /// Drive the front service to completion, then run the shutdown
    /// sequence whether it stopped cleanly or failed.
    pub async fn supervise<F, E>(
        &self,
        service: F,
        consumer: Option<ConsumerHandle>,
    ) -> (Result<(), E>, ShutdownResult)
    where
        F: Future<Output = Result<(), E>>,
        E: Display,
    {
        let served = service.await;

        let reason = match &served {
            Ok(()) => "process exit".to_string(),
            Err(e) => {
                tracing::error!(error = %e, "Service failed, shutting down");
                format!("service error: {}", e)
            }
        };

        let result = self.execute(&reason, consumer).await;
        (served, result)
    }

    async fn wait_for_consumer(&self, handle: ConsumerHandle, result: &mut ShutdownResult) {
        let abort = handle.abort_handle();

        match timeout(self.config.consumer_timeout, handle).await {
            Ok(Ok(Ok(stats))) => {
                result.consumer_stopped = true;
                result.consumer_stats = Some(stats);
            }
            Ok(Ok(Err(e))) => {
                result.consumer_stopped = true;
                result.consumer_error = Some(e.to_string());
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Consumer task panicked or was aborted");
                result.consumer_error = Some(e.to_string());
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.config.consumer_timeout.as_millis() as u64,
                    "Consumer did not stop in time, aborting"
                );
                abort.abort();
            }
        }
    }

    async fn flush(&self) -> bool {
        match timeout(self.config.flush_timeout, self.queue_backend.flush()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Queue flush failed");
                false
            }
            Err(_) => {
                tracing::warn!("Queue flush timed out");
                false
            }
        }
    }
}

/// Result of a graceful shutdown operation
#[derive(Debug, Default)]
pub struct ShutdownResult {
    /// Every phase finished cleanly and the consumer exited without error
    pub success: bool,
    /// The consumer task finished before the timeout
    pub consumer_stopped: bool,
    pub consumer_stats: Option<ConsumerStats>,
    /// Fatal consumer error, if the loop stopped on one
    pub consumer_error: Option<String>,
    pub flushed: bool,
    /// Total time taken for shutdown
    pub duration: Duration,
}
