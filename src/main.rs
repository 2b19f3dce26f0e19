use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use notification_relay::config::Settings;
use notification_relay::consumer::{ConsumerConfig, NotificationConsumer};
use notification_relay::handlers::{
    EmailHandler, HandlerRegistry, SendGridMailer, WebhookHandler,
};
use notification_relay::publisher::{NotificationIntake, NotificationPublisher};
use notification_relay::queue::create_queue_backend;
use notification_relay::redis::{RedisHealth, RedisPool};
use notification_relay::server::{create_app, serve, AppState};
use notification_relay::shutdown::{
    shutdown_signal, ConsumerHandle, GracefulShutdown, ShutdownConfig,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    init_tracing();

    // Load configuration
    let settings = Settings::new().context("Failed to load configuration")?;
    tracing::info!(
        backend = %settings.queue.backend,
        topic = %settings.queue.topic,
        "Configuration loaded"
    );

    // Redis connection (only for the redis backend)
    let redis_health = Arc::new(RedisHealth::new());
    let redis_pool = if settings.queue.backend == "redis" {
        let pool = RedisPool::new(&settings.redis, redis_health.clone())
            .context("Failed to create Redis pool")?;
        Some(Arc::new(pool))
    } else {
        None
    };

    // Queue backend, publisher and intake
    let queue_backend = create_queue_backend(&settings.queue, redis_pool.clone());
    let publisher = Arc::new(NotificationPublisher::from_settings(
        queue_backend.clone(),
        &settings.queue,
    ));
    let intake = NotificationIntake::new(publisher.clone());

    let cancel = CancellationToken::new();

    // Consumer loop in background
    let consumer_handle: Option<ConsumerHandle> = if settings.consumer.enabled {
        let registry = Arc::new(build_registry(&settings)?);
        let consumer = NotificationConsumer::new(
            queue_backend.clone(),
            registry,
            publisher.clone(),
            ConsumerConfig::from_settings(&settings.queue, &settings.consumer),
        );

        let token = cancel.clone();
        Some(tokio::spawn(async move {
            let result = consumer.run(token.clone()).await;
            if result.is_err() {
                // A fatal consumer error takes the whole process down
                token.cancel();
            }
            result
        }))
    } else {
        tracing::info!("Consumer disabled");
        None
    };

    // HTTP server, or just wait for a signal when it is disabled
    let server = if settings.server.enabled {
        let mut state = AppState::new(settings.clone(), intake, queue_backend.clone());
        if redis_pool.is_some() {
            state = state.with_redis_health(redis_health.clone());
        }
        Some((settings.server_addr(), create_app(state)))
    } else {
        tracing::info!("HTTP server disabled");
        None
    };

    let service_cancel = cancel.clone();
    let service = async move {
        match server {
            Some((addr, app)) => serve(&addr, app, service_cancel)
                .await
                .with_context(|| format!("HTTP server on {} failed", addr)),
            None => {
                shutdown_signal(service_cancel).await;
                Ok(())
            }
        }
    };

    // Shutdown runs on every exit path, including a failed bind
    let shutdown = GracefulShutdown::with_config(
        cancel,
        queue_backend,
        ShutdownConfig::from_settings(&settings),
    );
    let (served, result) = shutdown.supervise(service, consumer_handle).await;
    served?;

    if let Some(error) = result.consumer_error {
        anyhow::bail!("Consumer stopped on error: {}", error);
    }

    tracing::info!("Relay shutdown complete");
    Ok(())
}

/// Webhook delivery is always available; email only with a mail provider key.
fn build_registry(settings: &Settings) -> Result<HandlerRegistry> {
    let mut registry = HandlerRegistry::new();

    let webhook = WebhookHandler::from_settings(&settings.webhook)
        .context("Failed to build webhook HTTP client")?;
    registry.register(Arc::new(webhook))?;

    match SendGridMailer::from_settings(reqwest::Client::new(), &settings.email) {
        Some(mailer) => {
            let email = EmailHandler::from_settings(Arc::new(mailer), &settings.email);
            registry.register(Arc::new(email))?;
        }
        None => {
            tracing::warn!("email.api_key not set, EMAIL notifications will be dropped");
        }
    }

    tracing::info!(channels = ?registry.channels(), "Handler registry ready");
    Ok(registry)
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let json = std::env::var("LOG_FORMAT")
        .map(|f| f.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
