use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::consumer::FailurePolicy;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub queue: QueueSettings,
    #[serde(default)]
    pub consumer: ConsumerSettings,
    #[serde(default)]
    pub email: EmailSettings,
    #[serde(default)]
    pub webhook: WebhookSettings,
    #[serde(default)]
    pub redis: RedisSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    /// Serve the intake API
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Maximum accepted request body size
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueSettings {
    /// `"memory"` or `"redis"`
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,
    #[serde(default = "default_consumer_name")]
    pub consumer_name: String,
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_ms: u64,
    #[serde(default = "default_publish_timeout")]
    pub publish_timeout_ms: u64,
    /// Approximate stream cap (Redis backend)
    #[serde(default = "default_max_stream_length")]
    pub max_stream_length: usize,
    #[serde(default = "default_redis_prefix")]
    pub redis_prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsumerSettings {
    /// Run the consumer worker in this process
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    #[serde(default = "default_dead_letter_topic")]
    pub dead_letter_topic: String,
    /// Dead-letter undecodable messages after this many deliveries (0 = never)
    #[serde(default)]
    pub max_decode_attempts: u32,
    #[serde(default = "default_backoff_initial")]
    pub backoff_initial_delay_ms: u64,
    #[serde(default = "default_backoff_max")]
    pub backoff_max_delay_ms: u64,
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailSettings {
    /// Mail provider API key; the email handler is only registered when set
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_email_api_base_url")]
    pub api_base_url: String,
    #[serde(default)]
    pub from_address: String,
    #[serde(default = "default_from_name")]
    pub from_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookSettings {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisSettings {
    #[serde(default = "default_redis_url")]
    pub url: String,
}

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_body_limit() -> usize {
    64 * 1024
}

fn default_backend() -> String {
    "memory".to_string()
}

fn default_topic() -> String {
    "notifications".to_string()
}

fn default_consumer_group() -> String {
    "notification-processor".to_string()
}

fn default_consumer_name() -> String {
    "relay-worker".to_string()
}

fn default_poll_timeout() -> u64 {
    1000
}

fn default_publish_timeout() -> u64 {
    5000
}

fn default_max_stream_length() -> usize {
    100_000
}

fn default_redis_prefix() -> String {
    "relay:stream".to_string()
}

fn default_dead_letter_topic() -> String {
    "notifications.dlq".to_string()
}

fn default_backoff_initial() -> u64 {
    100
}

fn default_backoff_max() -> u64 {
    30_000
}

fn default_shutdown_timeout() -> u64 {
    10_000
}

fn default_email_api_base_url() -> String {
    "https://api.sendgrid.com".to_string()
}

fn default_from_name() -> String {
    "Notification System".to_string()
}

fn default_user_agent() -> String {
    "notification-relay".to_string()
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

impl Settings {
    /// Load settings from defaults, `config/default`, `config/{RUN_MODE}` and
    /// `RELAY_*` environment variables (`RELAY_QUEUE__BACKEND=redis`).
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", 8080)?
            .set_default("queue.backend", default_backend())?
            .set_default("queue.topic", default_topic())?
            .set_default("consumer.failure_policy", "fail_fast")?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(
                Environment::with_prefix("RELAY")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject combinations that cannot run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.queue.backend.as_str() {
            "memory" | "redis" => {}
            other => {
                return Err(ConfigError::Message(format!(
                    "queue.backend must be \"memory\" or \"redis\", got \"{}\"",
                    other
                )))
            }
        }

        if self.queue.topic.trim().is_empty() {
            return Err(ConfigError::Message("queue.topic must not be empty".into()));
        }

        if self.consumer.failure_policy == FailurePolicy::DeadLetter
            && self.consumer.dead_letter_topic == self.queue.topic
        {
            return Err(ConfigError::Message(
                "consumer.dead_letter_topic must differ from queue.topic".into(),
            ));
        }

        if self.email.api_key.is_some() && self.email.from_address.trim().is_empty() {
            return Err(ConfigError::Message(
                "email.from_address is required when email.api_key is set".into(),
            ));
        }

        Ok(())
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl QueueSettings {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
}

impl ConsumerSettings {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            topic: default_topic(),
            consumer_group: default_consumer_group(),
            consumer_name: default_consumer_name(),
            poll_timeout_ms: default_poll_timeout(),
            publish_timeout_ms: default_publish_timeout(),
            max_stream_length: default_max_stream_length(),
            redis_prefix: default_redis_prefix(),
        }
    }
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_policy: FailurePolicy::default(),
            dead_letter_topic: default_dead_letter_topic(),
            max_decode_attempts: 0,
            backoff_initial_delay_ms: default_backoff_initial(),
            backoff_max_delay_ms: default_backoff_max(),
            shutdown_timeout_ms: default_shutdown_timeout(),
        }
    }
}

impl Default for EmailSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base_url: default_email_api_base_url(),
            from_address: String::new(),
            from_name: default_from_name(),
        }
    }
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
        }
    }
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
        }
    }
}
