mod settings;

pub use settings::{
    ConsumerSettings, EmailSettings, QueueSettings, RedisSettings, ServerSettings, Settings,
    WebhookSettings,
};
