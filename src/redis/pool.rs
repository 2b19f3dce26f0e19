//! Redis connection pool for the stream queue backend.
//!
//! Appends and acknowledgements share one multiplexed connection. Blocking
//! reads get a dedicated connection each, see [`RedisPool::dedicated_connection`].

use std::sync::Arc;

use redis::aio::MultiplexedConnection;
use redis::{Client, RedisError, RedisResult, ToRedisArgs};
use tokio::sync::RwLock;

use crate::config::RedisSettings;

use super::RedisHealth;

/// Error type for Redis pool operations.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// Redis operation failed
    #[error("Redis error: {0}")]
    Redis(#[from] RedisError),
}

/// Redis connection pool for queue operations.
pub struct RedisPool {
    client: Client,

    /// Multiplexed connection (shared across tasks)
    connection: RwLock<Option<MultiplexedConnection>>,

    health: Arc<RedisHealth>,
}

impl RedisPool {
    /// Create a new Redis pool. No connection is made until first use.
    pub fn new(settings: &RedisSettings, health: Arc<RedisHealth>) -> Result<Self, PoolError> {
        let client = Client::open(settings.url.as_str())?;

        Ok(Self {
            client,
            connection: RwLock::new(None),
            health,
        })
    }

    /// Get the shared connection, establishing it if none exists.
    pub async fn get_connection(&self) -> Result<MultiplexedConnection, PoolError> {
        {
            let conn = self.connection.read().await;
            if let Some(ref c) = *conn {
                return Ok(c.clone());
            }
        }

        self.connect().await
    }

    async fn connect(&self) -> Result<MultiplexedConnection, PoolError> {
        let mut conn_guard = self.connection.write().await;

        // Another task may have connected while we waited
        if let Some(ref c) = *conn_guard {
            return Ok(c.clone());
        }

        self.health.set_reconnecting();

        match self.client.get_multiplexed_async_connection().await {
            Ok(conn) => {
                *conn_guard = Some(conn.clone());
                self.health.set_connected();
                tracing::info!("Redis pool connection established");
                Ok(conn)
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to connect to Redis");
                Err(PoolError::Redis(e))
            }
        }
    }

    /// Open a connection that is not shared with other callers.
    ///
    /// Used for `XREADGROUP ... BLOCK`, which would otherwise stall every
    /// command queued behind it on the shared connection.
    pub async fn dedicated_connection(&self) -> Result<MultiplexedConnection, PoolError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                self.health.set_reconnecting();
                PoolError::Redis(e)
            })
    }

    /// Execute a command on the shared connection.
    ///
    /// Connection-level failures drop the cached connection so the next call
    /// reconnects.
    pub async fn execute<F, T, Fut>(&self, f: F) -> Result<T, PoolError>
    where
        F: FnOnce(MultiplexedConnection) -> Fut,
        Fut: std::future::Future<Output = RedisResult<T>>,
    {
        let conn = self.get_connection().await?;

        match f(conn).await {
            Ok(result) => Ok(result),
            Err(e) => {
                if is_connection_error(&e) {
                    self.reset_connection().await;
                }
                Err(PoolError::Redis(e))
            }
        }
    }

    /// Forget the shared connection after a connection-level failure.
    pub async fn reset_connection(&self) {
        let mut conn_guard = self.connection.write().await;
        *conn_guard = None;
        self.health.set_reconnecting();
    }

    /// Ping Redis to check connectivity.
    pub async fn ping(&self) -> Result<(), PoolError> {
        self.execute(|mut conn| async move {
            let _: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok(())
        })
        .await
    }
}

/// Whether an error means the connection itself is unusable
pub fn is_connection_error(err: &RedisError) -> bool {
    err.is_connection_dropped() || err.is_io_error() || err.is_connection_refusal()
}

/// Stream commands used by the queue backend.
#[async_trait::async_trait]
pub trait RedisPoolExt {
    /// `XADD key MAXLEN ~ maxlen * field value ...`, returns the entry id.
    async fn xadd_maxlen<F, V>(
        &self,
        key: &str,
        maxlen: usize,
        fields: &[(F, V)],
    ) -> Result<String, PoolError>
    where
        F: ToRedisArgs + Send + Sync,
        V: ToRedisArgs + Send + Sync;

    /// `XGROUP CREATE key group 0 MKSTREAM`. Returns false when the group
    /// already existed.
    async fn xgroup_create_mkstream(&self, key: &str, group: &str) -> Result<bool, PoolError>;

    /// `XACK key group id`, returns the number of entries acknowledged.
    async fn xack(&self, key: &str, group: &str, id: &str) -> Result<u64, PoolError>;
}

#[async_trait::async_trait]
impl RedisPoolExt for RedisPool {
    async fn xadd_maxlen<F, V>(
        &self,
        key: &str,
        maxlen: usize,
        fields: &[(F, V)],
    ) -> Result<String, PoolError>
    where
        F: ToRedisArgs + Send + Sync,
        V: ToRedisArgs + Send + Sync,
    {
        let mut cmd = redis::cmd("XADD");
        cmd.arg(key).arg("MAXLEN").arg("~").arg(maxlen).arg("*");
        for (field, value) in fields {
            cmd.arg(field).arg(value);
        }

        self.execute(|mut conn| async move {
            let id: String = cmd.query_async(&mut conn).await?;
            Ok(id)
        })
        .await
    }

    async fn xgroup_create_mkstream(&self, key: &str, group: &str) -> Result<bool, PoolError> {
        let result = self
            .execute(|mut conn| async move {
                let _: () = redis::cmd("XGROUP")
                    .arg("CREATE")
                    .arg(key)
                    .arg(group)
                    .arg("0")
                    .arg("MKSTREAM")
                    .query_async(&mut conn)
                    .await?;
                Ok(())
            })
            .await;

        match result {
            Ok(()) => Ok(true),
            Err(PoolError::Redis(e)) if e.code() == Some("BUSYGROUP") => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn xack(&self, key: &str, group: &str, id: &str) -> Result<u64, PoolError> {
        self.execute(|mut conn| async move {
            let acked: u64 = redis::cmd("XACK")
                .arg(key)
                .arg(group)
                .arg(id)
                .query_async(&mut conn)
                .await?;
            Ok(acked)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(url: &str) -> RedisSettings {
        RedisSettings {
            url: url.to_string(),
        }
    }

    #[test]
    fn test_pool_creation_is_lazy() {
        let health = Arc::new(RedisHealth::new());
        let pool = RedisPool::new(&settings("redis://localhost:6379"), health.clone());

        assert!(pool.is_ok());
        assert!(!health.is_healthy());
    }

    #[test]
    fn test_invalid_url_rejected() {
        let health = Arc::new(RedisHealth::new());
        assert!(RedisPool::new(&settings("not a redis url"), health).is_err());
    }
}
