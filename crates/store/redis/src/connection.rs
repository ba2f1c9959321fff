use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Client, ErrorKind, RedisError};
use tracing::info;

use sessionlock_store::{ConnectionFactory, StoreError};

use crate::config::RedisConfig;

/// Opens multiplexed connections for a [`ConnectionManager`].
///
/// One multiplexed connection carries every concurrent request, so the
/// manager only ever holds a single handle.
///
/// [`ConnectionManager`]: sessionlock_store::ConnectionManager
pub struct RedisConnectionFactory {
    client: Client,
    connection_timeout: Duration,
    operation_timeout: Duration,
}

impl RedisConnectionFactory {
    /// # Errors
    ///
    /// Returns [`StoreError::Configuration`] if the URL cannot be parsed.
    pub fn new(config: &RedisConfig) -> Result<Self, StoreError> {
        let url = config.connection_url()?;
        let client = Client::open(url.as_str())
            .map_err(|e| StoreError::Configuration(format!("invalid redis url: {e}")))?;
        Ok(Self {
            client,
            connection_timeout: config.connection_timeout,
            operation_timeout: config.operation_timeout,
        })
    }

    pub fn operation_timeout(&self) -> Duration {
        self.operation_timeout
    }
}

#[async_trait]
impl ConnectionFactory for RedisConnectionFactory {
    type Connection = MultiplexedConnection;

    async fn connect(&self) -> Result<MultiplexedConnection, StoreError> {
        let connect = self
            .client
            .get_multiplexed_async_connection_with_timeouts(
                self.operation_timeout,
                self.connection_timeout,
            );
        let connection = tokio::time::timeout(self.connection_timeout, connect)
            .await
            .map_err(|_| connect_timed_out(self.connection_timeout))?
            .map_err(|e| match map_redis_error(&e, self.connection_timeout) {
                StoreError::Timeout(d) => connect_timed_out(d),
                other => other,
            })?;

        let info = self.client.get_connection_info();
        info!(
            addr = %info.addr,
            db = info.redis.db,
            "connected to redis"
        );
        Ok(connection)
    }
}

/// A connect that never completes is a connectivity failure, unlike a slow
/// script call on an established connection.
fn connect_timed_out(timeout: Duration) -> StoreError {
    StoreError::Connection(format!("connect timed out after {timeout:?}"))
}

/// Classify a client error for the operation executor.
pub fn map_redis_error(err: &RedisError, timeout: Duration) -> StoreError {
    if err.kind() == ErrorKind::NoScriptError {
        StoreError::ScriptNotFound(err.to_string())
    } else if err.is_connection_dropped() {
        StoreError::Disposed(err.to_string())
    } else if err.is_timeout() {
        StoreError::Timeout(timeout)
    } else if err.is_connection_refusal() || err.is_io_error() {
        StoreError::Connection(err.to_string())
    } else if err.kind() == ErrorKind::TypeError {
        StoreError::Protocol(err.to_string())
    } else {
        StoreError::Backend(err.to_string())
    }
}
