use std::time::Duration;

use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};

use sessionlock_store::StoreError;

/// Connection settings for the Redis session store.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Host name or address.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Password sent with `AUTH`; percent-encoded into the URL.
    pub access_key: Option<String>,
    /// Connect with TLS (`rediss://`).
    pub ssl: bool,
    /// Logical database selected after connecting.
    pub database_id: i64,
    /// Full `redis://` or `rediss://` URL. Overrides every field above.
    pub connection_string: Option<String>,
    /// Upper bound on establishing a connection.
    pub connection_timeout: Duration,
    /// Upper bound on a single script round trip.
    pub operation_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: String::from("127.0.0.1"),
            port: 6379,
            access_key: None,
            ssl: false,
            database_id: 0,
            connection_string: None,
            connection_timeout: Duration::from_secs(5),
            operation_timeout: Duration::from_secs(1),
        }
    }
}

impl RedisConfig {
    /// Create a configuration from a full connection URL.
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            connection_string: Some(url.into()),
            ..Self::default()
        }
    }

    /// Render the URL handed to the Redis client.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Configuration`] for an empty host or a
    /// connection string that is not a `redis://`/`rediss://` URL.
    pub fn connection_url(&self) -> Result<String, StoreError> {
        if let Some(url) = self.connection_string.as_deref().map(str::trim) {
            if url.starts_with("redis://") || url.starts_with("rediss://") {
                return Ok(url.to_owned());
            }
            return Err(StoreError::Configuration(format!(
                "connection string must be a redis:// or rediss:// URL, got {url:?}"
            )));
        }

        if self.host.trim().is_empty() {
            return Err(StoreError::Configuration("host must not be empty".into()));
        }
        let scheme = if self.ssl { "rediss" } else { "redis" };
        let auth = self
            .access_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .map(|key| format!(":{}@", utf8_percent_encode(key, NON_ALPHANUMERIC)))
            .unwrap_or_default();
        Ok(format!(
            "{scheme}://{auth}{}:{}/{}",
            self.host.trim(),
            self.port,
            self.database_id
        ))
    }
}
