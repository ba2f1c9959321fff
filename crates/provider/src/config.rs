use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use sessionlock_core::serializer_for;
use sessionlock_store::ReconnectPolicy;

use crate::error::ProviderError;

/// Store backends known to [`create_store`](crate::factory::create_store).
pub const BACKENDS: &[&str] = &["memory", "redis"];

/// Settings of one session state provider.
///
/// Field names in TOML and in the host settings map use the same camelCase
/// spelling (`retryTimeoutMs`, `throwOnError`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProviderConfig {
    /// Which store to use: `"redis"` or `"memory"`.
    pub backend: String,
    /// Redis host name or address.
    pub host: String,
    /// Redis port.
    pub port: u16,
    /// Password sent with `AUTH`.
    pub access_key: Option<String>,
    /// Connect with TLS.
    pub ssl: bool,
    /// Logical database selected after connecting.
    pub database_id: i64,
    /// Full `redis://` URL; overrides host, port, access key, ssl and database.
    pub connection_string: Option<String>,
    /// Prefix of every session key. Sessions of different applications never
    /// collide.
    pub application_name: String,
    /// Upper bound on establishing a connection.
    pub connection_timeout_ms: u64,
    /// Upper bound on a single script round trip.
    pub operation_timeout_ms: u64,
    /// Budget of the retry loop around each store call. `0` disables retries.
    pub retry_timeout_ms: u64,
    /// Re-raise failures to the host instead of returning an empty result.
    pub throw_on_error: bool,
    /// TTL of an exclusive lock.
    pub request_timeout_secs: u64,
    /// Session timeout used when the record does not carry one.
    pub session_timeout_secs: u64,
    /// Minimum gap between two forced reconnects.
    pub reconnect_frequency_secs: u64,
    /// How long errors must keep arriving before a reconnect is forced.
    pub reconnect_error_threshold_secs: u64,
    /// Value serializer: `"binary"` or `"json"`.
    pub serializer: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            backend: "redis".to_owned(),
            host: "127.0.0.1".to_owned(),
            port: 6379,
            access_key: None,
            ssl: false,
            database_id: 0,
            connection_string: None,
            application_name: default_application_name(),
            connection_timeout_ms: 5000,
            operation_timeout_ms: 1000,
            retry_timeout_ms: 5000,
            throw_on_error: false,
            request_timeout_secs: 110,
            session_timeout_secs: 1200,
            reconnect_frequency_secs: 60,
            reconnect_error_threshold_secs: 30,
            serializer: "binary".to_owned(),
        }
    }
}

/// File stem of the running executable, or `sessionlock`.
fn default_application_name() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|path| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "sessionlock".to_owned())
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ProviderError> {
    value
        .trim()
        .parse()
        .map_err(|_| ProviderError::Config(format!("{key}: cannot parse {value:?}")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ProviderError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ProviderError::Config(format!(
            "{key}: expected a boolean, got {value:?}"
        ))),
    }
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_owned())
}

#[derive(Deserialize)]
struct ConfigFile {
    #[serde(default)]
    provider: ProviderConfig,
}

impl ProviderConfig {
    /// Build a configuration from host-supplied settings.
    ///
    /// Keys are matched case-insensitively. Unknown keys are ignored so hosts
    /// can pass their whole provider section through.
    pub fn from_settings(settings: &HashMap<String, String>) -> Result<Self, ProviderError> {
        let mut config = Self::default();
        for (key, value) in settings {
            match key.to_ascii_lowercase().as_str() {
                "backend" => config.backend = value.trim().to_owned(),
                "host" => config.host = value.trim().to_owned(),
                "port" => config.port = parse(key, value)?,
                "accesskey" => config.access_key = non_empty(value),
                "ssl" => config.ssl = parse_bool(key, value)?,
                "databaseid" => config.database_id = parse(key, value)?,
                "connectionstring" => config.connection_string = non_empty(value),
                "applicationname" => {
                    if let Some(name) = non_empty(value) {
                        config.application_name = name;
                    }
                }
                "connectiontimeoutms" => config.connection_timeout_ms = parse(key, value)?,
                "operationtimeoutms" => config.operation_timeout_ms = parse(key, value)?,
                "retrytimeoutms" => config.retry_timeout_ms = parse(key, value)?,
                "throwonerror" => config.throw_on_error = parse_bool(key, value)?,
                "requesttimeoutsecs" => config.request_timeout_secs = parse(key, value)?,
                "sessiontimeoutsecs" => config.session_timeout_secs = parse(key, value)?,
                "reconnectfrequencysecs" => config.reconnect_frequency_secs = parse(key, value)?,
                "reconnecterrorthresholdsecs" => {
                    config.reconnect_error_threshold_secs = parse(key, value)?;
                }
                "serializer" => config.serializer = value.trim().to_owned(),
                _ => debug!(key = %key, "ignoring unknown provider setting"),
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// Parse the `[provider]` table of a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self, ProviderError> {
        let file: ConfigFile =
            toml::from_str(source).map_err(|e| ProviderError::Config(e.to_string()))?;
        file.provider.validate()?;
        Ok(file.provider)
    }

    /// Check the settings for values that can never work.
    pub fn validate(&self) -> Result<(), ProviderError> {
        let backend = self.backend.to_ascii_lowercase();
        if !BACKENDS.contains(&backend.as_str()) {
            return Err(ProviderError::Config(format!(
                "unknown backend {:?}, expected one of {BACKENDS:?}",
                self.backend
            )));
        }
        serializer_for(&self.serializer)
            .map_err(|e| ProviderError::Config(e.to_string()))?;
        if self.application_name.trim().is_empty() {
            return Err(ProviderError::Config(
                "applicationName must not be empty".into(),
            ));
        }
        if backend == "redis" && self.connection_string.is_none() {
            if self.host.trim().is_empty() {
                return Err(ProviderError::Config("host must not be empty".into()));
            }
            if self.port == 0 {
                return Err(ProviderError::Config("port must not be 0".into()));
            }
        }
        if self.request_timeout_secs == 0 || self.session_timeout_secs == 0 {
            return Err(ProviderError::Config(
                "requestTimeoutSecs and sessionTimeoutSecs must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn retry_timeout(&self) -> Duration {
        Duration::from_millis(self.retry_timeout_ms)
    }

    /// TTL of an exclusive lock.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            frequency: Duration::from_secs(self.reconnect_frequency_secs),
            error_threshold: Duration::from_secs(self.reconnect_error_threshold_secs),
        }
    }

    #[cfg(feature = "redis")]
    pub fn redis_config(&self) -> sessionlock_store_redis::RedisConfig {
        sessionlock_store_redis::RedisConfig {
            host: self.host.clone(),
            port: self.port,
            access_key: self.access_key.clone(),
            ssl: self.ssl,
            database_id: self.database_id,
            connection_string: self.connection_string.clone(),
            connection_timeout: Duration::from_millis(self.connection_timeout_ms),
            operation_timeout: Duration::from_millis(self.operation_timeout_ms),
        }
    }
}
