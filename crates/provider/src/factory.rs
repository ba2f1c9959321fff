use std::sync::Arc;

use sessionlock_store::ScriptedStore;
use sessionlock_store_memory::MemoryScriptedStore;
#[cfg(feature = "redis")]
use sessionlock_store_redis::RedisScriptedStore;
use tracing::info;

use crate::config::ProviderConfig;
use crate::error::ProviderError;

/// Construct the scripted store named by `config.backend`.
///
/// Connecting is lazy; the first store call opens the connection.
pub fn create_store(config: &ProviderConfig) -> Result<Arc<dyn ScriptedStore>, ProviderError> {
    match config.backend.to_ascii_lowercase().as_str() {
        "memory" => {
            info!(application = %config.application_name, "using in-process session store");
            Ok(Arc::new(MemoryScriptedStore::new()))
        }
        #[cfg(feature = "redis")]
        "redis" => create_redis(config),
        other => Err(ProviderError::Config(format!(
            "unsupported store backend: {other} (is the feature enabled?)"
        ))),
    }
}

#[cfg(feature = "redis")]
fn create_redis(config: &ProviderConfig) -> Result<Arc<dyn ScriptedStore>, ProviderError> {
    let redis_config = config.redis_config();
    let store = RedisScriptedStore::new(&redis_config, config.reconnect_policy())
        .map_err(|e| ProviderError::Config(format!("redis store: {e}")))?;
    info!(
        application = %config.application_name,
        host = %redis_config.host,
        port = redis_config.port,
        database = redis_config.database_id,
        "using redis session store"
    );
    Ok(Arc::new(store))
}
