use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sessionlock_core::{SessionKeys, ValueSerializer, serializer_for};
use sessionlock_store::ScriptedStore;
use tracing::{error, info, instrument};

use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::factory::create_store;
use crate::item::{GetItemResult, SessionStateData};
use crate::retry::RetryPolicy;
use crate::session_store::{SessionStore, StoreContext};

/// A configured session state provider.
///
/// Cheap to share behind an `Arc`. Each inbound request calls
/// [`begin_request`](Self::begin_request) and drives the returned
/// [`SessionRequest`].
pub struct SessionStateProvider {
    name: String,
    config: ProviderConfig,
    context: Arc<StoreContext>,
}

impl std::fmt::Debug for SessionStateProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStateProvider")
            .field("name", &self.name)
            .field("backend", &self.config.backend)
            .field("application_name", &self.config.application_name)
            .finish_non_exhaustive()
    }
}

impl SessionStateProvider {
    /// Parse host settings and build the provider with its configured backend.
    pub fn initialize(
        name: &str,
        settings: &HashMap<String, String>,
    ) -> Result<Self, ProviderError> {
        let config = ProviderConfig::from_settings(settings)?;
        Self::from_config(name, config)
    }

    pub fn from_config(name: &str, config: ProviderConfig) -> Result<Self, ProviderError> {
        Self::builder(name).config(config).build()
    }

    pub fn builder(name: &str) -> ProviderBuilder {
        ProviderBuilder {
            name: name.to_owned(),
            config: None,
            store: None,
            serializer: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Expiry notifications cannot be delivered by the store.
    pub fn supports_expire_callback(&self) -> bool {
        false
    }

    /// Empty session data for a brand-new session.
    pub fn create_new_store_data(&self, timeout: Duration) -> SessionStateData {
        SessionStateData::new(timeout)
    }

    /// Remaining idle time of a session record; `None` if it does not exist.
    pub async fn time_to_live(&self, session_id: &str) -> Result<Option<Duration>, ProviderError> {
        let keys = SessionKeys::for_session(self.context.application_name.clone(), session_id);
        Ok(self.context.store.time_to_live(keys.data_key()).await?)
    }

    /// Start serving one inbound request.
    pub fn begin_request(&self) -> SessionRequest {
        SessionRequest {
            provider: self.name.clone(),
            store: SessionStore::new(Arc::clone(&self.context)),
            throw_on_error: self.config.throw_on_error,
            last_error: None,
        }
    }
}

/// Builder for [`SessionStateProvider`] with injectable store and serializer.
pub struct ProviderBuilder {
    name: String,
    config: Option<ProviderConfig>,
    store: Option<Arc<dyn ScriptedStore>>,
    serializer: Option<Arc<dyn ValueSerializer>>,
}

impl ProviderBuilder {
    #[must_use]
    pub fn config(mut self, config: ProviderConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use `store` instead of the backend named in the configuration.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn ScriptedStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use `serializer` instead of the one named in the configuration.
    #[must_use]
    pub fn serializer(mut self, serializer: Arc<dyn ValueSerializer>) -> Self {
        self.serializer = Some(serializer);
        self
    }

    pub fn build(self) -> Result<SessionStateProvider, ProviderError> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        let store = match self.store {
            Some(store) => store,
            None => create_store(&config)?,
        };
        let serializer = match self.serializer {
            Some(serializer) => serializer,
            None => serializer_for(&config.serializer)
                .map_err(|e| ProviderError::Config(e.to_string()))?,
        };

        info!(
            provider = %self.name,
            backend = %config.backend,
            application = %config.application_name,
            serializer = serializer.name(),
            retry_timeout_ms = config.retry_timeout_ms,
            "session state provider initialized"
        );
        let context = Arc::new(StoreContext {
            store,
            serializer,
            retry: RetryPolicy::new(config.retry_timeout()),
            application_name: config.application_name.clone(),
            lock_ttl: config.request_timeout(),
            default_timeout: config.session_timeout(),
        });
        Ok(SessionStateProvider {
            name: self.name,
            config,
            context,
        })
    }
}

/// The host contract for one inbound request.
///
/// Failures are logged and recorded in [`last_error`](Self::last_error). With
/// `throwOnError` they are also returned; otherwise the call reports the
/// benign outcome (`NotFound` for reads, success for writes) so the host can
/// carry on without a session. The slot keeps the most recent failure until
/// taken.
pub struct SessionRequest {
    provider: String,
    store: SessionStore,
    throw_on_error: bool,
    last_error: Option<ProviderError>,
}

impl SessionRequest {
    pub fn last_error(&self) -> Option<&ProviderError> {
        self.last_error.as_ref()
    }

    pub fn take_last_error(&mut self) -> Option<ProviderError> {
        self.last_error.take()
    }

    /// `(session_id, lock_id)` of the lock this request holds, if any.
    pub fn held_lock(&self) -> Option<(&str, &str)> {
        self.store.held_lock()
    }

    fn settle<T>(
        &mut self,
        operation: &'static str,
        result: Result<T, ProviderError>,
        fallback: impl FnOnce() -> T,
    ) -> Result<T, ProviderError> {
        match result {
            Ok(value) => Ok(value),
            Err(err) => {
                error!(provider = %self.provider, operation, error = %err, "session operation failed");
                self.last_error = Some(err.clone());
                if self.throw_on_error {
                    Err(err)
                } else {
                    Ok(fallback())
                }
            }
        }
    }

    #[instrument(skip(self), fields(provider = %self.provider))]
    pub async fn get_item(&mut self, session_id: &str) -> Result<GetItemResult, ProviderError> {
        let result = self.store.get_item(session_id).await;
        self.settle("get_item", result, GetItemResult::not_found)
    }

    #[instrument(skip(self), fields(provider = %self.provider))]
    pub async fn get_item_exclusive(
        &mut self,
        session_id: &str,
    ) -> Result<GetItemResult, ProviderError> {
        let result = self.store.get_item_exclusive(session_id).await;
        self.settle("get_item_exclusive", result, GetItemResult::not_found)
    }

    #[instrument(skip(self, data), fields(provider = %self.provider))]
    pub async fn set_and_release_item_exclusive(
        &mut self,
        session_id: &str,
        data: &mut SessionStateData,
        lock_id: Option<&str>,
        new_item: bool,
    ) -> Result<(), ProviderError> {
        let result = self
            .store
            .set_and_release_item_exclusive(session_id, data, lock_id, new_item)
            .await;
        self.settle("set_and_release_item_exclusive", result, || ())
    }

    #[instrument(skip(self), fields(provider = %self.provider))]
    pub async fn release_item_exclusive(
        &mut self,
        session_id: &str,
        lock_id: &str,
    ) -> Result<(), ProviderError> {
        let result = self.store.release_item_exclusive(session_id, lock_id).await;
        self.settle("release_item_exclusive", result, || ())
    }

    #[instrument(skip(self), fields(provider = %self.provider))]
    pub async fn remove_item(&mut self, session_id: &str, lock_id: &str) -> Result<(), ProviderError> {
        let result = self.store.remove_item(session_id, lock_id).await;
        self.settle("remove_item", result, || ())
    }

    #[instrument(skip(self), fields(provider = %self.provider))]
    pub async fn reset_item_timeout(&mut self, session_id: &str) -> Result<(), ProviderError> {
        let result = self.store.reset_item_timeout(session_id).await;
        self.settle("reset_item_timeout", result, || ())
    }

    #[instrument(skip(self), fields(provider = %self.provider))]
    pub async fn create_uninitialized_item(
        &mut self,
        session_id: &str,
        timeout: Duration,
    ) -> Result<(), ProviderError> {
        let result = self
            .store
            .create_uninitialized_item(session_id, timeout)
            .await;
        self.settle("create_uninitialized_item", result, || ())
    }

    /// Release any lock the request still holds.
    pub async fn end_request(&mut self) -> Result<(), ProviderError> {
        let result = self.store.end_request().await;
        self.settle("end_request", result, || ())
    }
}

#[cfg(test)]
mod tests {
    use sessionlock_core::JsonSerializer;
    use sessionlock_store_memory::MemoryScriptedStore;

    use super::*;
    use crate::item::LockStatus;

    fn memory_config() -> ProviderConfig {
        ProviderConfig {
            backend: "memory".into(),
            application_name: "tests".into(),
            ..ProviderConfig::default()
        }
    }

    #[test]
    fn initialize_from_settings() {
        let settings = HashMap::from([
            ("Backend".to_owned(), "memory".to_owned()),
            ("applicationName".to_owned(), "shop".to_owned()),
            ("throwOnError".to_owned(), "true".to_owned()),
            ("serializer".to_owned(), "json".to_owned()),
        ]);
        let provider = SessionStateProvider::initialize("sessions", &settings).unwrap();
        assert_eq!(provider.name(), "sessions");
        assert_eq!(provider.config().application_name, "shop");
        assert!(provider.config().throw_on_error);
        assert!(!provider.supports_expire_callback());
    }

    #[test]
    fn initialize_rejects_bad_settings() {
        let settings = HashMap::from([("port".to_owned(), "not-a-port".to_owned())]);
        let err = SessionStateProvider::initialize("sessions", &settings).unwrap_err();
        assert!(matches!(err, ProviderError::Config(_)));

        let config = ProviderConfig {
            serializer: "xml".into(),
            ..memory_config()
        };
        assert!(SessionStateProvider::from_config("sessions", config).is_err());
    }

    #[tokio::test]
    async fn builder_accepts_injected_parts() {
        let store = Arc::new(MemoryScriptedStore::new());
        let provider = SessionStateProvider::builder("sessions")
            .config(memory_config())
            .store(store.clone())
            .serializer(Arc::new(JsonSerializer))
            .build()
            .unwrap();

        let mut request = provider.begin_request();
        let mut data = provider.create_new_store_data(Duration::from_secs(600));
        data.items.set("name", "ann");
        request
            .set_and_release_item_exclusive("s1", &mut data, None, true)
            .await
            .unwrap();
        assert_eq!(store.key_count(), 2);

        let read = request.get_item("s1").await.unwrap();
        assert_eq!(read.status, LockStatus::Acquired);
        assert_eq!(read.data.unwrap().timeout, Duration::from_secs(600));
        assert!(request.last_error().is_none());
    }
}
