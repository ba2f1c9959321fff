use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::ProviderError;
use crate::provider::SessionStateProvider;

type Slot = Arc<OnceCell<Arc<SessionStateProvider>>>;

/// Named providers, each initialized at most once.
///
/// Concurrent first calls for the same name race on one [`OnceCell`]; only
/// one of them parses the settings and builds the store, the others wait and
/// share its result. A failed initialization leaves the slot empty so the
/// next call tries again.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: DashMap<String, Slot>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the provider named `name`, initializing it from `settings` on
    /// first use. Later calls ignore `settings`.
    pub async fn get_or_initialize(
        &self,
        name: &str,
        settings: &HashMap<String, String>,
    ) -> Result<Arc<SessionStateProvider>, ProviderError> {
        // Clone the slot out so no map shard lock is held across the await.
        let slot = Arc::clone(self.providers.entry(name.to_owned()).or_default().value());
        let provider = slot
            .get_or_try_init(|| async {
                debug!(provider = name, "initializing session state provider");
                SessionStateProvider::initialize(name, settings).map(Arc::new)
            })
            .await?;
        Ok(Arc::clone(provider))
    }

    /// The provider named `name`, if it finished initializing.
    pub fn get(&self, name: &str) -> Option<Arc<SessionStateProvider>> {
        self.providers
            .get(name)
            .and_then(|slot| slot.get().cloned())
    }

    /// Names of all initialized providers, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .providers
            .iter()
            .filter(|entry| entry.value().initialized())
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.providers
            .iter()
            .filter(|entry| entry.value().initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_settings(application: &str) -> HashMap<String, String> {
        HashMap::from([
            ("backend".to_owned(), "memory".to_owned()),
            ("applicationName".to_owned(), application.to_owned()),
        ])
    }

    #[tokio::test]
    async fn initializes_once_per_name() {
        let registry = ProviderRegistry::new();
        assert!(registry.is_empty());

        let first = registry
            .get_or_initialize("sessions", &memory_settings("shop"))
            .await
            .unwrap();
        let second = registry
            .get_or_initialize("sessions", &memory_settings("ignored"))
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.config().application_name, "shop");

        registry
            .get_or_initialize("admin", &memory_settings("backoffice"))
            .await
            .unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["admin".to_owned(), "sessions".to_owned()]);
        assert!(registry.get("admin").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[tokio::test]
    async fn concurrent_first_use_shares_one_provider() {
        let registry = Arc::new(ProviderRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move {
                    registry
                        .get_or_initialize("sessions", &memory_settings("shop"))
                        .await
                        .unwrap()
                })
            })
            .collect();
        let mut providers = Vec::new();
        for handle in handles {
            providers.push(handle.await.unwrap());
        }
        assert!(providers.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn failed_initialization_can_be_retried() {
        let registry = ProviderRegistry::new();
        let bad = HashMap::from([
            ("backend".to_owned(), "memory".to_owned()),
            ("port".to_owned(), "nope".to_owned()),
        ]);
        assert!(registry.get_or_initialize("sessions", &bad).await.is_err());
        assert!(registry.get("sessions").is_none());
        assert!(registry.is_empty());

        registry
            .get_or_initialize("sessions", &memory_settings("shop"))
            .await
            .unwrap();
        assert_eq!(registry.len(), 1);
    }
}
