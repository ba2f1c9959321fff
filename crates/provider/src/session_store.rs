//! The session locking protocol.
//!
//! A [`SessionStore`] serves one request. Exclusive reads take the write
//! lock with a fresh [`LockId`] and remember it, so the write-back, an
//! explicit release or [`end_request`](SessionStore::end_request) can give
//! it back. Mutual exclusion itself is decided by the store's atomic
//! scripts; nothing here serializes requests in-process.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use sessionlock_core::{
    LockId, SessionItems, SessionKeys, SessionValue, ValueSerializer, lock_age,
};
use sessionlock_store::{ItemDelta, RawItems, ScriptedStore};

use crate::error::ProviderError;
use crate::item::{
    ACTIONS_FIELD, GetItemResult, INITIALIZE_ITEM_FLAG, LockStatus, SessionActions,
    SessionStateData,
};
use crate::retry::RetryPolicy;

/// Shared, immutable parts of every [`SessionStore`] of one provider.
pub struct StoreContext {
    pub store: Arc<dyn ScriptedStore>,
    pub serializer: Arc<dyn ValueSerializer>,
    pub retry: RetryPolicy,
    pub application_name: String,
    /// TTL of an exclusive lock.
    pub lock_ttl: Duration,
    /// Session timeout when the record carries none.
    pub default_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct HeldLock {
    session_id: String,
    lock_id: String,
    /// Session timeout observed when the lock was taken.
    timeout: Duration,
}

fn is_actions_field(name: &str) -> bool {
    name.eq_ignore_ascii_case(ACTIONS_FIELD)
}

/// Decode stored fields, stripping the initialize marker.
///
/// Undecodable fields are logged and left out; they stay untouched on the
/// server because they never enter the change sets.
fn decode_items(serializer: &dyn ValueSerializer, raw: RawItems) -> (SessionItems, SessionActions) {
    let mut pairs = Vec::with_capacity(raw.len());
    for (name, bytes) in raw {
        match serializer.deserialize(&bytes) {
            Ok(value) => pairs.push((name, value)),
            Err(err) => warn!(field = %name, error = %err, "skipping undecodable session field"),
        }
    }
    let mut items = SessionItems::from_pairs(pairs);
    let actions = match items.remove(ACTIONS_FIELD) {
        Some(SessionValue::Int(INITIALIZE_ITEM_FLAG)) => SessionActions::InitializeItem,
        _ => SessionActions::None,
    };
    (items, actions)
}

fn encode_all(serializer: &dyn ValueSerializer, items: &SessionItems) -> Result<RawItems, ProviderError> {
    items
        .iter()
        .into_iter()
        .filter(|(name, _)| !is_actions_field(name))
        .map(|(name, value)| {
            serializer
                .serialize(value)
                .map(|raw| (name.to_owned(), raw))
                .map_err(ProviderError::from)
        })
        .collect()
}

/// Only the keys changed since the last write-back.
fn encode_delta(serializer: &dyn ValueSerializer, items: &SessionItems) -> Result<ItemDelta, ProviderError> {
    let mut deleted: Vec<String> = items.deleted_keys().map(str::to_owned).collect();
    deleted.sort();

    let mut modified: Vec<&str> = items
        .modified_keys()
        .filter(|name| !is_actions_field(name))
        .collect();
    modified.sort_unstable();
    let mut updated = Vec::with_capacity(modified.len());
    for name in modified {
        if let Some(value) = items.peek(name) {
            updated.push((name.to_owned(), serializer.serialize(value)?));
        }
    }
    Ok(ItemDelta { deleted, updated })
}

/// Per-request driver of the locking protocol.
pub struct SessionStore {
    context: Arc<StoreContext>,
    keys: SessionKeys,
    held: Option<HeldLock>,
}

impl SessionStore {
    pub fn new(context: Arc<StoreContext>) -> Self {
        let keys = SessionKeys::new(context.application_name.clone());
        Self {
            context,
            keys,
            held: None,
        }
    }

    /// `(session_id, lock_id)` of the lock this request holds, if any.
    pub fn held_lock(&self) -> Option<(&str, &str)> {
        self.held
            .as_ref()
            .map(|held| (held.session_id.as_str(), held.lock_id.as_str()))
    }

    fn held_timeout(&self, session_id: &str, lock_id: &str) -> Option<Duration> {
        self.held
            .as_ref()
            .filter(|held| held.session_id == session_id && held.lock_id == lock_id)
            .map(|held| held.timeout)
    }

    /// Forget the held lock if it is the one identified by `lock_id`.
    fn forget_lock(&mut self, session_id: &str, lock_id: &str) {
        if self.held_timeout(session_id, lock_id).is_some() {
            self.held = None;
        }
    }

    /// Shared read. Data is only returned when nobody holds the lock.
    pub async fn get_item(&mut self, session_id: &str) -> Result<GetItemResult, ProviderError> {
        self.keys.regenerate_if_changed(session_id);
        let context = Arc::clone(&self.context);
        let keys = &self.keys;
        let reply = context
            .retry
            .run("get_item", || context.store.check_write_lock_and_get_data(keys))
            .await?;

        if reply.is_locked() {
            let age = lock_age(&reply.lock_id);
            debug!(session_id, lock_id = %reply.lock_id, "session locked by another request");
            return Ok(GetItemResult::locked(reply.lock_id, age));
        }
        let Some(raw) = reply.items else {
            return Ok(GetItemResult::not_found());
        };
        let timeout = reply.session_timeout.unwrap_or(context.default_timeout);
        let (items, actions) = decode_items(context.serializer.as_ref(), raw);
        Ok(GetItemResult {
            status: LockStatus::Acquired,
            data: Some(SessionStateData { items, timeout }),
            lock_id: None,
            lock_age: Duration::ZERO,
            actions,
        })
    }

    /// Exclusive read: take the write lock and return the data.
    ///
    /// A lock held by anyone else, including an earlier attempt that reused
    /// the same token, reports [`LockStatus::Locked`]. A record that vanished
    /// under a fresh lock releases the lock again and reports
    /// [`LockStatus::NotFound`].
    pub async fn get_item_exclusive(
        &mut self,
        session_id: &str,
    ) -> Result<GetItemResult, ProviderError> {
        self.keys.regenerate_if_changed(session_id);
        let context = Arc::clone(&self.context);
        let candidate = LockId::generate();
        let keys = &self.keys;
        let reply = context
            .retry
            .run("get_item_exclusive", || {
                context
                    .store
                    .take_write_lock_and_get_data(keys, candidate.as_str(), context.lock_ttl)
            })
            .await?;

        if !reply.acquired_by(candidate.as_str()) {
            let age = lock_age(&reply.lock_id);
            debug!(
                session_id,
                lock_id = %reply.lock_id,
                lock_age_ms = u64::try_from(age.as_millis()).unwrap_or(u64::MAX),
                "exclusive access blocked"
            );
            return Ok(GetItemResult::locked(reply.lock_id, age));
        }

        let timeout = reply.session_timeout.unwrap_or(context.default_timeout);
        let Some(raw) = reply.items else {
            debug!(session_id, "no record under fresh lock, releasing it");
            context
                .retry
                .run("release_empty_lock", || {
                    context
                        .store
                        .release_lock_if_owner(keys, candidate.as_str(), timeout)
                })
                .await?;
            return Ok(GetItemResult::not_found());
        };

        let (items, actions) = decode_items(context.serializer.as_ref(), raw);
        if let Some(previous) = &self.held {
            warn!(
                session_id = %previous.session_id,
                "request already held a lock, replacing it"
            );
        }
        self.held = Some(HeldLock {
            session_id: session_id.to_owned(),
            lock_id: candidate.as_str().to_owned(),
            timeout,
        });
        Ok(GetItemResult {
            status: LockStatus::Acquired,
            data: Some(SessionStateData { items, timeout }),
            lock_id: Some(candidate.into_string()),
            lock_age: Duration::ZERO,
            actions,
        })
    }

    /// Write the session back and release the lock.
    ///
    /// A new item is written in full. An existing item ships only its
    /// change sets, and only if `lock_id` still owns the lock; with nothing
    /// changed and the timeout untouched, the lock is just released.
    pub async fn set_and_release_item_exclusive(
        &mut self,
        session_id: &str,
        data: &mut SessionStateData,
        lock_id: Option<&str>,
        new_item: bool,
    ) -> Result<(), ProviderError> {
        self.keys.regenerate_if_changed(session_id);
        let context = Arc::clone(&self.context);
        let serializer = context.serializer.as_ref();
        let timeout = data.timeout;
        let keys = &self.keys;

        let released = if new_item {
            let items = encode_all(serializer, &data.items)?;
            context
                .retry
                .run("set_item", || context.store.set(keys, &items, timeout))
                .await?;
            let held = self
                .held
                .as_ref()
                .filter(|h| h.session_id == session_id)
                .map(|h| h.lock_id.clone());
            if let Some(owner) = &held {
                context
                    .retry
                    .run("release_item", || {
                        context.store.release_lock_if_owner(keys, owner, timeout)
                    })
                    .await?;
            }
            held
        } else {
            let Some(lock_id) = lock_id else {
                return Err(ProviderError::Policy(
                    "writing back an existing item requires its lock id".into(),
                ));
            };
            let delta = encode_delta(serializer, &data.items)?;
            let unchanged_timeout = self.held_timeout(session_id, lock_id) == Some(timeout);
            if delta.is_empty() && unchanged_timeout {
                debug!(session_id, "nothing to write, releasing lock only");
                context
                    .retry
                    .run("release_item", || {
                        context.store.release_lock_if_owner(keys, lock_id, timeout)
                    })
                    .await?;
            } else {
                debug!(
                    session_id,
                    deleted = delta.deleted.len(),
                    updated = delta.updated.len(),
                    "writing session delta"
                );
                context
                    .retry
                    .run("update_item", || {
                        context
                            .store
                            .update_and_release_lock(keys, lock_id, timeout, &delta)
                    })
                    .await?;
            }
            Some(lock_id.to_owned())
        };

        data.items.set_dirty(false);
        if let Some(lock_id) = released {
            self.forget_lock(session_id, &lock_id);
        }
        Ok(())
    }

    /// Give the lock back without writing.
    pub async fn release_item_exclusive(
        &mut self,
        session_id: &str,
        lock_id: &str,
    ) -> Result<(), ProviderError> {
        self.keys.regenerate_if_changed(session_id);
        let context = Arc::clone(&self.context);
        let fallback = self
            .held_timeout(session_id, lock_id)
            .unwrap_or(context.default_timeout);
        let keys = &self.keys;
        context
            .retry
            .run("release_item", || {
                context.store.release_lock_if_owner(keys, lock_id, fallback)
            })
            .await?;
        self.forget_lock(session_id, lock_id);
        Ok(())
    }

    /// Delete the record. A no-op unless `lock_id` owns the lock.
    pub async fn remove_item(&mut self, session_id: &str, lock_id: &str) -> Result<(), ProviderError> {
        self.keys.regenerate_if_changed(session_id);
        let context = Arc::clone(&self.context);
        let keys = &self.keys;
        context
            .retry
            .run("remove_item", || context.store.remove_if_owner(keys, lock_id))
            .await?;
        self.forget_lock(session_id, lock_id);
        Ok(())
    }

    /// Slide the idle timeout. Never creates a record.
    pub async fn reset_item_timeout(&mut self, session_id: &str) -> Result<(), ProviderError> {
        self.keys.regenerate_if_changed(session_id);
        let context = Arc::clone(&self.context);
        let keys = &self.keys;
        context
            .retry
            .run("reset_item_timeout", || {
                context.store.reset_timeout(keys, context.default_timeout)
            })
            .await?;
        Ok(())
    }

    /// Write an empty record carrying the initialize marker.
    pub async fn create_uninitialized_item(
        &mut self,
        session_id: &str,
        timeout: Duration,
    ) -> Result<(), ProviderError> {
        self.keys.regenerate_if_changed(session_id);
        let context = Arc::clone(&self.context);
        let marker = context
            .serializer
            .serialize(&SessionValue::Int(INITIALIZE_ITEM_FLAG))?;
        let items = vec![(ACTIONS_FIELD.to_owned(), marker)];
        let keys = &self.keys;
        context
            .retry
            .run("create_uninitialized_item", || {
                context.store.set(keys, &items, timeout)
            })
            .await?;
        Ok(())
    }

    /// Release a lock the request still holds. Safe to call more than once.
    pub async fn end_request(&mut self) -> Result<(), ProviderError> {
        let Some(held) = self.held.take() else {
            return Ok(());
        };
        debug!(session_id = %held.session_id, "releasing lock left at end of request");
        self.keys.regenerate_if_changed(&held.session_id);
        let context = Arc::clone(&self.context);
        let keys = &self.keys;
        context
            .retry
            .run("end_request", || {
                context
                    .store
                    .release_lock_if_owner(keys, &held.lock_id, held.timeout)
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use sessionlock_core::BinarySerializer;
    use sessionlock_store::{ReadReply, StoreError, WriteLockReply};
    use sessionlock_store_memory::MemoryScriptedStore;

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Set(Vec<String>),
        Release,
        Update(ItemDelta),
        Other,
    }

    /// Memory store that records which write paths were taken.
    #[derive(Default)]
    struct RecordingStore {
        inner: MemoryScriptedStore,
        calls: Mutex<Vec<Call>>,
    }

    impl RecordingStore {
        fn writes(&self) -> Vec<Call> {
            self.calls
                .lock()
                .iter()
                .filter(|c| **c != Call::Other)
                .cloned()
                .collect()
        }

        fn clear(&self) {
            self.calls.lock().clear();
        }
    }

    #[async_trait]
    impl ScriptedStore for RecordingStore {
        async fn take_write_lock_and_get_data(
            &self,
            keys: &SessionKeys,
            lock_id: &str,
            lock_ttl: Duration,
        ) -> Result<WriteLockReply, StoreError> {
            self.calls.lock().push(Call::Other);
            self.inner
                .take_write_lock_and_get_data(keys, lock_id, lock_ttl)
                .await
        }

        async fn check_write_lock_and_get_data(
            &self,
            keys: &SessionKeys,
        ) -> Result<ReadReply, StoreError> {
            self.calls.lock().push(Call::Other);
            self.inner.check_write_lock_and_get_data(keys).await
        }

        async fn set(
            &self,
            keys: &SessionKeys,
            items: &[(String, Bytes)],
            timeout: Duration,
        ) -> Result<(), StoreError> {
            let names = items.iter().map(|(n, _)| n.clone()).collect();
            self.calls.lock().push(Call::Set(names));
            self.inner.set(keys, items, timeout).await
        }

        async fn release_lock_if_owner(
            &self,
            keys: &SessionKeys,
            lock_id: &str,
            fallback_timeout: Duration,
        ) -> Result<(), StoreError> {
            self.calls.lock().push(Call::Release);
            self.inner
                .release_lock_if_owner(keys, lock_id, fallback_timeout)
                .await
        }

        async fn update_and_release_lock(
            &self,
            keys: &SessionKeys,
            lock_id: &str,
            timeout: Duration,
            delta: &ItemDelta,
        ) -> Result<(), StoreError> {
            self.calls.lock().push(Call::Update(delta.clone()));
            self.inner
                .update_and_release_lock(keys, lock_id, timeout, delta)
                .await
        }

        async fn remove_if_owner(
            &self,
            keys: &SessionKeys,
            lock_id: &str,
        ) -> Result<(), StoreError> {
            self.calls.lock().push(Call::Other);
            self.inner.remove_if_owner(keys, lock_id).await
        }

        async fn reset_timeout(
            &self,
            keys: &SessionKeys,
            timeout: Duration,
        ) -> Result<(), StoreError> {
            self.calls.lock().push(Call::Other);
            self.inner.reset_timeout(keys, timeout).await
        }

        async fn time_to_live(&self, key: &str) -> Result<Option<Duration>, StoreError> {
            self.inner.time_to_live(key).await
        }
    }

    const TIMEOUT: Duration = Duration::from_secs(1200);

    fn context(store: Arc<dyn ScriptedStore>) -> Arc<StoreContext> {
        Arc::new(StoreContext {
            store,
            serializer: Arc::new(BinarySerializer),
            retry: RetryPolicy::disabled(),
            application_name: "unit".into(),
            lock_ttl: Duration::from_secs(110),
            default_timeout: TIMEOUT,
        })
    }

    async fn seed(session: &mut SessionStore, id: &str, pairs: &[(&str, &str)]) {
        let mut data = SessionStateData::new(TIMEOUT);
        for (k, v) in pairs {
            data.items.set(k, *v);
        }
        session
            .set_and_release_item_exclusive(id, &mut data, None, true)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn missing_session_is_not_found() {
        let mut session = SessionStore::new(context(Arc::new(MemoryScriptedStore::new())));
        let shared = session.get_item("nobody").await.unwrap();
        assert_eq!(shared.status, LockStatus::NotFound);

        let exclusive = session.get_item_exclusive("nobody").await.unwrap();
        assert_eq!(exclusive.status, LockStatus::NotFound);
        assert!(session.held_lock().is_none(), "lock on a missing record is released");
    }

    #[tokio::test]
    async fn exclusive_read_blocks_other_requests() {
        let ctx = context(Arc::new(MemoryScriptedStore::new()));
        let mut first = SessionStore::new(Arc::clone(&ctx));
        let mut second = SessionStore::new(Arc::clone(&ctx));
        seed(&mut first, "s1", &[("user", "ann")]).await;

        let owner = first.get_item_exclusive("s1").await.unwrap();
        assert_eq!(owner.status, LockStatus::Acquired);
        let lock_id = owner.lock_id.clone().unwrap();
        assert_eq!(first.held_lock(), Some(("s1", lock_id.as_str())));
        let data = owner.data.unwrap();
        assert_eq!(data.items.peek("user"), Some(&SessionValue::from("ann")));

        let blocked = second.get_item_exclusive("s1").await.unwrap();
        assert!(blocked.is_locked());
        assert_eq!(blocked.lock_id.as_deref(), Some(lock_id.as_str()));
        assert!(blocked.data.is_none());
        assert!(blocked.lock_age < Duration::from_secs(5));

        let shared = second.get_item("s1").await.unwrap();
        assert!(shared.is_locked());
        assert_eq!(shared.lock_id.as_deref(), Some(lock_id.as_str()));

        first.release_item_exclusive("s1", &lock_id).await.unwrap();
        let shared = second.get_item("s1").await.unwrap();
        assert_eq!(shared.status, LockStatus::Acquired);
        assert!(shared.lock_id.is_none());
    }

    #[tokio::test]
    async fn write_back_ships_only_the_delta() {
        let store = Arc::new(RecordingStore::default());
        let mut session = SessionStore::new(context(store.clone()));
        seed(&mut session, "s1", &[("keep", "1"), ("change", "2"), ("drop", "3")]).await;
        store.clear();

        let read = session.get_item_exclusive("s1").await.unwrap();
        let lock_id = read.lock_id.unwrap();
        let mut data = read.data.unwrap();
        data.items.set("change", "22");
        data.items.remove("drop");
        session
            .set_and_release_item_exclusive("s1", &mut data, Some(&lock_id), false)
            .await
            .unwrap();

        let writes = store.writes();
        assert_eq!(writes.len(), 1);
        let Call::Update(delta) = &writes[0] else {
            panic!("expected an update, got {writes:?}");
        };
        assert_eq!(delta.deleted, vec!["drop".to_owned()]);
        let names: Vec<&str> = delta.updated.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["change"]);
        assert!(!data.items.is_dirty());
        assert!(session.held_lock().is_none());
    }

    #[tokio::test]
    async fn unchanged_write_back_only_releases() {
        let store = Arc::new(RecordingStore::default());
        let mut session = SessionStore::new(context(store.clone()));
        seed(&mut session, "s1", &[("a", "1")]).await;
        store.clear();

        let read = session.get_item_exclusive("s1").await.unwrap();
        let lock_id = read.lock_id.unwrap();
        let mut data = read.data.unwrap();
        let _ = data.items.get("a");
        session
            .set_and_release_item_exclusive("s1", &mut data, Some(&lock_id), false)
            .await
            .unwrap();
        assert_eq!(store.writes(), vec![Call::Release]);

        // A changed timeout alone still goes through the update script.
        let read = session.get_item_exclusive("s1").await.unwrap();
        let lock_id = read.lock_id.unwrap();
        let mut data = read.data.unwrap();
        data.timeout = Duration::from_secs(60);
        store.clear();
        session
            .set_and_release_item_exclusive("s1", &mut data, Some(&lock_id), false)
            .await
            .unwrap();
        assert_eq!(store.writes(), vec![Call::Update(ItemDelta::default())]);
        let ttl = store.time_to_live(session.keys.data_key()).await.unwrap();
        assert!(ttl.is_some_and(|t| t <= Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn stale_lock_write_back_is_ignored() {
        let ctx = context(Arc::new(MemoryScriptedStore::new()));
        let mut session = SessionStore::new(Arc::clone(&ctx));
        seed(&mut session, "s1", &[("a", "1")]).await;

        let read = session.get_item_exclusive("s1").await.unwrap();
        let mut data = read.data.unwrap();
        data.items.set("a", "overwritten");
        session
            .set_and_release_item_exclusive("s1", &mut data, Some("not-the-owner"), false)
            .await
            .unwrap();

        let mut other = SessionStore::new(ctx);
        let still_locked = other.get_item("s1").await.unwrap();
        assert!(still_locked.is_locked());
    }

    #[tokio::test]
    async fn existing_item_write_back_needs_a_lock_id() {
        let mut session = SessionStore::new(context(Arc::new(MemoryScriptedStore::new())));
        let mut data = SessionStateData::new(TIMEOUT);
        let err = session
            .set_and_release_item_exclusive("s1", &mut data, None, false)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Policy(_)));
    }

    #[tokio::test]
    async fn uninitialized_item_reports_initialize_action() {
        let store = Arc::new(RecordingStore::default());
        let mut session = SessionStore::new(context(store.clone()));
        session
            .create_uninitialized_item("fresh", Duration::from_secs(300))
            .await
            .unwrap();

        let read = session.get_item_exclusive("fresh").await.unwrap();
        assert_eq!(read.status, LockStatus::Acquired);
        assert_eq!(read.actions, SessionActions::InitializeItem);
        let mut data = read.data.unwrap();
        assert!(data.items.is_empty(), "marker is not visible to the host");
        assert_eq!(data.timeout, Duration::from_secs(300));

        data.items.set("cart", "3 items");
        store.clear();
        session
            .set_and_release_item_exclusive("fresh", &mut data, read.lock_id.as_deref(), false)
            .await
            .unwrap();
        let writes = store.writes();
        let Call::Update(delta) = &writes[0] else {
            panic!("expected an update, got {writes:?}");
        };
        assert_eq!(delta.deleted, vec![ACTIONS_FIELD.to_owned()]);

        let read = session.get_item("fresh").await.unwrap();
        assert_eq!(read.actions, SessionActions::None);
        assert_eq!(read.data.unwrap().items.keys(), vec!["cart"]);
    }

    #[tokio::test]
    async fn end_request_releases_a_forgotten_lock() {
        let ctx = context(Arc::new(MemoryScriptedStore::new()));
        let mut session = SessionStore::new(Arc::clone(&ctx));
        seed(&mut session, "s1", &[("a", "1")]).await;
        session.get_item_exclusive("s1").await.unwrap();

        session.end_request().await.unwrap();
        assert!(session.held_lock().is_none());
        session.end_request().await.unwrap();

        let mut other = SessionStore::new(ctx);
        let read = other.get_item_exclusive("s1").await.unwrap();
        assert_eq!(read.status, LockStatus::Acquired);
    }

    #[tokio::test]
    async fn release_under_a_stale_lock_id_keeps_the_held_lock() {
        let ctx = context(Arc::new(MemoryScriptedStore::new()));
        let mut session = SessionStore::new(Arc::clone(&ctx));
        seed(&mut session, "s1", &[("a", "1")]).await;
        let lock_id = session
            .get_item_exclusive("s1")
            .await
            .unwrap()
            .lock_id
            .unwrap();

        session.release_item_exclusive("s1", "stale-token").await.unwrap();
        assert_eq!(session.held_lock(), Some(("s1", lock_id.as_str())));

        let mut other = SessionStore::new(ctx);
        assert!(other.get_item_exclusive("s1").await.unwrap().is_locked());

        session.end_request().await.unwrap();
        assert!(session.held_lock().is_none());
        let read = other.get_item_exclusive("s1").await.unwrap();
        assert_eq!(read.status, LockStatus::Acquired);
    }

    #[tokio::test]
    async fn remove_needs_the_owner() {
        let store = Arc::new(MemoryScriptedStore::new());
        let mut session = SessionStore::new(context(store.clone()));
        seed(&mut session, "s1", &[("a", "1")]).await;
        let lock_id = session
            .get_item_exclusive("s1")
            .await
            .unwrap()
            .lock_id
            .unwrap();

        session.remove_item("s1", "someone-else").await.unwrap();
        assert!(store.time_to_live(session.keys.data_key()).await.unwrap().is_some());
        assert_eq!(session.held_lock(), Some(("s1", lock_id.as_str())));

        session.remove_item("s1", &lock_id).await.unwrap();
        assert_eq!(store.key_count(), 0);
        assert!(session.held_lock().is_none());
    }

    #[tokio::test]
    async fn reset_timeout_does_not_create_records() {
        let store = Arc::new(MemoryScriptedStore::new());
        let mut session = SessionStore::new(context(store.clone()));
        session.reset_item_timeout("ghost").await.unwrap();
        assert_eq!(store.key_count(), 0);
    }

    #[tokio::test]
    async fn undecodable_fields_are_skipped() {
        let store = Arc::new(MemoryScriptedStore::new());
        let mut session = SessionStore::new(context(store.clone()));
        let keys = SessionKeys::for_session("unit", "s1");
        let good = BinarySerializer
            .serialize(&SessionValue::from("ok"))
            .unwrap();
        store
            .set(
                &keys,
                &[
                    ("good".into(), good),
                    ("bad".into(), Bytes::from_static(&[99, 0, 0, 0, 0])),
                ],
                TIMEOUT,
            )
            .await
            .unwrap();

        let read = session.get_item("s1").await.unwrap();
        let items = read.data.unwrap().items;
        assert_eq!(items.keys(), vec!["good"]);
        assert!(!items.is_dirty());
    }
}
