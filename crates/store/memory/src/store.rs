use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use sessionlock_core::SessionKeys;
use sessionlock_store::{
    ItemDelta, RawItems, ReadReply, SESSION_TIMEOUT_FIELD, ScriptedStore, StoreError,
    WriteLockReply, ttl_seconds,
};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Hash(RawItems),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

/// Key space with Redis-like string, hash and expiry semantics.
///
/// Expired entries are dropped lazily on access.
#[derive(Debug, Default)]
struct Keyspace {
    entries: HashMap<String, Entry>,
}

impl Keyspace {
    fn live(&mut self, key: &str) -> Option<&mut Entry> {
        let now = Instant::now();
        let expired = self
            .entries
            .get(key)
            .is_some_and(|e| e.expires_at.is_some_and(|at| at <= now));
        if expired {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    fn get_string(&mut self, key: &str) -> Option<String> {
        match &self.live(key)?.value {
            Value::Str(s) => Some(s.clone()),
            Value::Hash(_) => None,
        }
    }

    /// Set `key` only if absent. Returns `true` when the value was written.
    fn set_nx(&mut self, key: &str, value: &str) -> bool {
        if self.live(key).is_some() {
            return false;
        }
        self.entries.insert(
            key.to_owned(),
            Entry {
                value: Value::Str(value.to_owned()),
                expires_at: None,
            },
        );
        true
    }

    fn hgetall(&mut self, key: &str) -> Option<RawItems> {
        match &self.live(key)?.value {
            Value::Hash(fields) if !fields.is_empty() => Some(fields.clone()),
            _ => None,
        }
    }

    fn hget(&mut self, key: &str, field: &str) -> Option<Bytes> {
        match &self.live(key)?.value {
            Value::Hash(fields) => fields
                .iter()
                .find(|(name, _)| name == field)
                .map(|(_, v)| v.clone()),
            Value::Str(_) => None,
        }
    }

    fn hset(&mut self, key: &str, field: &str, value: Bytes) -> Result<(), StoreError> {
        if self.live(key).is_none() {
            self.entries.insert(
                key.to_owned(),
                Entry {
                    value: Value::Hash(Vec::new()),
                    expires_at: None,
                },
            );
        }
        let Some(Entry {
            value: Value::Hash(fields),
            ..
        }) = self.entries.get_mut(key)
        else {
            return Err(StoreError::Backend(format!(
                "WRONGTYPE key {key} does not hold a hash"
            )));
        };
        match fields.iter_mut().find(|(name, _)| name == field) {
            Some((_, slot)) => *slot = value,
            None => fields.push((field.to_owned(), value)),
        }
        Ok(())
    }

    fn hdel(&mut self, key: &str, field: &str) {
        let Some(entry) = self.live(key) else {
            return;
        };
        if let Value::Hash(fields) = &mut entry.value {
            fields.retain(|(name, _)| name != field);
            if fields.is_empty() {
                self.entries.remove(key);
            }
        }
    }

    /// Set a TTL on an existing key. Never creates the key.
    fn expire(&mut self, key: &str, seconds: u64) -> bool {
        match self.live(key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + Duration::from_secs(seconds));
                true
            }
            None => false,
        }
    }

    fn del(&mut self, key: &str) {
        self.entries.remove(key);
    }

    fn ttl(&mut self, key: &str) -> Option<Duration> {
        let at = self.live(key)?.expires_at?;
        Some(at.saturating_duration_since(Instant::now()))
    }

    fn stored_timeout(&mut self, internal_key: &str) -> Option<u64> {
        let raw = self.hget(internal_key, SESSION_TIMEOUT_FIELD)?;
        std::str::from_utf8(&raw).ok()?.trim().parse().ok()
    }

    /// Re-apply the stored session timeout (or `fallback`) to the data and
    /// internal keys, returning the stored one.
    fn refresh_ttl(&mut self, keys: &SessionKeys, fallback: Option<u64>) -> Option<Duration> {
        let stored = self.stored_timeout(keys.internal_key());
        if let Some(seconds) = stored.or(fallback) {
            self.expire(keys.data_key(), seconds);
            self.expire(keys.internal_key(), seconds);
        }
        stored.map(Duration::from_secs)
    }

    fn record_timeout(&mut self, keys: &SessionKeys, seconds: u64) -> Result<(), StoreError> {
        self.hset(
            keys.internal_key(),
            SESSION_TIMEOUT_FIELD,
            Bytes::from(seconds.to_string()),
        )
    }
}

/// In-process [`ScriptedStore`] for tests, local development and single-node
/// deployments.
///
/// Each operation runs under one mutex, which gives it the same
/// all-or-nothing view of the lock, data and internal keys that a Lua script
/// has on a Redis server.
#[derive(Debug, Default)]
pub struct MemoryScriptedStore {
    keyspace: Mutex<Keyspace>,
}

impl MemoryScriptedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys, expired ones excluded.
    pub fn key_count(&self) -> usize {
        let now = Instant::now();
        self.keyspace
            .lock()
            .entries
            .values()
            .filter(|e| e.expires_at.is_none_or(|at| at > now))
            .count()
    }
}

#[async_trait]
impl ScriptedStore for MemoryScriptedStore {
    async fn take_write_lock_and_get_data(
        &self,
        keys: &SessionKeys,
        lock_id: &str,
        lock_ttl: Duration,
    ) -> Result<WriteLockReply, StoreError> {
        let mut space = self.keyspace.lock();
        let already_locked = !space.set_nx(keys.lock_key(), lock_id);
        if !already_locked {
            space.expire(keys.lock_key(), ttl_seconds(lock_ttl));
        }
        let owner = space.get_string(keys.lock_key()).unwrap_or_default();
        let items = if owner == lock_id {
            space.hgetall(keys.data_key())
        } else {
            None
        };
        let session_timeout = space.refresh_ttl(keys, None);
        debug!(lock_key = keys.lock_key(), already_locked, "write lock attempt");

        Ok(WriteLockReply {
            lock_id: owner,
            items,
            session_timeout,
            already_locked,
        })
    }

    async fn check_write_lock_and_get_data(
        &self,
        keys: &SessionKeys,
    ) -> Result<ReadReply, StoreError> {
        let mut space = self.keyspace.lock();
        let owner = space.get_string(keys.lock_key()).unwrap_or_default();
        let items = if owner.is_empty() {
            space.hgetall(keys.data_key())
        } else {
            None
        };
        let session_timeout = space.refresh_ttl(keys, None);

        Ok(ReadReply {
            lock_id: owner,
            items,
            session_timeout,
        })
    }

    async fn set(
        &self,
        keys: &SessionKeys,
        items: &[(String, Bytes)],
        timeout: Duration,
    ) -> Result<(), StoreError> {
        let seconds = ttl_seconds(timeout);
        let mut space = self.keyspace.lock();
        for (name, value) in items {
            space.hset(keys.data_key(), name, value.clone())?;
        }
        space.record_timeout(keys, seconds)?;
        space.expire(keys.data_key(), seconds);
        space.expire(keys.internal_key(), seconds);
        Ok(())
    }

    async fn release_lock_if_owner(
        &self,
        keys: &SessionKeys,
        lock_id: &str,
        fallback_timeout: Duration,
    ) -> Result<(), StoreError> {
        let mut space = self.keyspace.lock();
        if space.get_string(keys.lock_key()).as_deref() == Some(lock_id) {
            space.del(keys.lock_key());
        }
        space.refresh_ttl(keys, Some(ttl_seconds(fallback_timeout)));
        Ok(())
    }

    async fn update_and_release_lock(
        &self,
        keys: &SessionKeys,
        lock_id: &str,
        timeout: Duration,
        delta: &ItemDelta,
    ) -> Result<(), StoreError> {
        let mut space = self.keyspace.lock();
        if space.get_string(keys.lock_key()).as_deref() != Some(lock_id) {
            debug!(lock_key = keys.lock_key(), "update skipped, lock not owned");
            return Ok(());
        }
        for name in &delta.deleted {
            space.hdel(keys.data_key(), name);
        }
        for (name, value) in &delta.updated {
            space.hset(keys.data_key(), name, value.clone())?;
        }
        let seconds = ttl_seconds(timeout);
        space.record_timeout(keys, seconds)?;
        space.expire(keys.data_key(), seconds);
        space.expire(keys.internal_key(), seconds);
        space.del(keys.lock_key());
        Ok(())
    }

    async fn remove_if_owner(&self, keys: &SessionKeys, lock_id: &str) -> Result<(), StoreError> {
        let mut space = self.keyspace.lock();
        if space.get_string(keys.lock_key()).as_deref() == Some(lock_id) {
            space.del(keys.lock_key());
            space.del(keys.data_key());
            space.del(keys.internal_key());
        }
        Ok(())
    }

    async fn reset_timeout(&self, keys: &SessionKeys, timeout: Duration) -> Result<(), StoreError> {
        self.keyspace
            .lock()
            .refresh_ttl(keys, Some(ttl_seconds(timeout)));
        Ok(())
    }

    async fn time_to_live(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        Ok(self.keyspace.lock().ttl(key))
    }
}
