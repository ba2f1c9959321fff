use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use sessionlock_core::SessionKeys;

use crate::error::StoreError;

/// Field name in the internal hash that remembers the session timeout.
pub const SESSION_TIMEOUT_FIELD: &str = "SessionTimeout";

/// Raw session fields exactly as stored.
pub type RawItems = Vec<(String, Bytes)>;

/// Reply of the acquire-exclusive-and-read script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteLockReply {
    /// Owner token now stored in the lock key: ours if we took the lock,
    /// the holder's otherwise.
    pub lock_id: String,
    /// Session fields, or `None` when the record is absent or was not read.
    pub items: Option<RawItems>,
    /// Stored session timeout; `None` when the record has none yet.
    pub session_timeout: Option<Duration>,
    /// `true` when the lock key existed before this call.
    pub already_locked: bool,
}

impl WriteLockReply {
    /// The lock was taken by this call with `candidate` as owner.
    pub fn acquired_by(&self, candidate: &str) -> bool {
        !self.already_locked && self.lock_id == candidate
    }
}

/// Reply of the check-shared-and-read script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadReply {
    /// Current lock owner, empty when the session is unlocked.
    pub lock_id: String,
    /// Session fields; only read when the session is unlocked.
    pub items: Option<RawItems>,
    pub session_timeout: Option<Duration>,
}

impl ReadReply {
    pub fn is_locked(&self) -> bool {
        !self.lock_id.is_empty()
    }
}

/// Fields to delete and fields to write in one write-back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemDelta {
    pub deleted: Vec<String>,
    pub updated: RawItems,
}

impl ItemDelta {
    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty() && self.updated.is_empty()
    }
}

/// Whole seconds for a script TTL argument, never below one second.
pub fn ttl_seconds(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

/// Atomic server-side operations on a session record.
///
/// Every method runs as one indivisible step on the store, so mutual
/// exclusion between processes rests entirely on the backend. Calls that
/// check an owner token are no-ops when the token no longer matches, which
/// makes all of them safe to re-drive after a timeout.
///
/// Implementations must be `Send + Sync` and safe for concurrent access.
#[async_trait]
pub trait ScriptedStore: Send + Sync {
    /// Take the write lock if free and read the record.
    ///
    /// When the lock is free it is set to `lock_id` with `lock_ttl` and the
    /// data is returned. When held, the holder's token comes back with
    /// `already_locked = true`. Either way a stored session timeout is
    /// re-applied to the data and internal keys.
    async fn take_write_lock_and_get_data(
        &self,
        keys: &SessionKeys,
        lock_id: &str,
        lock_ttl: Duration,
    ) -> Result<WriteLockReply, StoreError>;

    /// Read the record without locking; data is only returned when unlocked.
    async fn check_write_lock_and_get_data(&self, keys: &SessionKeys)
    -> Result<ReadReply, StoreError>;

    /// Write all `items`, set the TTL of the data and internal keys and record
    /// `timeout` as the session timeout.
    async fn set(
        &self,
        keys: &SessionKeys,
        items: &[(String, Bytes)],
        timeout: Duration,
    ) -> Result<(), StoreError>;

    /// Delete the lock if owned by `lock_id`, then re-apply the stored session
    /// timeout (or `fallback_timeout` if none) to data and internal keys.
    async fn release_lock_if_owner(
        &self,
        keys: &SessionKeys,
        lock_id: &str,
        fallback_timeout: Duration,
    ) -> Result<(), StoreError>;

    /// Apply `delta`, refresh TTLs to `timeout` and release the lock, only if
    /// owned by `lock_id`. Silently does nothing otherwise.
    async fn update_and_release_lock(
        &self,
        keys: &SessionKeys,
        lock_id: &str,
        timeout: Duration,
        delta: &ItemDelta,
    ) -> Result<(), StoreError>;

    /// Delete all three keys if the lock is owned by `lock_id`.
    async fn remove_if_owner(&self, keys: &SessionKeys, lock_id: &str) -> Result<(), StoreError>;

    /// Refresh the TTL of the data and internal keys. Never creates a record.
    async fn reset_timeout(&self, keys: &SessionKeys, timeout: Duration) -> Result<(), StoreError>;

    /// Remaining TTL of a raw key; `None` if absent or without expiry.
    async fn time_to_live(&self, key: &str) -> Result<Option<Duration>, StoreError>;
}
