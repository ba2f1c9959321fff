use std::time::Duration;

use sessionlock_core::SessionItems;

/// Field that marks a record created by `create_uninitialized_item`.
pub const ACTIONS_FIELD: &str = "SessionStateActions";

/// Stored value of [`ACTIONS_FIELD`] for [`SessionActions::InitializeItem`].
pub const INITIALIZE_ITEM_FLAG: i64 = 1;

/// Actions the host must take for a freshly read session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionActions {
    #[default]
    None,
    /// The record was created empty and the host should initialize it.
    InitializeItem,
}

/// Outcome of a session read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    /// Data was read. After an exclusive read the lock is held by this
    /// request.
    Acquired,
    /// Another request holds the lock; no data was read.
    Locked,
    /// No session record exists.
    NotFound,
}

/// Session data handed to the host.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStateData {
    pub items: SessionItems,
    /// Idle timeout applied on write-back.
    pub timeout: Duration,
}

impl SessionStateData {
    pub fn new(timeout: Duration) -> Self {
        Self {
            items: SessionItems::new(),
            timeout,
        }
    }
}

/// Result of `get_item` and `get_item_exclusive`.
#[derive(Debug, Clone, PartialEq)]
pub struct GetItemResult {
    pub status: LockStatus,
    pub data: Option<SessionStateData>,
    /// The lock owner: ours after an exclusive read, the holder's when
    /// [`LockStatus::Locked`], `None` for an uncontended shared read.
    pub lock_id: Option<String>,
    /// How long the holder has had the lock; zero unless locked.
    pub lock_age: Duration,
    pub actions: SessionActions,
}

impl GetItemResult {
    pub fn not_found() -> Self {
        Self {
            status: LockStatus::NotFound,
            data: None,
            lock_id: None,
            lock_age: Duration::ZERO,
            actions: SessionActions::None,
        }
    }

    pub fn locked(lock_id: String, lock_age: Duration) -> Self {
        Self {
            status: LockStatus::Locked,
            data: None,
            lock_id: Some(lock_id),
            lock_age,
            actions: SessionActions::None,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.status == LockStatus::Locked
    }
}
