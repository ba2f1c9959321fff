//! Distributed session state provider.
//!
//! Sessions live in a [`ScriptedStore`](sessionlock_store::ScriptedStore) and
//! are guarded by a single-writer lock: exclusive reads take the lock, the
//! write-back ships only the changed fields and releases it, and shared reads
//! return data only while nobody holds it.
//!
//! Hosts build a [`SessionStateProvider`] once (directly or through the
//! [`ProviderRegistry`]) and drive one [`SessionRequest`] per inbound request.

pub mod config;
pub mod error;
pub mod factory;
pub mod item;
pub mod provider;
pub mod registry;
pub mod retry;
pub mod session_store;

pub use config::{BACKENDS, ProviderConfig};
pub use error::ProviderError;
pub use factory::create_store;
pub use item::{
    ACTIONS_FIELD, GetItemResult, LockStatus, SessionActions, SessionStateData,
};
pub use provider::{ProviderBuilder, SessionRequest, SessionStateProvider};
pub use registry::ProviderRegistry;
pub use retry::RetryPolicy;
pub use session_store::{SessionStore, StoreContext};
