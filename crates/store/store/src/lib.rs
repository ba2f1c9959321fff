//! Scripted store contract for sessionlock.
//!
//! Backends implement [`ScriptedStore`], a set of atomic operations on the
//! three keys of a session record. Network backends keep their connection in
//! a [`ConnectionManager`], which also provides the single-retry operation
//! executor and the reconnect circuit breaker.
//!
//! [`testing`] holds a conformance suite every backend runs.

pub mod connection;
pub mod error;
pub mod store;
pub mod testing;

pub use connection::{ConnectionFactory, ConnectionManager, ReconnectPolicy};
pub use error::{Recovery, StoreError};
pub use store::{
    ItemDelta, RawItems, ReadReply, SESSION_TIMEOUT_FIELD, ScriptedStore, WriteLockReply,
    ttl_seconds,
};
