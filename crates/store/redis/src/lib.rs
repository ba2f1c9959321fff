//! Redis backend for the sessionlock scripted store.
//!
//! Every [`ScriptedStore`](sessionlock_store::ScriptedStore) operation runs
//! as one Lua script on a shared multiplexed connection. The connection is
//! owned by a [`ConnectionManager`](sessionlock_store::ConnectionManager),
//! so a failing call is retried once and a sustained outage triggers a
//! throttled reconnect.

pub mod config;
pub mod connection;
pub mod reply;
pub mod scripts;
pub mod store;

pub use config::RedisConfig;
pub use connection::RedisConnectionFactory;
pub use store::RedisScriptedStore;
