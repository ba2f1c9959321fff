//! In-process implementation of the sessionlock scripted store.
//!
//! [`MemoryScriptedStore`] keeps every key in one mutex-guarded map, so each
//! operation observes and mutates the three keys of a session atomically,
//! just as a server-side script would. Expiry follows [`tokio::time`], which
//! lets tests drive TTLs with a paused clock.

mod store;

pub use store::MemoryScriptedStore;
