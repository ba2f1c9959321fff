//! Core types for sessionlock.
//!
//! - [`SessionKeys`] derives the data, lock and internal store keys of a session.
//! - [`SessionItems`] holds session fields and tracks which ones changed.
//! - [`LockId`] issues and ages exclusive-lock owner tokens.
//! - [`ValueSerializer`] turns [`SessionValue`]s into stored bytes.

pub mod error;
pub mod items;
pub mod keys;
pub mod lock_id;
pub mod value;

pub use error::CodecError;
pub use items::SessionItems;
pub use keys::SessionKeys;
pub use lock_id::{LockId, lock_age};
pub use value::{BinarySerializer, JsonSerializer, SessionValue, ValueSerializer, serializer_for};
