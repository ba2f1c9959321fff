//! Decoding of script replies.
//!
//! Replies are positional arrays: `[owner, fields, timeout]` for a read and
//! `[owner, fields, timeout, already_locked]` for a lock attempt. Field
//! values stay raw bytes. A malformed reply or field list is logged and read
//! as "no data" rather than failing the request.

use std::time::Duration;

use bytes::Bytes;
use redis::Value;
use tracing::warn;

use sessionlock_store::{RawItems, ReadReply, WriteLockReply};

fn text(value: &Value) -> Option<String> {
    match value {
        Value::BulkString(raw) => String::from_utf8(raw.clone()).ok(),
        Value::SimpleString(s) => Some(s.clone()),
        Value::Int(n) => Some(n.to_string()),
        Value::Okay => Some("OK".to_owned()),
        _ => None,
    }
}

fn raw_bytes(value: &Value) -> Option<Bytes> {
    match value {
        Value::BulkString(raw) => Some(Bytes::copy_from_slice(raw)),
        Value::SimpleString(s) => Some(Bytes::copy_from_slice(s.as_bytes())),
        Value::Int(n) => Some(Bytes::from(n.to_string())),
        _ => None,
    }
}

/// Owner token in the first slot; `None` when the slot is unreadable.
fn owner(slots: &[Value]) -> Option<String> {
    match slots.first()? {
        Value::Nil => Some(String::new()),
        slot => text(slot),
    }
}

/// Decode a flat `field, value, field, value, ...` list.
fn fields(slot: Option<&Value>) -> Option<RawItems> {
    let Some(Value::Array(flat)) = slot else {
        return None;
    };
    if flat.is_empty() {
        return None;
    }
    if flat.len() % 2 != 0 {
        warn!(len = flat.len(), "odd-length field list in reply, treating as no data");
        return None;
    }

    let mut items = Vec::with_capacity(flat.len() / 2);
    for pair in flat.chunks_exact(2) {
        let (Some(name), Some(value)) = (text(&pair[0]), raw_bytes(&pair[1])) else {
            warn!("unreadable field in reply, treating as no data");
            return None;
        };
        items.push((name, value));
    }
    Some(items)
}

/// Session timeout in whole seconds; `-1` or anything unreadable means unset.
fn timeout(slot: Option<&Value>) -> Option<Duration> {
    let seconds = match slot? {
        Value::Int(n) => *n,
        other => text(other)?.trim().parse().ok()?,
    };
    u64::try_from(seconds).ok().map(Duration::from_secs)
}

fn flag(slot: Option<&Value>) -> bool {
    match slot {
        Some(Value::Int(n)) => *n != 0,
        Some(Value::Boolean(b)) => *b,
        Some(other) => text(other).is_some_and(|s| s == "1"),
        None => false,
    }
}

/// Split a reply into its slots and read the owner.
///
/// A reply of the wrong shape is logged and read as unlocked with no data.
fn slots(value: Value, operation: &'static str) -> Option<(String, Vec<Value>)> {
    let slots = match value {
        Value::Array(slots) => slots,
        other => {
            warn!(operation, reply = ?other, "script reply is not an array, treating as no data");
            return None;
        }
    };
    let Some(owner) = owner(&slots) else {
        warn!(operation, reply = ?slots.first(), "unreadable owner in script reply, treating as no data");
        return None;
    };
    Some((owner, slots))
}

/// Decode the reply of the lock-and-read script.
pub fn decode_write_lock_reply(value: Value) -> WriteLockReply {
    let Some((lock_id, slots)) = slots(value, "write_lock") else {
        return WriteLockReply {
            lock_id: String::new(),
            items: None,
            session_timeout: None,
            already_locked: false,
        };
    };
    WriteLockReply {
        lock_id,
        items: fields(slots.get(1)),
        session_timeout: timeout(slots.get(2)),
        already_locked: flag(slots.get(3)),
    }
}

/// Decode the reply of the shared read script.
pub fn decode_read_reply(value: Value) -> ReadReply {
    let Some((lock_id, slots)) = slots(value, "read") else {
        return ReadReply {
            lock_id: String::new(),
            items: None,
            session_timeout: None,
        };
    };
    ReadReply {
        lock_id,
        items: fields(slots.get(1)),
        session_timeout: timeout(slots.get(2)),
    }
}
