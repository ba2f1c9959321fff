//! Lua scripts for atomic session operations.
//!
//! Key and argument positions are part of the protocol: the store builds its
//! invocations against exactly these layouts. All TTL arguments are whole
//! seconds. The internal hash field `SessionTimeout` holds the timeout that
//! later scripts re-apply to the data and internal keys.

/// Take the write lock if free and read the record.
///
/// `KEYS[1]` lock, `KEYS[2]` data, `KEYS[3]` internal.
/// `ARGV[1]` candidate owner token, `ARGV[2]` lock TTL.
///
/// Returns `{owner, fields, timeout, already_locked}`. `fields` is only filled
/// when the lock is held by the candidate; `timeout` is `'-1'` when unset.
pub const ACQUIRE_WRITE_LOCK: &str = r"
local already = 1
if redis.call('SETNX', KEYS[1], ARGV[1]) == 1 then
    redis.call('EXPIRE', KEYS[1], ARGV[2])
    already = 0
end
local owner = redis.call('GET', KEYS[1])
if owner == false then
    owner = ''
end
local fields = {}
if owner == ARGV[1] then
    fields = redis.call('HGETALL', KEYS[2])
end
local timeout = redis.call('HGET', KEYS[3], 'SessionTimeout')
if timeout == false then
    timeout = '-1'
else
    redis.call('EXPIRE', KEYS[2], timeout)
    redis.call('EXPIRE', KEYS[3], timeout)
end
return {owner, fields, timeout, already}
";

/// Read the record without locking.
///
/// `KEYS[1]` lock, `KEYS[2]` data, `KEYS[3]` internal. No arguments.
///
/// Returns `{owner or '', fields, timeout}`; `fields` is empty while locked.
pub const CHECK_WRITE_LOCK: &str = r"
local owner = redis.call('GET', KEYS[1])
if owner == false then
    owner = ''
end
local fields = {}
if owner == '' then
    fields = redis.call('HGETALL', KEYS[2])
end
local timeout = redis.call('HGET', KEYS[3], 'SessionTimeout')
if timeout == false then
    timeout = '-1'
else
    redis.call('EXPIRE', KEYS[2], timeout)
    redis.call('EXPIRE', KEYS[3], timeout)
end
return {owner, fields, timeout}
";

/// Write a full record.
///
/// `KEYS[1]` data, `KEYS[2]` internal.
/// `ARGV[1]` field count, `ARGV[2]` timeout, then `field, value` pairs.
pub const SET_ITEMS: &str = r"
local count = tonumber(ARGV[1])
for i = 0, count - 1 do
    redis.call('HSET', KEYS[1], ARGV[3 + 2 * i], ARGV[4 + 2 * i])
end
redis.call('HSET', KEYS[2], 'SessionTimeout', ARGV[2])
redis.call('EXPIRE', KEYS[1], ARGV[2])
redis.call('EXPIRE', KEYS[2], ARGV[2])
return 1
";

/// Release the lock if owned and refresh the record TTL.
///
/// `KEYS[1]` lock, `KEYS[2]` data, `KEYS[3]` internal.
/// `ARGV[1]` owner token, `ARGV[2]` fallback timeout.
pub const RELEASE_WRITE_LOCK: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    redis.call('DEL', KEYS[1])
end
local timeout = redis.call('HGET', KEYS[3], 'SessionTimeout')
if timeout == false then
    timeout = ARGV[2]
end
redis.call('EXPIRE', KEYS[2], timeout)
redis.call('EXPIRE', KEYS[3], timeout)
return 1
";

/// Apply a field delta and release the lock, only if owned.
///
/// `KEYS[1]` lock, `KEYS[2]` data, `KEYS[3]` internal.
/// `ARGV[1]` owner token, `ARGV[2]` timeout,
/// `ARGV[3..5]` deleted count and first/last index,
/// `ARGV[6..8]` updated count and first/last index,
/// then the deleted field names, then the updated `field, value` pairs.
///
/// Returns 1 when applied, 0 when the lock belongs to someone else.
pub const UPDATE_AND_RELEASE: &str = r"
if redis.call('GET', KEYS[1]) ~= ARGV[1] then
    return 0
end
if tonumber(ARGV[3]) > 0 then
    for i = tonumber(ARGV[4]), tonumber(ARGV[5]) do
        redis.call('HDEL', KEYS[2], ARGV[i])
    end
end
if tonumber(ARGV[6]) > 0 then
    for i = tonumber(ARGV[7]), tonumber(ARGV[8]), 2 do
        redis.call('HSET', KEYS[2], ARGV[i], ARGV[i + 1])
    end
end
redis.call('HSET', KEYS[3], 'SessionTimeout', ARGV[2])
redis.call('EXPIRE', KEYS[2], ARGV[2])
redis.call('EXPIRE', KEYS[3], ARGV[2])
redis.call('DEL', KEYS[1])
return 1
";

/// Delete the whole record if the lock is owned.
///
/// `KEYS[1]` lock, `KEYS[2]` data, `KEYS[3]` internal. `ARGV[1]` owner token.
pub const REMOVE_IF_OWNER: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    redis.call('DEL', KEYS[1], KEYS[2], KEYS[3])
    return 1
end
return 0
";

/// Refresh the record TTL without touching the lock.
///
/// `KEYS[1]` data, `KEYS[2]` internal. `ARGV[1]` fallback timeout.
/// `EXPIRE` on a missing key is a no-op, so this never creates a record.
pub const RESET_TIMEOUT: &str = r"
local timeout = redis.call('HGET', KEYS[2], 'SessionTimeout')
if timeout == false then
    timeout = ARGV[1]
end
redis.call('EXPIRE', KEYS[1], timeout)
redis.call('EXPIRE', KEYS[2], timeout)
return 1
";

/// First argument index of the variable section of [`UPDATE_AND_RELEASE`].
pub const UPDATE_FIRST_VARIABLE_ARG: usize = 9;
