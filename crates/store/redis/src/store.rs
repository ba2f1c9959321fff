use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use redis::{Script, Value};
use tracing::debug;

use sessionlock_core::SessionKeys;
use sessionlock_store::{
    ConnectionManager, ItemDelta, ReadReply, ReconnectPolicy, ScriptedStore, StoreError,
    WriteLockReply, ttl_seconds,
};

use crate::config::RedisConfig;
use crate::connection::{RedisConnectionFactory, map_redis_error};
use crate::reply::{decode_read_reply, decode_write_lock_reply};
use crate::scripts;

struct Scripts {
    acquire: Script,
    check: Script,
    set: Script,
    release: Script,
    update: Script,
    remove: Script,
    reset: Script,
}

impl Scripts {
    fn load() -> Self {
        Self {
            acquire: Script::new(scripts::ACQUIRE_WRITE_LOCK),
            check: Script::new(scripts::CHECK_WRITE_LOCK),
            set: Script::new(scripts::SET_ITEMS),
            release: Script::new(scripts::RELEASE_WRITE_LOCK),
            update: Script::new(scripts::UPDATE_AND_RELEASE),
            remove: Script::new(scripts::REMOVE_IF_OWNER),
            reset: Script::new(scripts::RESET_TIMEOUT),
        }
    }
}

fn text_arg(value: impl ToString) -> Vec<u8> {
    value.to_string().into_bytes()
}

/// Arguments of the full write: count, timeout, then field/value pairs.
fn set_args(items: &[(String, Bytes)], timeout: Duration) -> Vec<Vec<u8>> {
    let mut args = Vec::with_capacity(2 + items.len() * 2);
    args.push(text_arg(items.len()));
    args.push(text_arg(ttl_seconds(timeout)));
    for (name, value) in items {
        args.push(name.as_bytes().to_vec());
        args.push(value.to_vec());
    }
    args
}

/// Arguments of the update script.
///
/// Positions are 1-based Lua indices: the deleted names start at
/// [`scripts::UPDATE_FIRST_VARIABLE_ARG`], the updated pairs follow them.
fn update_args(lock_id: &str, timeout: Duration, delta: &ItemDelta) -> Vec<Vec<u8>> {
    let deleted = delta.deleted.len();
    let updated = delta.updated.len();
    let del_start = scripts::UPDATE_FIRST_VARIABLE_ARG;
    let del_end = del_start + deleted;
    let upd_start = del_end;
    let upd_end = upd_start + updated * 2;

    let mut args = Vec::with_capacity(8 + deleted + updated * 2);
    args.push(lock_id.as_bytes().to_vec());
    args.push(text_arg(ttl_seconds(timeout)));
    args.push(text_arg(deleted));
    args.push(text_arg(del_start));
    args.push(text_arg(del_end - 1));
    args.push(text_arg(updated));
    args.push(text_arg(upd_start));
    args.push(text_arg(upd_end - 1));
    for name in &delta.deleted {
        args.push(name.as_bytes().to_vec());
    }
    for (name, value) in &delta.updated {
        args.push(name.as_bytes().to_vec());
        args.push(value.to_vec());
    }
    args
}

/// Redis-backed implementation of [`ScriptedStore`].
///
/// Each operation is a single Lua script over the session's lock, data and
/// internal keys. The keys share a `{app_id}` hash tag, so the scripts also
/// run on a cluster.
pub struct RedisScriptedStore {
    manager: ConnectionManager<RedisConnectionFactory>,
    scripts: Scripts,
    operation_timeout: Duration,
}

impl RedisScriptedStore {
    /// Create a store from the provided configuration.
    ///
    /// No connection is opened until the first operation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Configuration`] if the connection settings are
    /// invalid.
    pub fn new(config: &RedisConfig, policy: ReconnectPolicy) -> Result<Self, StoreError> {
        let factory = RedisConnectionFactory::new(config)?;
        Ok(Self::with_manager(ConnectionManager::new(factory, policy)))
    }

    pub fn with_manager(manager: ConnectionManager<RedisConnectionFactory>) -> Self {
        let operation_timeout = manager.factory().operation_timeout();
        Self {
            manager,
            scripts: Scripts::load(),
            operation_timeout,
        }
    }

    pub fn manager(&self) -> &ConnectionManager<RedisConnectionFactory> {
        &self.manager
    }

    async fn run(
        &self,
        operation: &'static str,
        script: &Script,
        keys: &[&str],
        args: &[Vec<u8>],
    ) -> Result<Value, StoreError> {
        let timeout = self.operation_timeout;
        self.manager
            .execute(operation, |connection| {
                let mut invocation = script.prepare_invoke();
                for key in keys {
                    invocation.key(*key);
                }
                for arg in args {
                    invocation.arg(arg.as_slice());
                }
                async move {
                    let mut conn = (*connection).clone();
                    let reply: Result<redis::RedisResult<Value>, _> =
                        tokio::time::timeout(timeout, invocation.invoke_async(&mut conn)).await;
                    match reply {
                        Ok(result) => result.map_err(|e| map_redis_error(&e, timeout)),
                        Err(_) => Err(StoreError::Timeout(timeout)),
                    }
                }
            })
            .await
    }
}

#[async_trait]
impl ScriptedStore for RedisScriptedStore {
    async fn take_write_lock_and_get_data(
        &self,
        keys: &SessionKeys,
        lock_id: &str,
        lock_ttl: Duration,
    ) -> Result<WriteLockReply, StoreError> {
        let args = [
            lock_id.as_bytes().to_vec(),
            text_arg(ttl_seconds(lock_ttl)),
        ];
        let reply = self
            .run(
                "take_write_lock",
                &self.scripts.acquire,
                &[keys.lock_key(), keys.data_key(), keys.internal_key()],
                &args,
            )
            .await?;
        Ok(decode_write_lock_reply(reply))
    }

    async fn check_write_lock_and_get_data(
        &self,
        keys: &SessionKeys,
    ) -> Result<ReadReply, StoreError> {
        let reply = self
            .run(
                "check_write_lock",
                &self.scripts.check,
                &[keys.lock_key(), keys.data_key(), keys.internal_key()],
                &[],
            )
            .await?;
        Ok(decode_read_reply(reply))
    }

    async fn set(
        &self,
        keys: &SessionKeys,
        items: &[(String, Bytes)],
        timeout: Duration,
    ) -> Result<(), StoreError> {
        self.run(
            "set",
            &self.scripts.set,
            &[keys.data_key(), keys.internal_key()],
            &set_args(items, timeout),
        )
        .await?;
        Ok(())
    }

    async fn release_lock_if_owner(
        &self,
        keys: &SessionKeys,
        lock_id: &str,
        fallback_timeout: Duration,
    ) -> Result<(), StoreError> {
        let args = [
            lock_id.as_bytes().to_vec(),
            text_arg(ttl_seconds(fallback_timeout)),
        ];
        self.run(
            "release_write_lock",
            &self.scripts.release,
            &[keys.lock_key(), keys.data_key(), keys.internal_key()],
            &args,
        )
        .await?;
        Ok(())
    }

    async fn update_and_release_lock(
        &self,
        keys: &SessionKeys,
        lock_id: &str,
        timeout: Duration,
        delta: &ItemDelta,
    ) -> Result<(), StoreError> {
        let reply = self
            .run(
                "update_and_release",
                &self.scripts.update,
                &[keys.lock_key(), keys.data_key(), keys.internal_key()],
                &update_args(lock_id, timeout, delta),
            )
            .await?;
        if reply == Value::Int(0) {
            debug!(lock_key = keys.lock_key(), "update skipped, lock not owned");
        }
        Ok(())
    }

    async fn remove_if_owner(&self, keys: &SessionKeys, lock_id: &str) -> Result<(), StoreError> {
        self.run(
            "remove",
            &self.scripts.remove,
            &[keys.lock_key(), keys.data_key(), keys.internal_key()],
            &[lock_id.as_bytes().to_vec()],
        )
        .await?;
        Ok(())
    }

    async fn reset_timeout(&self, keys: &SessionKeys, timeout: Duration) -> Result<(), StoreError> {
        self.run(
            "reset_timeout",
            &self.scripts.reset,
            &[keys.data_key(), keys.internal_key()],
            &[text_arg(ttl_seconds(timeout))],
        )
        .await?;
        Ok(())
    }

    async fn time_to_live(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let timeout = self.operation_timeout;
        let millis: i64 = self
            .manager
            .execute("pttl", |connection| async move {
                let mut conn = (*connection).clone();
                let reply: Result<redis::RedisResult<i64>, _> = tokio::time::timeout(
                    timeout,
                    redis::cmd("PTTL").arg(key).query_async(&mut conn),
                )
                .await;
                match reply {
                    Ok(result) => result.map_err(|e| map_redis_error(&e, timeout)),
                    Err(_) => Err(StoreError::Timeout(timeout)),
                }
            })
            .await?;
        // -2: no such key, -1: no expiry.
        Ok(u64::try_from(millis).ok().map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn as_text(args: &[Vec<u8>]) -> Vec<String> {
        args.iter()
            .map(|a| String::from_utf8_lossy(a).into_owned())
            .collect()
    }

    #[test]
    fn update_args_index_layout() {
        let delta = ItemDelta {
            deleted: vec!["gone".into(), "also-gone".into()],
            updated: vec![
                ("a".into(), Bytes::from_static(b"1")),
                ("b".into(), Bytes::from_static(b"2")),
            ],
        };
        let args = as_text(&update_args("77", Duration::from_secs(1200), &delta));
        assert_eq!(
            args,
            vec![
                "77", "1200", "2", "9", "10", "2", "11", "14", "gone", "also-gone", "a", "1",
                "b", "2",
            ]
        );
        // Lua indices are 1-based: ARGV[9] is the first deleted name.
        assert_eq!(args[9 - 1], "gone");
        assert_eq!(args[11 - 1], "a");
        assert_eq!(args[14 - 1], "2");
    }

    #[test]
    fn update_args_without_deletions() {
        let delta = ItemDelta {
            deleted: Vec::new(),
            updated: vec![("a".into(), Bytes::from_static(b"1"))],
        };
        let args = as_text(&update_args("77", Duration::from_secs(60), &delta));
        assert_eq!(
            args,
            vec!["77", "60", "0", "9", "8", "1", "9", "10", "a", "1"]
        );
    }

    #[test]
    fn set_args_layout_keeps_raw_bytes() {
        let items = vec![("blob".to_owned(), Bytes::from_static(&[0xff, 0x00]))];
        let args = set_args(&items, Duration::from_millis(500));
        assert_eq!(args[0], b"1");
        assert_eq!(args[1], b"1", "sub-second timeout is clamped");
        assert_eq!(args[2], b"blob");
        assert_eq!(args[3], vec![0xff, 0x00]);
    }

    #[tokio::test]
    async fn unreachable_server_surfaces_connectivity_error() {
        let config = RedisConfig {
            host: "127.0.0.1".into(),
            port: 1,
            connection_timeout: Duration::from_millis(200),
            operation_timeout: Duration::from_millis(200),
            ..RedisConfig::default()
        };
        let store = RedisScriptedStore::new(&config, ReconnectPolicy::default()).unwrap();
        let keys = SessionKeys::for_session("unreachable", "s1");
        let err = store.check_write_lock_and_get_data(&keys).await.unwrap_err();
        assert!(err.is_transient(), "unexpected error: {err:?}");
    }
}
