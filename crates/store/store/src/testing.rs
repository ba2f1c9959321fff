//! Backend conformance suite.
//!
//! Call [`run_store_conformance_tests`] from a backend's test module with a
//! fresh store. Each check uses its own session id under `application`, so a
//! unique application name isolates concurrent runs against a shared server.

use std::time::Duration;

use bytes::Bytes;

use sessionlock_core::{LockId, SessionKeys};

use crate::error::StoreError;
use crate::store::{ItemDelta, ScriptedStore};

const LOCK_TTL: Duration = Duration::from_secs(30);
const SESSION_TTL: Duration = Duration::from_secs(300);

fn field(name: &str, value: &[u8]) -> (String, Bytes) {
    (name.to_owned(), Bytes::copy_from_slice(value))
}

fn sorted(mut items: Vec<(String, Bytes)>) -> Vec<(String, Bytes)> {
    items.sort();
    items
}

/// Run the full scripted store conformance suite.
///
/// # Errors
///
/// Returns an error if a store call fails; behavioral mismatches panic.
pub async fn run_store_conformance_tests(
    store: &dyn ScriptedStore,
    application: &str,
) -> Result<(), StoreError> {
    test_lock_on_missing_record(store, application).await?;
    test_set_then_shared_read(store, application).await?;
    test_second_locker_is_blocked(store, application).await?;
    test_same_token_is_reported_locked(store, application).await?;
    test_shared_read_while_locked(store, application).await?;
    test_release_requires_owner(store, application).await?;
    test_update_applies_delta_and_releases(store, application).await?;
    test_update_by_stranger_is_ignored(store, application).await?;
    test_remove_requires_owner(store, application).await?;
    test_reset_timeout_never_creates(store, application).await?;
    test_ttl_parity(store, application).await?;
    test_stored_timeout_is_authoritative(store, application).await?;
    test_concurrent_lockers_single_winner(store, application).await?;
    Ok(())
}

async fn test_lock_on_missing_record(
    store: &dyn ScriptedStore,
    app: &str,
) -> Result<(), StoreError> {
    let keys = SessionKeys::for_session(app, "missing");
    let token = LockId::generate();
    let reply = store
        .take_write_lock_and_get_data(&keys, token.as_str(), LOCK_TTL)
        .await?;
    assert!(reply.acquired_by(token.as_str()), "free lock should be taken");
    assert!(reply.items.is_none(), "missing record has no data");
    assert!(reply.session_timeout.is_none(), "missing record has no timeout");
    store
        .release_lock_if_owner(&keys, token.as_str(), SESSION_TTL)
        .await?;
    Ok(())
}

async fn test_set_then_shared_read(store: &dyn ScriptedStore, app: &str) -> Result<(), StoreError> {
    let keys = SessionKeys::for_session(app, "set-read");
    let items = vec![field("name", b"ann"), field("blob", &[0xff, 0x00, 0x7f])];
    store.set(&keys, &items, Duration::from_secs(60)).await?;

    let reply = store.check_write_lock_and_get_data(&keys).await?;
    assert!(!reply.is_locked());
    assert_eq!(
        reply.items.map(sorted),
        Some(sorted(items)),
        "stored bytes should come back unchanged"
    );
    assert_eq!(reply.session_timeout, Some(Duration::from_secs(60)));
    Ok(())
}

async fn test_second_locker_is_blocked(
    store: &dyn ScriptedStore,
    app: &str,
) -> Result<(), StoreError> {
    let keys = SessionKeys::for_session(app, "blocked");
    store.set(&keys, &[field("k", b"v")], SESSION_TTL).await?;

    let first = LockId::generate();
    let reply = store
        .take_write_lock_and_get_data(&keys, first.as_str(), LOCK_TTL)
        .await?;
    assert!(reply.acquired_by(first.as_str()));
    assert_eq!(reply.items, Some(vec![field("k", b"v")]));

    let second = LockId::generate();
    let reply = store
        .take_write_lock_and_get_data(&keys, second.as_str(), LOCK_TTL)
        .await?;
    assert!(reply.already_locked, "held lock should be reported");
    assert_eq!(reply.lock_id, first.as_str(), "holder token should be returned");
    assert!(reply.items.is_none(), "blocked caller must not see data");

    store
        .release_lock_if_owner(&keys, first.as_str(), SESSION_TTL)
        .await?;
    Ok(())
}

async fn test_same_token_is_reported_locked(
    store: &dyn ScriptedStore,
    app: &str,
) -> Result<(), StoreError> {
    let keys = SessionKeys::for_session(app, "reentry");
    store.set(&keys, &[field("k", b"v")], SESSION_TTL).await?;

    let token = LockId::generate();
    store
        .take_write_lock_and_get_data(&keys, token.as_str(), LOCK_TTL)
        .await?;
    let again = store
        .take_write_lock_and_get_data(&keys, token.as_str(), LOCK_TTL)
        .await?;
    assert!(again.already_locked, "re-entry with the same token is still locked");
    assert!(!again.acquired_by(token.as_str()));

    store
        .release_lock_if_owner(&keys, token.as_str(), SESSION_TTL)
        .await?;
    Ok(())
}

async fn test_shared_read_while_locked(
    store: &dyn ScriptedStore,
    app: &str,
) -> Result<(), StoreError> {
    let keys = SessionKeys::for_session(app, "shared-locked");
    store.set(&keys, &[field("k", b"v")], SESSION_TTL).await?;
    let token = LockId::generate();
    store
        .take_write_lock_and_get_data(&keys, token.as_str(), LOCK_TTL)
        .await?;

    let reply = store.check_write_lock_and_get_data(&keys).await?;
    assert_eq!(reply.lock_id, token.as_str());
    assert!(reply.items.is_none(), "locked record is not read");

    store
        .release_lock_if_owner(&keys, token.as_str(), SESSION_TTL)
        .await?;
    Ok(())
}

async fn test_release_requires_owner(
    store: &dyn ScriptedStore,
    app: &str,
) -> Result<(), StoreError> {
    let keys = SessionKeys::for_session(app, "release");
    store.set(&keys, &[field("k", b"v")], SESSION_TTL).await?;
    let token = LockId::generate();
    store
        .take_write_lock_and_get_data(&keys, token.as_str(), LOCK_TTL)
        .await?;

    store
        .release_lock_if_owner(&keys, "someone-else", SESSION_TTL)
        .await?;
    let reply = store.check_write_lock_and_get_data(&keys).await?;
    assert!(reply.is_locked(), "stranger must not release the lock");

    store
        .release_lock_if_owner(&keys, token.as_str(), SESSION_TTL)
        .await?;
    let reply = store.check_write_lock_and_get_data(&keys).await?;
    assert!(!reply.is_locked(), "owner release frees the lock");
    assert!(reply.items.is_some());
    Ok(())
}

async fn test_update_applies_delta_and_releases(
    store: &dyn ScriptedStore,
    app: &str,
) -> Result<(), StoreError> {
    let keys = SessionKeys::for_session(app, "update");
    store
        .set(
            &keys,
            &[field("keep", b"1"), field("change", b"2"), field("drop", b"3")],
            SESSION_TTL,
        )
        .await?;
    let token = LockId::generate();
    store
        .take_write_lock_and_get_data(&keys, token.as_str(), LOCK_TTL)
        .await?;

    let delta = ItemDelta {
        deleted: vec!["drop".into()],
        updated: vec![field("change", b"22"), field("new", b"4")],
    };
    store
        .update_and_release_lock(&keys, token.as_str(), Duration::from_secs(90), &delta)
        .await?;

    let reply = store.check_write_lock_and_get_data(&keys).await?;
    assert!(!reply.is_locked(), "update releases the lock");
    assert_eq!(
        reply.items.map(sorted),
        Some(sorted(vec![
            field("keep", b"1"),
            field("change", b"22"),
            field("new", b"4"),
        ]))
    );
    assert_eq!(reply.session_timeout, Some(Duration::from_secs(90)));
    Ok(())
}

async fn test_update_by_stranger_is_ignored(
    store: &dyn ScriptedStore,
    app: &str,
) -> Result<(), StoreError> {
    let keys = SessionKeys::for_session(app, "update-stranger");
    store.set(&keys, &[field("k", b"v")], SESSION_TTL).await?;
    let token = LockId::generate();
    store
        .take_write_lock_and_get_data(&keys, token.as_str(), LOCK_TTL)
        .await?;

    let delta = ItemDelta {
        deleted: vec!["k".into()],
        updated: Vec::new(),
    };
    store
        .update_and_release_lock(&keys, "stale-token", SESSION_TTL, &delta)
        .await?;

    let reply = store.check_write_lock_and_get_data(&keys).await?;
    assert_eq!(reply.lock_id, token.as_str(), "lock stays with its owner");
    store
        .release_lock_if_owner(&keys, token.as_str(), SESSION_TTL)
        .await?;
    let reply = store.check_write_lock_and_get_data(&keys).await?;
    assert_eq!(reply.items, Some(vec![field("k", b"v")]), "data untouched");
    Ok(())
}

async fn test_remove_requires_owner(
    store: &dyn ScriptedStore,
    app: &str,
) -> Result<(), StoreError> {
    let keys = SessionKeys::for_session(app, "remove");
    store.set(&keys, &[field("k", b"v")], SESSION_TTL).await?;
    let token = LockId::generate();
    store
        .take_write_lock_and_get_data(&keys, token.as_str(), LOCK_TTL)
        .await?;

    store.remove_if_owner(&keys, "stale-token").await?;
    assert!(store.time_to_live(keys.data_key()).await?.is_some());

    store.remove_if_owner(&keys, token.as_str()).await?;
    assert!(store.time_to_live(keys.data_key()).await?.is_none());
    assert!(store.time_to_live(keys.internal_key()).await?.is_none());
    assert!(store.time_to_live(keys.lock_key()).await?.is_none());
    Ok(())
}

async fn test_reset_timeout_never_creates(
    store: &dyn ScriptedStore,
    app: &str,
) -> Result<(), StoreError> {
    let keys = SessionKeys::for_session(app, "reset-missing");
    store.reset_timeout(&keys, SESSION_TTL).await?;
    assert!(store.time_to_live(keys.data_key()).await?.is_none());
    assert!(store.time_to_live(keys.internal_key()).await?.is_none());
    Ok(())
}

async fn test_ttl_parity(store: &dyn ScriptedStore, app: &str) -> Result<(), StoreError> {
    let keys = SessionKeys::for_session(app, "ttl-parity");
    store.set(&keys, &[field("k", b"v")], SESSION_TTL).await?;
    store
        .reset_timeout(&keys, Duration::from_secs(3600))
        .await?;

    let data = store.time_to_live(keys.data_key()).await?;
    let internal = store.time_to_live(keys.internal_key()).await?;
    let (Some(data), Some(internal)) = (data, internal) else {
        panic!("both keys should carry a TTL");
    };
    assert!(data <= SESSION_TTL, "stored timeout wins over the reset argument");
    let skew = data.abs_diff(internal);
    assert!(skew <= Duration::from_secs(2), "TTLs drifted apart by {skew:?}");
    Ok(())
}

async fn test_stored_timeout_is_authoritative(
    store: &dyn ScriptedStore,
    app: &str,
) -> Result<(), StoreError> {
    let keys = SessionKeys::for_session(app, "authoritative");
    store
        .set(&keys, &[field("k", b"v")], Duration::from_secs(120))
        .await?;
    let token = LockId::generate();
    let reply = store
        .take_write_lock_and_get_data(&keys, token.as_str(), Duration::from_secs(5))
        .await?;
    assert_eq!(reply.session_timeout, Some(Duration::from_secs(120)));
    let ttl = store.time_to_live(keys.data_key()).await?;
    assert!(ttl.is_some_and(|t| t > Duration::from_secs(5)));
    store
        .release_lock_if_owner(&keys, token.as_str(), SESSION_TTL)
        .await?;
    Ok(())
}

async fn test_concurrent_lockers_single_winner(
    store: &dyn ScriptedStore,
    app: &str,
) -> Result<(), StoreError> {
    let keys = SessionKeys::for_session(app, "race");
    store.set(&keys, &[field("k", b"v")], SESSION_TTL).await?;

    let tokens: Vec<LockId> = (0..8).map(|_| LockId::generate()).collect();
    let attempts = tokens
        .iter()
        .map(|token| store.take_write_lock_and_get_data(&keys, token.as_str(), LOCK_TTL));
    let replies = futures::future::join_all(attempts).await;

    let mut winners = Vec::new();
    for (token, reply) in tokens.iter().zip(replies) {
        let reply = reply?;
        if reply.acquired_by(token.as_str()) {
            winners.push((token.clone(), reply));
        }
    }
    assert_eq!(winners.len(), 1, "exactly one locker should win");
    let winner = &winners[0].0;

    let reply = store.check_write_lock_and_get_data(&keys).await?;
    assert_eq!(reply.lock_id, winner.as_str());
    store
        .release_lock_if_owner(&keys, winner.as_str(), SESSION_TTL)
        .await?;
    Ok(())
}
