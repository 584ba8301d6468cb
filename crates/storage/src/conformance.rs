//! Conformance suite for [`StorageBackend`] implementations.
//!
//! Each function checks one aspect of the contract the resolver pipeline
//! relies on. Call them with a fresh backend, or use [`run_all`].
//!
//! ```no_run
//! use pointgate_storage::{MemoryBackend, conformance};
//!
//! #[tokio::test]
//! async fn get_missing() {
//!     conformance::crud_get_returns_none_for_missing_key(&MemoryBackend::new()).await;
//! }
//! ```
//!
//! | Category | Contract aspect |
//! |----------|-----------------|
//! | CRUD | get/set/delete semantics |
//! | Conditional | `compare_and_set` and `set_if_present` preconditions |
//! | Range | ordering, bounds, limits, inverted ranges |
//! | Concurrent | single winner among racing inserts |
//! | Health | every probe answers |

use std::{ops::Bound, sync::Arc};

use bytes::Bytes;

use crate::{backend::StorageBackend, error::StorageError, health::HealthProbe};

// ============================================================================
// CRUD
// ============================================================================

/// `get` on a nonexistent key returns `Ok(None)`.
pub async fn crud_get_returns_none_for_missing_key<B: StorageBackend>(backend: &B) {
    let result = backend.get(b"crud:nonexistent").await;
    assert!(matches!(result, Ok(None)), "missing key should return Ok(None): {result:?}");
}

/// `set` then `get` round-trips the value, and a second `set` overwrites it.
pub async fn crud_set_overwrites_existing<B: StorageBackend>(backend: &B) {
    backend.set(b"crud:k".to_vec(), b"v1".to_vec()).await.expect("first set");
    assert_eq!(backend.get(b"crud:k").await.expect("get"), Some(Bytes::from("v1")));
    backend.set(b"crud:k".to_vec(), b"v2".to_vec()).await.expect("second set");
    assert_eq!(backend.get(b"crud:k").await.expect("get"), Some(Bytes::from("v2")));
}

/// `delete` returns the removed value; deleting again returns `None`.
pub async fn crud_delete_returns_previous_value<B: StorageBackend>(backend: &B) {
    backend.set(b"crud:del".to_vec(), b"gone".to_vec()).await.expect("set");
    let first = backend.delete(b"crud:del").await.expect("first delete");
    assert_eq!(first, Some(Bytes::from("gone")));
    let second = backend.delete(b"crud:del").await.expect("second delete");
    assert_eq!(second, None, "deleting an absent key is a no-op");
    assert_eq!(backend.get(b"crud:del").await.expect("get"), None);
}

/// Keys that differ only by a trailing byte are distinct.
pub async fn crud_keys_are_byte_distinct<B: StorageBackend>(backend: &B) {
    backend.set(b"crud:ab".to_vec(), b"1".to_vec()).await.expect("set ab");
    backend.set(b"crud:ab\x00".to_vec(), b"2".to_vec()).await.expect("set ab\\0");
    assert_eq!(backend.get(b"crud:ab").await.expect("get"), Some(Bytes::from("1")));
    assert_eq!(backend.get(b"crud:ab\x00").await.expect("get"), Some(Bytes::from("2")));
}

// ============================================================================
// Conditional writes
// ============================================================================

/// Insert-if-absent succeeds once, then conflicts without touching the value.
pub async fn cas_insert_if_absent<B: StorageBackend>(backend: &B) {
    backend.compare_and_set(b"cas:new", None, b"first".to_vec()).await.expect("insert");
    let second = backend.compare_and_set(b"cas:new", None, b"second".to_vec()).await;
    assert!(matches!(second, Err(StorageError::Conflict)), "got {second:?}");
    assert_eq!(backend.get(b"cas:new").await.expect("get"), Some(Bytes::from("first")));
}

/// Update-if-unchanged requires a byte-exact match.
pub async fn cas_update_requires_exact_match<B: StorageBackend>(backend: &B) {
    backend.set(b"cas:upd".to_vec(), b"v1".to_vec()).await.expect("set");
    let stale = backend.compare_and_set(b"cas:upd", Some(b"v0"), b"v2".to_vec()).await;
    assert!(matches!(stale, Err(StorageError::Conflict)), "got {stale:?}");
    backend.compare_and_set(b"cas:upd", Some(b"v1"), b"v2".to_vec()).await.expect("match");
    assert_eq!(backend.get(b"cas:upd").await.expect("get"), Some(Bytes::from("v2")));
}

/// `set_if_present` fails with `NotFound` on an absent key and writes nothing.
pub async fn set_if_present_requires_existing_key<B: StorageBackend>(backend: &B) {
    let missing = backend.set_if_present(b"sip:k", b"v".to_vec()).await;
    assert!(matches!(missing, Err(StorageError::NotFound { .. })), "got {missing:?}");
    assert_eq!(backend.get(b"sip:k").await.expect("get"), None);

    backend.set(b"sip:k".to_vec(), b"old".to_vec()).await.expect("set");
    backend.set_if_present(b"sip:k", b"new".to_vec()).await.expect("update");
    assert_eq!(backend.get(b"sip:k").await.expect("get"), Some(Bytes::from("new")));
}

// ============================================================================
// Range
// ============================================================================

/// Range results come back in ascending byte order regardless of insert order.
pub async fn range_results_are_ordered<B: StorageBackend>(backend: &B) {
    for key in [&b"rng:c"[..], b"rng:a", b"rng:b"] {
        backend.set(key.to_vec(), b"x".to_vec()).await.expect("set");
    }
    let results = backend.get_range(b"rng:".to_vec()..b"rng;".to_vec()).await.expect("range");
    let keys: Vec<&[u8]> = results.iter().map(|kv| kv.key.as_ref()).collect();
    assert_eq!(keys, vec![&b"rng:a"[..], b"rng:b", b"rng:c"]);
}

/// Inclusive and exclusive end bounds are honored.
pub async fn range_bounds_are_honored<B: StorageBackend>(backend: &B) {
    for key in [&b"bnd:1"[..], b"bnd:2", b"bnd:3"] {
        backend.set(key.to_vec(), b"x".to_vec()).await.expect("set");
    }
    let exclusive = backend.get_range(b"bnd:1".to_vec()..b"bnd:3".to_vec()).await.expect("range");
    assert_eq!(exclusive.len(), 2);
    let inclusive = backend.get_range(b"bnd:1".to_vec()..=b"bnd:3".to_vec()).await.expect("range");
    assert_eq!(inclusive.len(), 3);
    let after = backend
        .get_range((Bound::Excluded(b"bnd:1".to_vec()), Bound::Included(b"bnd:3".to_vec())))
        .await
        .expect("range");
    assert_eq!(after.first().map(|kv| kv.key.clone()), Some(Bytes::from("bnd:2")));
}

/// An inverted range yields an empty result instead of failing.
pub async fn range_inverted_is_empty<B: StorageBackend>(backend: &B) {
    backend.set(b"inv:m".to_vec(), b"x".to_vec()).await.expect("set");
    let results = backend.get_range(b"inv:z".to_vec()..=b"inv:a".to_vec()).await.expect("range");
    assert!(results.is_empty(), "inverted range should be empty: {results:?}");
}

/// `get_range_limited` returns at most `limit` entries, starting at the lowest key.
pub async fn range_limit_truncates<B: StorageBackend>(backend: &B) {
    for i in 0..5u8 {
        backend.set(format!("lim:{i}").into_bytes(), vec![i]).await.expect("set");
    }
    let page = backend.get_range_limited(b"lim:".to_vec()..b"lim;".to_vec(), 2).await.expect("range");
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].key, Bytes::from("lim:0"));
    assert_eq!(page[1].key, Bytes::from("lim:1"));
}

// ============================================================================
// Concurrent
// ============================================================================

/// Concurrent insert-if-absent on one key: exactly one writer wins.
pub async fn concurrent_insert_exactly_one_winner<B: StorageBackend + 'static>(backend: Arc<B>) {
    let mut handles = Vec::new();
    for i in 0u32..16 {
        let backend = Arc::clone(&backend);
        handles.push(tokio::spawn(async move {
            backend.compare_and_set(b"race:k", None, format!("writer-{i}").into_bytes()).await
        }));
    }

    let mut successes = 0u32;
    let mut conflicts = 0u32;
    for handle in handles {
        match handle.await.expect("task join") {
            Ok(()) => successes += 1,
            Err(StorageError::Conflict) => conflicts += 1,
            Err(e) => panic!("unexpected error: {e:?}"),
        }
    }

    assert_eq!(successes, 1, "exactly one insert should win");
    assert_eq!(conflicts, 15, "remaining inserts should conflict");
}

// ============================================================================
// Health
// ============================================================================

/// `health_check` answers every probe type on a fresh backend.
pub async fn health_check_returns_healthy<B: StorageBackend>(backend: &B) {
    for probe in [HealthProbe::Liveness, HealthProbe::Readiness, HealthProbe::Startup] {
        let status = backend.health_check(probe).await.expect("health_check");
        assert!(
            status.is_healthy() || status.is_degraded(),
            "health_check({probe}) should be healthy or degraded, got: {status:?}"
        );
    }
}

/// Run the full conformance suite against one backend.
///
/// Every check uses its own key prefix, so they can share a backend.
pub async fn run_all<B: StorageBackend + 'static>(backend: Arc<B>) {
    crud_get_returns_none_for_missing_key(backend.as_ref()).await;
    crud_set_overwrites_existing(backend.as_ref()).await;
    crud_delete_returns_previous_value(backend.as_ref()).await;
    crud_keys_are_byte_distinct(backend.as_ref()).await;

    cas_insert_if_absent(backend.as_ref()).await;
    cas_update_requires_exact_match(backend.as_ref()).await;
    set_if_present_requires_existing_key(backend.as_ref()).await;

    range_results_are_ordered(backend.as_ref()).await;
    range_bounds_are_honored(backend.as_ref()).await;
    range_inverted_is_empty(backend.as_ref()).await;
    range_limit_truncates(backend.as_ref()).await;

    concurrent_insert_exactly_one_winner(Arc::clone(&backend)).await;

    health_check_returns_healthy(backend.as_ref()).await;
}
