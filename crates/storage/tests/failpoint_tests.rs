#![allow(clippy::expect_used, clippy::panic)]
//! Integration tests for fail-point injection.
//!
//! These tests require the `failpoints` feature:
//! ```bash
//! cargo test -p pointgate-storage --features failpoints --test failpoint_tests
//! ```

use pointgate_storage::{HealthProbe, MemoryBackend, StorageBackend, StorageError};

#[tokio::test]
async fn write_failpoint_surfaces_transient_error() {
    let scenario = fail::FailScenario::setup();
    fail::cfg("memory-write", "return").expect("failed to configure fail point");

    let backend = MemoryBackend::new();
    let err = backend
        .compare_and_set(b"k", None, b"v".to_vec())
        .await
        .expect_err("write should fail while the fail point is active");

    assert!(matches!(err, StorageError::Connection { .. }), "got {err:?}");
    assert!(err.is_transient());
    assert!(backend.is_empty(), "nothing may be written on injected failure");

    scenario.teardown();
}

#[tokio::test]
async fn read_failpoint_surfaces_transient_error() {
    let scenario = fail::FailScenario::setup();
    fail::cfg("memory-get", "return").expect("failed to configure fail point");

    let backend = MemoryBackend::new();
    assert!(backend.get(b"k").await.is_err());
    assert!(backend.get_range(b"a".to_vec()..b"z".to_vec()).await.is_err());

    scenario.teardown();
}

#[tokio::test]
async fn health_check_failpoint_returns_error() {
    let scenario = fail::FailScenario::setup();
    fail::cfg("health-check", "return").expect("failed to configure fail point");

    let backend = MemoryBackend::new();
    let result = backend.health_check(HealthProbe::Readiness).await;
    assert!(result.is_err(), "health check should fail when fail point is active");

    scenario.teardown();
}

#[tokio::test]
async fn operations_succeed_without_failpoints() {
    let scenario = fail::FailScenario::setup();

    let backend = MemoryBackend::new();
    backend.set(b"k".to_vec(), b"v".to_vec()).await.expect("set");
    assert!(backend.get(b"k").await.expect("get").is_some());
    assert!(backend.health_check(HealthProbe::Readiness).await.is_ok());

    scenario.teardown();
}
