#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Store failures injected through `pointgate-storage` fail points.
//!
//! These tests require the `failpoints` feature:
//! ```bash
//! cargo test -p pointgate-api --features failpoints --test failpoint_tests
//! ```

use pointgate_api::{ApiError, DataPoint, DataPointKey, Pagination, ResolverPipeline};
use pointgate_storage::MemoryBackend;
use serde_json::json;

fn pipeline() -> ResolverPipeline<MemoryBackend> {
    ResolverPipeline::builder().backend(MemoryBackend::new()).build().expect("pipeline")
}

fn temp() -> DataPoint {
    DataPoint::new("temp", "2024-01-01T00:00:00Z", json!(21.5))
}

#[tokio::test]
async fn unavailable_store_on_create_is_retryable_and_silent() {
    let scenario = fail::FailScenario::setup();
    fail::cfg("memory-write", "return").expect("failed to configure fail point");

    let pipeline = pipeline();
    let mut events = pipeline.on_create_data_point(None);
    let err = pipeline.create_data_point(temp()).await.expect_err("create should fail");

    assert!(matches!(err, ApiError::StoreUnavailable(_)), "got {err:?}");
    assert!(err.is_retryable());
    assert!(events.try_recv().is_none(), "failed writes must not be published");
    assert!(pipeline.backend().is_empty());

    scenario.teardown();
}

#[tokio::test]
async fn retry_after_recovery_succeeds() {
    let scenario = fail::FailScenario::setup();
    let pipeline = pipeline();

    fail::cfg("memory-write", "1*return").expect("failed to configure fail point");
    let first = pipeline.create_data_point(temp()).await;
    assert!(first.is_err_and(|e| e.is_retryable()));

    let second = pipeline.create_data_point(temp()).await.expect("retry succeeds");
    assert_eq!(second, temp());

    scenario.teardown();
}

#[tokio::test]
async fn unavailable_store_on_reads() {
    let scenario = fail::FailScenario::setup();
    fail::cfg("memory-get", "return").expect("failed to configure fail point");

    let pipeline = pipeline();
    let get = pipeline.get_data_point(DataPointKey::new("temp", "2024-01-01T00:00:00Z")).await;
    assert!(matches!(get, Err(ApiError::StoreUnavailable(_))));

    let list = pipeline.list_data_points(Pagination::default()).await;
    assert!(matches!(list, Err(ApiError::StoreUnavailable(_))));

    scenario.teardown();
}

#[tokio::test]
async fn failed_health_probe_reports_error() {
    let scenario = fail::FailScenario::setup();
    fail::cfg("health-check", "return").expect("failed to configure fail point");

    let err = pipeline().health_check().await.expect_err("health check should fail");
    assert!(err.is_retryable());

    scenario.teardown();
}
