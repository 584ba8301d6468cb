//! Conformance suite for `MemoryBackend`.
//!
//! One test per check for fine-grained failure reporting, plus `run_all` on a
//! shared backend to confirm the checks do not interfere.

#![allow(clippy::expect_used, clippy::panic)]

use std::sync::Arc;

use pointgate_storage::{MemoryBackend, conformance};

#[tokio::test]
async fn crud_get_returns_none_for_missing_key() {
    conformance::crud_get_returns_none_for_missing_key(&MemoryBackend::new()).await;
}

#[tokio::test]
async fn crud_set_overwrites_existing() {
    conformance::crud_set_overwrites_existing(&MemoryBackend::new()).await;
}

#[tokio::test]
async fn crud_delete_returns_previous_value() {
    conformance::crud_delete_returns_previous_value(&MemoryBackend::new()).await;
}

#[tokio::test]
async fn crud_keys_are_byte_distinct() {
    conformance::crud_keys_are_byte_distinct(&MemoryBackend::new()).await;
}

#[tokio::test]
async fn cas_insert_if_absent() {
    conformance::cas_insert_if_absent(&MemoryBackend::new()).await;
}

#[tokio::test]
async fn cas_update_requires_exact_match() {
    conformance::cas_update_requires_exact_match(&MemoryBackend::new()).await;
}

#[tokio::test]
async fn set_if_present_requires_existing_key() {
    conformance::set_if_present_requires_existing_key(&MemoryBackend::new()).await;
}

#[tokio::test]
async fn range_results_are_ordered() {
    conformance::range_results_are_ordered(&MemoryBackend::new()).await;
}

#[tokio::test]
async fn range_bounds_are_honored() {
    conformance::range_bounds_are_honored(&MemoryBackend::new()).await;
}

#[tokio::test]
async fn range_inverted_is_empty() {
    conformance::range_inverted_is_empty(&MemoryBackend::new()).await;
}

#[tokio::test]
async fn range_limit_truncates() {
    conformance::range_limit_truncates(&MemoryBackend::new()).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_insert_exactly_one_winner() {
    conformance::concurrent_insert_exactly_one_winner(Arc::new(MemoryBackend::new())).await;
}

#[tokio::test]
async fn health_check_returns_healthy() {
    conformance::health_check_returns_healthy(&MemoryBackend::new()).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn run_all() {
    conformance::run_all(Arc::new(MemoryBackend::new())).await;
}
