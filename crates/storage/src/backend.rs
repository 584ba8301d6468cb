//! Storage backend trait definition.
//!
//! This module defines the [`StorageBackend`] trait, the contract every
//! partitioned key-value store must satisfy before the resolver pipeline can
//! drive it.
//!
//! # Design Philosophy
//!
//! - **Keys and values are bytes**: no assumptions about item encoding
//! - **Async by default**: all operations are async for non-blocking I/O
//! - **Ordered range queries**: keys iterate in lexicographic byte order
//! - **Conditional writes**: insert-if-absent and update-if-present are single atomic steps
//!
//! Data-point logic (partition and sort keys, item attributes) lives in the
//! API crate, not in the backends.
//!
//! # Implementing a Backend
//!
//! 1. Implement the [`StorageBackend`] trait
//! 2. Map backend-specific errors to [`StorageError`](crate::StorageError)
//! 3. Run the [`conformance`](crate::conformance) suite against it
//!
//! See [`MemoryBackend`](crate::MemoryBackend) for a reference implementation.

use std::ops::RangeBounds;

use async_trait::async_trait;
use bytes::Bytes;

use crate::{
    error::StorageResult,
    health::{HealthProbe, HealthStatus},
    types::KeyValue,
};

/// Abstract storage backend for key-value operations.
///
/// Backends are expected to be thread-safe (`Send + Sync`) and to make every
/// single-key operation atomic with respect to concurrent callers.
///
/// # Key Operations
///
/// | Method | Description |
/// |--------|-------------|
/// | [`get`](StorageBackend::get) | Retrieve a single value by key |
/// | [`set`](StorageBackend::set) | Store a key-value pair unconditionally |
/// | [`compare_and_set`](StorageBackend::compare_and_set) | Atomic compare-and-swap |
/// | [`set_if_present`](StorageBackend::set_if_present) | Overwrite only an existing key |
/// | [`delete`](StorageBackend::delete) | Remove a key, returning the old value |
/// | [`get_range`](StorageBackend::get_range) | Retrieve all keys in a range |
/// | [`get_range_limited`](StorageBackend::get_range_limited) | Retrieve at most `limit` keys |
/// | [`health_check`](StorageBackend::health_check) | Verify backend availability |
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use pointgate_storage::{MemoryBackend, StorageBackend};
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let backend = MemoryBackend::new();
///
/// backend.set(b"key".to_vec(), b"value".to_vec()).await.unwrap();
/// let value = backend.get(b"key").await.unwrap();
/// assert_eq!(value, Some(Bytes::from("value")));
/// # });
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Retrieves a value by key.
    ///
    /// Returns `Ok(None)` when the key does not exist.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>>;

    /// Stores a key-value pair, overwriting any existing value.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn set(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()>;

    /// Atomically sets a key's value if it matches the expected current value.
    ///
    /// # Semantics
    ///
    /// - **`expected: None`**: insert-if-absent. Succeeds only when the key does not exist. Fails
    ///   with [`Conflict`](crate::StorageError::Conflict) if any value is present.
    /// - **`expected: Some(value)`**: update-if-unchanged. Succeeds only when the current value is
    ///   a byte-for-byte match of `value`. Fails with [`Conflict`](crate::StorageError::Conflict)
    ///   if the key is absent or holds a different value.
    ///
    /// Among concurrent insert-if-absent calls for the same key, exactly one
    /// succeeds.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn compare_and_set(
        &self,
        key: &[u8],
        expected: Option<&[u8]>,
        new_value: Vec<u8>,
    ) -> StorageResult<()>;

    /// Overwrites the value of an existing key.
    ///
    /// Fails with [`NotFound`](crate::StorageError::NotFound) when the key is
    /// absent; nothing is written in that case.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn set_if_present(&self, key: &[u8], new_value: Vec<u8>) -> StorageResult<()>;

    /// Removes a key and returns the value it held.
    ///
    /// Deleting an absent key is not an error; it returns `Ok(None)`.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn delete(&self, key: &[u8]) -> StorageResult<Option<Bytes>>;

    /// Retrieves every key-value pair in `range`, in ascending key order.
    ///
    /// A range whose start lies after its end yields an empty result.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn get_range<R>(&self, range: R) -> StorageResult<Vec<KeyValue>>
    where
        R: RangeBounds<Vec<u8>> + Send;

    /// Retrieves at most `limit` key-value pairs in `range`, in ascending key
    /// order.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn get_range_limited<R>(&self, range: R, limit: usize) -> StorageResult<Vec<KeyValue>>
    where
        R: RangeBounds<Vec<u8>> + Send;

    /// Performs a health check of the requested probe type.
    ///
    /// Returns an `Err` only when the check itself cannot run; a reachable
    /// but failing backend reports [`HealthStatus::Unhealthy`].
    #[must_use = "health checks may fail and errors must be handled"]
    async fn health_check(&self, probe: HealthProbe) -> StorageResult<HealthStatus>;
}
