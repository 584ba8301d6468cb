//! In-memory storage backend implementation.
//!
//! This module provides [`MemoryBackend`], an in-memory implementation of
//! [`StorageBackend`] suitable for testing and development.
//!
//! # Features
//!
//! - **Thread-safe**: Uses [`parking_lot::RwLock`] for concurrent access
//! - **Ordered storage**: Keys are stored in a [`BTreeMap`] for efficient range queries
//! - **Optional size limits**: Writes can be checked against [`SizeLimits`]
//!
//! # Example
//!
//! ```
//! use pointgate_storage::{MemoryBackend, StorageBackend};
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = MemoryBackend::new();
//!
//!     backend.set(b"greeting".to_vec(), b"hello".to_vec()).await.unwrap();
//!     let value = backend.get(b"greeting").await.unwrap();
//!
//!     assert_eq!(value.unwrap().as_ref(), b"hello");
//! }
//! ```
//!
//! # Performance Characteristics
//!
//! | Operation | Complexity |
//! |-----------|------------|
//! | get | O(log n) |
//! | set / compare_and_set / set_if_present | O(log n) |
//! | delete | O(log n) |
//! | get_range | O(log n + k) where k is result size |
//!
//! # Limitations
//!
//! - Data is not persisted; all data is lost when the process exits
//! - No replication or distributed features

use std::{
    collections::BTreeMap,
    ops::{Bound, RangeBounds},
    sync::Arc,
    time::Instant,
};

use async_trait::async_trait;
use bytes::Bytes;
use fail::fail_point;
use parking_lot::RwLock;

use crate::{
    backend::StorageBackend,
    error::{StorageError, StorageResult},
    health::{HealthMetadata, HealthProbe, HealthStatus},
    size_limits::{SizeLimits, validate_sizes},
    types::KeyValue,
};

/// In-memory storage backend using [`BTreeMap`].
///
/// # Cloning
///
/// `MemoryBackend` is cheaply cloneable via [`Arc`]. All clones share the
/// same underlying data store.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    data: Arc<RwLock<BTreeMap<Vec<u8>, Bytes>>>,
    size_limits: Option<SizeLimits>,
}

impl MemoryBackend {
    /// Creates a new, empty in-memory storage backend with no size limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend that rejects writes exceeding `limits`.
    ///
    /// # Example
    ///
    /// ```
    /// use pointgate_storage::{MemoryBackend, SizeLimits};
    ///
    /// let backend = MemoryBackend::with_size_limits(SizeLimits::new(64, 1024).unwrap());
    /// assert!(backend.is_empty());
    /// ```
    pub fn with_size_limits(limits: SizeLimits) -> Self {
        Self { data: Arc::default(), size_limits: Some(limits) }
    }

    /// Returns the number of keys currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns `true` if no keys are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    fn check_sizes(&self, key: &[u8], value: &[u8]) -> StorageResult<()> {
        match &self.size_limits {
            Some(limits) => validate_sizes(key, value, limits),
            None => Ok(()),
        }
    }

    fn scan<R>(&self, range: R, limit: Option<usize>) -> Vec<KeyValue>
    where
        R: RangeBounds<Vec<u8>>,
    {
        let start = as_slice_bound(range.start_bound());
        let end = as_slice_bound(range.end_bound());

        // BTreeMap::range panics on inverted bounds
        if is_empty_range(start, end) {
            return Vec::new();
        }

        let data = self.data.read();
        let iter = data
            .range::<[u8], _>((start, end))
            .map(|(k, v)| KeyValue::new(Bytes::copy_from_slice(k), v.clone()));
        match limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        }
    }
}

fn as_slice_bound(bound: Bound<&Vec<u8>>) -> Bound<&[u8]> {
    match bound {
        Bound::Included(b) => Bound::Included(b.as_slice()),
        Bound::Excluded(b) => Bound::Excluded(b.as_slice()),
        Bound::Unbounded => Bound::Unbounded,
    }
}

fn is_empty_range(start: Bound<&[u8]>, end: Bound<&[u8]>) -> bool {
    match (start, end) {
        (Bound::Excluded(s), Bound::Excluded(e)) => s >= e,
        (Bound::Included(s) | Bound::Excluded(s), Bound::Included(e) | Bound::Excluded(e)) => {
            s > e
        },
        _ => false,
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    #[tracing::instrument(skip(self, key), fields(key_len = key.len()))]
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        fail_point!("memory-get", |_| Err(StorageError::connection("injected read failure")));

        let data = self.data.read();
        Ok(data.get(key).cloned())
    }

    #[tracing::instrument(skip(self, key, value), fields(key_len = key.len(), value_len = value.len()))]
    async fn set(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()> {
        fail_point!("memory-write", |_| Err(StorageError::connection("injected write failure")));
        self.check_sizes(&key, &value)?;

        let mut data = self.data.write();
        data.insert(key, Bytes::from(value));
        Ok(())
    }

    #[tracing::instrument(skip(self, key, expected, new_value), fields(key_len = key.len(), insert = expected.is_none()))]
    async fn compare_and_set(
        &self,
        key: &[u8],
        expected: Option<&[u8]>,
        new_value: Vec<u8>,
    ) -> StorageResult<()> {
        fail_point!("memory-write", |_| Err(StorageError::connection("injected write failure")));
        self.check_sizes(key, &new_value)?;

        let mut data = self.data.write();
        let matches = match (expected, data.get(key)) {
            (None, None) => true,
            (Some(exp), Some(cur)) => exp == &cur[..],
            _ => false,
        };

        if !matches {
            tracing::debug!("compare_and_set precondition failed");
            return Err(StorageError::Conflict);
        }

        data.insert(key.to_vec(), Bytes::from(new_value));
        Ok(())
    }

    #[tracing::instrument(skip(self, key, new_value), fields(key_len = key.len()))]
    async fn set_if_present(&self, key: &[u8], new_value: Vec<u8>) -> StorageResult<()> {
        fail_point!("memory-write", |_| Err(StorageError::connection("injected write failure")));
        self.check_sizes(key, &new_value)?;

        let mut data = self.data.write();
        match data.get_mut(key) {
            Some(slot) => {
                *slot = Bytes::from(new_value);
                Ok(())
            },
            None => Err(StorageError::not_found_bytes(key)),
        }
    }

    #[tracing::instrument(skip(self, key), fields(key_len = key.len()))]
    async fn delete(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        fail_point!("memory-write", |_| Err(StorageError::connection("injected write failure")));

        let mut data = self.data.write();
        Ok(data.remove(key))
    }

    #[tracing::instrument(skip(self, range))]
    async fn get_range<R>(&self, range: R) -> StorageResult<Vec<KeyValue>>
    where
        R: RangeBounds<Vec<u8>> + Send,
    {
        fail_point!("memory-get", |_| Err(StorageError::connection("injected read failure")));
        Ok(self.scan(range, None))
    }

    #[tracing::instrument(skip(self, range))]
    async fn get_range_limited<R>(&self, range: R, limit: usize) -> StorageResult<Vec<KeyValue>>
    where
        R: RangeBounds<Vec<u8>> + Send,
    {
        fail_point!("memory-get", |_| Err(StorageError::connection("injected read failure")));
        Ok(self.scan(range, Some(limit)))
    }

    #[tracing::instrument(skip(self))]
    async fn health_check(&self, probe: HealthProbe) -> StorageResult<HealthStatus> {
        fail_point!("health-check", |_| Err(StorageError::connection("injected health failure")));

        let started = Instant::now();
        let entry_count = self.data.read().len();
        let metadata = HealthMetadata::new(started.elapsed(), "memory")
            .with_detail("entry_count", entry_count.to_string())
            .with_detail("probe", probe.to_string());
        Ok(HealthStatus::healthy(metadata))
    }
}
