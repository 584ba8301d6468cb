//! Key-value store contract for the pointgate API layer.
//!
//! This crate provides the [`StorageBackend`] trait that the resolver pipeline
//! drives for every data-point operation, plus [`MemoryBackend`], an ordered
//! in-memory implementation used for development and tests.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     pointgate-api                           │
//! │   Resolver pipeline (key derivation, item shaping, events)  │
//! ├─────────────────────────────────────────────────────────────┤
//! │                   pointgate-storage                         │
//! │                 StorageBackend trait                        │
//! │  (get, set, compare_and_set, set_if_present, delete, range) │
//! ├─────────────────────────────────────────────────────────────┤
//! │   MemoryBackend (dev/test)  │  external partitioned store   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The backend knows nothing about data points: keys and values are bytes,
//! ordered lexicographically. Partition/sort key encoding lives in the API
//! crate.
//!
//! # Quick Start
//!
//! ```
//! use pointgate_storage::{MemoryBackend, StorageBackend};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = MemoryBackend::new();
//!
//!     // Insert-if-absent: the second attempt conflicts
//!     backend.compare_and_set(b"point:temp", None, b"21.5".to_vec()).await?;
//!     assert!(backend.compare_and_set(b"point:temp", None, b"22.0".to_vec()).await.is_err());
//!
//!     let value = backend.get(b"point:temp").await?;
//!     assert_eq!(value.map(|b| b.to_vec()), Some(b"21.5".to_vec()));
//!     Ok(())
//! }
//! ```
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` and `conformance` modules with shared test helpers
//!   (key generators, assertion macros, the backend conformance suite).
//! - **`failpoints`**: Activates `fail` injection points inside [`MemoryBackend`] so tests can
//!   simulate an unavailable store.

#![deny(unsafe_code)]

pub mod backend;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, clippy::panic)]
pub mod conformance;
pub mod error;
pub mod health;
pub mod memory;
pub mod size_limits;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;
pub mod types;

// Re-export primary types at crate root for convenience
pub use backend::StorageBackend;
pub use error::{BoxError, ConfigError, StorageError, StorageResult};
pub use health::{HealthMetadata, HealthProbe, HealthStatus};
pub use memory::MemoryBackend;
pub use size_limits::{
    DEFAULT_MAX_KEY_SIZE, DEFAULT_MAX_VALUE_SIZE, SizeLimits, validate_key_size, validate_sizes,
};
pub use types::KeyValue;
