//! Typed data-point operations behind admission and authorization.
//!
//! This crate wires the layers of a request together:
//!
//! - [`keys`]: logical `(name, createdAt)` identity to physical partition and
//!   sort keys ([`CompositeStringKey`], [`DirectKey`])
//! - [`resolver`]: one [`ResolverSpec`] per operation field, shaping requests
//!   into store commands and store answers into entities
//! - [`pipeline`]: executes operations against a
//!   [`StorageBackend`](pointgate_storage::StorageBackend) and publishes
//!   committed creates
//! - [`subscription`]: best-effort `onCreateDataPoint` fan-out
//! - [`gateway`]: admission, then authorization, then the pipeline
//! - [`config`]: the process configuration document
//!
//! # Quick Start
//!
//! ```
//! use pointgate_api::{DataPoint, DataPointKey, ResolverPipeline};
//! use pointgate_storage::MemoryBackend;
//! use serde_json::json;
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let pipeline = ResolverPipeline::builder().backend(MemoryBackend::new()).build()?;
//!
//! let point = DataPoint::new("temp", "2024-01-01T00:00:00Z", json!(21.5));
//! pipeline.create_data_point(point.clone()).await?;
//!
//! let fetched = pipeline.get_data_point(DataPointKey::new("temp", "2024-01-01T00:00:00Z")).await?;
//! assert_eq!(fetched, Some(point));
//! # Ok::<_, Box<dyn std::error::Error>>(())
//! # }).unwrap();
//! ```
//!
//! # Feature Flags
//!
//! - **`failpoints`**: forwards to `pointgate-storage/failpoints` so tests can
//!   make the in-memory store fail.

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod gateway;
mod item;
pub mod keys;
pub mod model;
pub mod pipeline;
pub mod resolver;
pub mod source;
pub mod subscription;

pub use config::{
    CreatePolicy, DeleteMissing, GatewayConfig, KeyStrategyKind, TableConfig, TimestampFormat,
};
pub use error::{ApiError, ApiResult, ConfigError};
pub use gateway::Gateway;
pub use keys::{CompositeStringKey, DirectKey, KeyStrategy, PhysicalKey};
pub use model::{DataPoint, DataPointKey, DataPointPage, DateRange, Pagination};
pub use pipeline::ResolverPipeline;
pub use resolver::{Operation, OperationOutput, OperationType, ResolverSpec};
pub use source::{StoreCommand, StoreOutcome};
pub use subscription::{Channel, Subscription, SubscriptionHub};
