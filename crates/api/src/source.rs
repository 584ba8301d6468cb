//! Store commands and their execution against a [`StorageBackend`].
//!
//! Request shaping produces a [`StoreCommand`]; [`execute`] turns it into
//! exactly one backend call and hands back a [`StoreOutcome`] for response
//! shaping. Writes are size-checked against the table's item limit first.

use std::ops::Bound;

use bytes::Bytes;
use pointgate_storage::{KeyValue, SizeLimits, StorageBackend, StorageResult, validate_sizes};

/// One backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCommand {
    /// Point read.
    Get {
        /// Encoded key.
        key: Vec<u8>,
    },
    /// Insert-if-absent.
    PutNew {
        /// Encoded key.
        key: Vec<u8>,
        /// Encoded item.
        item: Vec<u8>,
    },
    /// Unconditional write.
    Put {
        /// Encoded key.
        key: Vec<u8>,
        /// Encoded item.
        item: Vec<u8>,
    },
    /// Overwrite of an existing key.
    Replace {
        /// Encoded key.
        key: Vec<u8>,
        /// Encoded item.
        item: Vec<u8>,
    },
    /// Removal.
    Delete {
        /// Encoded key.
        key: Vec<u8>,
    },
    /// Bounded scan in key order.
    Scan {
        /// Lower bound; excluded when resuming after a page token.
        start: Bound<Vec<u8>>,
        /// Inclusive upper bound.
        end: Vec<u8>,
        /// Maximum items returned.
        limit: usize,
    },
    /// Inclusive key range read.
    Query {
        /// Inclusive lower bound.
        start: Vec<u8>,
        /// Inclusive upper bound.
        end: Vec<u8>,
    },
}

impl StoreCommand {
    /// Short command name for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Get { .. } => "get",
            Self::PutNew { .. } => "put_new",
            Self::Put { .. } => "put",
            Self::Replace { .. } => "replace",
            Self::Delete { .. } => "delete",
            Self::Scan { .. } => "scan",
            Self::Query { .. } => "query",
        }
    }
}

/// Raw result of a [`StoreCommand`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOutcome {
    /// Value read by `Get`.
    Item(Option<Bytes>),
    /// A write committed.
    Written,
    /// Value removed by `Delete`, `None` if the key was absent.
    Removed(Option<Bytes>),
    /// Entries returned by `Scan` or `Query`, in key order.
    Items(Vec<KeyValue>),
}

/// Runs `command` against `backend`.
///
/// # Errors
///
/// Returns the backend's error unchanged, or
/// [`StorageError::SizeLimitExceeded`](pointgate_storage::StorageError::SizeLimitExceeded)
/// for oversized writes.
pub async fn execute<B>(
    backend: &B,
    limits: &SizeLimits,
    command: StoreCommand,
) -> StorageResult<StoreOutcome>
where
    B: StorageBackend,
{
    match command {
        StoreCommand::Get { key } => backend.get(&key).await.map(StoreOutcome::Item),
        StoreCommand::PutNew { key, item } => {
            validate_sizes(&key, &item, limits)?;
            backend.compare_and_set(&key, None, item).await?;
            Ok(StoreOutcome::Written)
        },
        StoreCommand::Put { key, item } => {
            validate_sizes(&key, &item, limits)?;
            backend.set(key, item).await?;
            Ok(StoreOutcome::Written)
        },
        StoreCommand::Replace { key, item } => {
            validate_sizes(&key, &item, limits)?;
            backend.set_if_present(&key, item).await?;
            Ok(StoreOutcome::Written)
        },
        StoreCommand::Delete { key } => backend.delete(&key).await.map(StoreOutcome::Removed),
        StoreCommand::Scan { start, end, limit } => backend
            .get_range_limited((start, Bound::Included(end)), limit)
            .await
            .map(StoreOutcome::Items),
        StoreCommand::Query { start, end } => {
            backend.get_range(start..=end).await.map(StoreOutcome::Items)
        },
    }
}
