//! Common types used across storage operations.

use bytes::Bytes;

/// Key-value pair returned from range queries.
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use pointgate_storage::KeyValue;
///
/// let kv = KeyValue::new(Bytes::from("DataPoint#temp\x002024-01-01T00:00:00Z"), Bytes::from("{}"));
/// assert_eq!(kv.value, Bytes::from("{}"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    /// The key identifying this entry.
    pub key: Bytes,

    /// The value stored at this key.
    pub value: Bytes,
}

impl KeyValue {
    /// Creates a new key-value pair.
    pub fn new(key: Bytes, value: Bytes) -> Self {
        Self { key, value }
    }
}
