//! Entity key derivation.
//!
//! A [`KeyStrategy`] maps the logical `(name, createdAt)` identity onto a
//! [`PhysicalKey`] (partition key plus sort key). Physical keys are stored as
//! `partition 0x00 sort`, so one partition is a contiguous key range ordered
//! by sort key.
//!
//! | Strategy               | Partition key      | Sort key    | Item carries `PK`/`SK` |
//! |------------------------|--------------------|-------------|------------------------|
//! | [`CompositeStringKey`] | `"<type>#<name>"`  | `createdAt` | yes                    |
//! | [`DirectKey`]          | `name`             | `createdAt` | no                     |
//!
//! The strategy is fixed per deployment; switching requires rewriting every
//! stored key.

use std::fmt;

use crate::{
    error::{ApiError, ApiResult, ConfigError},
    model::{DataPointKey, DateRange},
};

/// Entity type prefix used by the composite strategy unless configured.
pub const DEFAULT_ENTITY_TYPE: &str = "DataPoint";

const SEPARATOR: u8 = 0x00;
// Greater than any byte that can start a UTF-8 sequence.
const UPPER_SENTINEL: u8 = 0xFF;

/// Partition and sort key of one stored item.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PhysicalKey {
    /// Partition key (`PK`).
    pub partition: String,
    /// Sort key (`SK`).
    pub sort: String,
}

impl PhysicalKey {
    /// Storage encoding.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.partition.len() + 1 + self.sort.len());
        bytes.extend_from_slice(self.partition.as_bytes());
        bytes.push(SEPARATOR);
        bytes.extend_from_slice(self.sort.as_bytes());
        bytes
    }

    /// Decodes a stored key.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidArgument`] if the bytes are not a valid
    /// encoded key.
    pub fn from_bytes(bytes: &[u8]) -> ApiResult<Self> {
        let split = bytes
            .iter()
            .position(|&b| b == SEPARATOR)
            .ok_or_else(|| ApiError::invalid_argument("stored key has no separator"))?;
        let utf8 = |part: &[u8]| {
            String::from_utf8(part.to_vec())
                .map_err(|_| ApiError::invalid_argument("stored key is not UTF-8"))
        };
        Ok(Self { partition: utf8(&bytes[..split])?, sort: utf8(&bytes[split + 1..])? })
    }
}

fn validate_component(field: &str, value: &str) -> ApiResult<()> {
    if value.is_empty() {
        return Err(ApiError::invalid_argument(format!("{field} must not be empty")));
    }
    if value.as_bytes().contains(&SEPARATOR) {
        return Err(ApiError::invalid_argument(format!("{field} must not contain NUL")));
    }
    Ok(())
}

/// Maps logical identities to physical keys.
pub trait KeyStrategy: Send + Sync + fmt::Debug {
    /// Provisioning name, e.g. `COMPOSITE`.
    fn name(&self) -> &'static str;

    /// Partition key for a series name.
    fn partition_key(&self, name: &str) -> String;

    /// Series name encoded in `partition`, or `None` if the partition does
    /// not belong to this entity type.
    fn name_from_partition<'a>(&self, partition: &'a str) -> Option<&'a str>;

    /// Leading bytes shared by every key of this entity type.
    fn list_prefix(&self) -> Vec<u8>;

    /// Whether stored items carry `PK`/`SK` attributes.
    fn stores_key_attributes(&self) -> bool;

    /// Physical key of `(name, created_at)`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidArgument`] for empty parts or parts
    /// containing NUL.
    fn derive_key(&self, name: &str, created_at: &str) -> ApiResult<PhysicalKey> {
        validate_component("name", name)?;
        validate_component("createdAt", created_at)?;
        Ok(PhysicalKey { partition: self.partition_key(name), sort: created_at.to_owned() })
    }

    /// Logical identity of a physical key.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidArgument`] if the key was not produced by
    /// this strategy.
    fn parse_key(&self, key: &PhysicalKey) -> ApiResult<DataPointKey> {
        let name = self.name_from_partition(&key.partition).ok_or_else(|| {
            ApiError::invalid_argument(format!(
                "partition {:?} does not belong to {} keys",
                key.partition,
                self.name()
            ))
        })?;
        Ok(DataPointKey::new(name, key.sort.clone()))
    }

    /// Inclusive storage bounds of a listing.
    fn list_bounds(&self) -> (Vec<u8>, Vec<u8>) {
        let start = self.list_prefix();
        let mut end = start.clone();
        end.push(UPPER_SENTINEL);
        (start, end)
    }

    /// Inclusive storage bounds of one partition's sort range.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidArgument`] for an invalid name, bounds
    /// containing NUL, or `from > to`.
    fn sort_bounds(&self, name: &str, range: &DateRange) -> ApiResult<(Vec<u8>, Vec<u8>)> {
        validate_component("name", name)?;
        if range.from.as_bytes().contains(&SEPARATOR) || range.to.as_bytes().contains(&SEPARATOR) {
            return Err(ApiError::invalid_argument("range bounds must not contain NUL"));
        }
        if range.from > range.to {
            return Err(ApiError::invalid_argument(format!(
                "range start {:?} is after end {:?}",
                range.from, range.to
            )));
        }
        let partition = self.partition_key(name);
        let start = PhysicalKey { partition: partition.clone(), sort: range.from.clone() }.to_bytes();
        let mut end = PhysicalKey { partition, sort: range.to.clone() }.to_bytes();
        end.push(UPPER_SENTINEL);
        Ok((start, end))
    }
}

/// `PK = "<type>#<name>"`, `SK = createdAt`, for tables shared between
/// entity types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeStringKey {
    entity_type: String,
}

impl CompositeStringKey {
    /// Strategy for `entity_type`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Table`] if the type is empty or contains `#`
    /// or NUL.
    pub fn new(entity_type: impl Into<String>) -> Result<Self, ConfigError> {
        let entity_type = entity_type.into();
        if entity_type.is_empty() || entity_type.contains(['#', '\0']) {
            return Err(ConfigError::Table {
                field: "entityType",
                reason: format!("{entity_type:?} must be non-empty without '#' or NUL"),
            });
        }
        Ok(Self { entity_type })
    }

    /// Entity type prefix.
    #[must_use]
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }
}

impl Default for CompositeStringKey {
    fn default() -> Self {
        Self { entity_type: DEFAULT_ENTITY_TYPE.to_owned() }
    }
}

impl KeyStrategy for CompositeStringKey {
    fn name(&self) -> &'static str {
        "COMPOSITE"
    }

    fn partition_key(&self, name: &str) -> String {
        format!("{}#{name}", self.entity_type)
    }

    fn name_from_partition<'a>(&self, partition: &'a str) -> Option<&'a str> {
        partition.strip_prefix(self.entity_type.as_str())?.strip_prefix('#')
    }

    fn list_prefix(&self) -> Vec<u8> {
        format!("{}#", self.entity_type).into_bytes()
    }

    fn stores_key_attributes(&self) -> bool {
        true
    }
}

/// `PK = name`, `SK = createdAt`; the store holds only data points.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirectKey;

impl KeyStrategy for DirectKey {
    fn name(&self) -> &'static str {
        "DIRECT"
    }

    fn partition_key(&self, name: &str) -> String {
        name.to_owned()
    }

    fn name_from_partition<'a>(&self, partition: &'a str) -> Option<&'a str> {
        Some(partition)
    }

    fn list_prefix(&self) -> Vec<u8> {
        Vec::new()
    }

    fn stores_key_attributes(&self) -> bool {
        false
    }
}
