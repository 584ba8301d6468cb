//! Stored item encoding.
//!
//! Items are JSON objects with the public entity fields. Under a strategy
//! that [stores key attributes](crate::keys::KeyStrategy::stores_key_attributes)
//! the item also carries `PK` and `SK`; [`project`] drops them again so they
//! never reach callers.

use pointgate_storage::StorageError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::{ApiError, ApiResult},
    keys::{KeyStrategy, PhysicalKey},
    model::DataPoint,
};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredItem {
    #[serde(rename = "PK", default, skip_serializing_if = "Option::is_none")]
    partition_key: Option<String>,
    #[serde(rename = "SK", default, skip_serializing_if = "Option::is_none")]
    sort_key: Option<String>,
    name: String,
    created_at: String,
    value: Value,
}

/// Encodes `point` stored under `key`.
pub(crate) fn encode(
    strategy: &dyn KeyStrategy,
    key: &PhysicalKey,
    point: &DataPoint,
) -> ApiResult<Vec<u8>> {
    let (partition_key, sort_key) = if strategy.stores_key_attributes() {
        (Some(key.partition.clone()), Some(key.sort.clone()))
    } else {
        (None, None)
    };
    let item = StoredItem {
        partition_key,
        sort_key,
        name: point.name.clone(),
        created_at: point.created_at.clone(),
        value: point.value.clone(),
    };
    serde_json::to_vec(&item).map_err(|e| {
        ApiError::StoreFailure(StorageError::serialization_with_source("encode data point", e))
    })
}

/// Public entity of a stored item.
pub(crate) fn project(bytes: &[u8]) -> ApiResult<DataPoint> {
    let item: StoredItem = serde_json::from_slice(bytes).map_err(|e| {
        ApiError::StoreFailure(StorageError::serialization_with_source("decode stored item", e))
    })?;
    Ok(DataPoint { name: item.name, created_at: item.created_at, value: item.value })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::keys::{CompositeStringKey, DirectKey};

    fn point() -> DataPoint {
        DataPoint::new("temp", "2024-01-01T00:00:00Z", json!({"celsius": 21.5}))
    }

    #[test]
    fn composite_items_carry_key_attributes() {
        let strategy = CompositeStringKey::default();
        let key = strategy.derive_key("temp", "2024-01-01T00:00:00Z").unwrap();
        let raw: Value = serde_json::from_slice(&encode(&strategy, &key, &point()).unwrap()).unwrap();
        assert_eq!(raw["PK"], "DataPoint#temp");
        assert_eq!(raw["SK"], "2024-01-01T00:00:00Z");
        assert_eq!(raw["createdAt"], "2024-01-01T00:00:00Z");
    }

    #[test]
    fn direct_items_have_no_key_attributes() {
        let key = DirectKey.derive_key("temp", "2024-01-01T00:00:00Z").unwrap();
        let raw: Value = serde_json::from_slice(&encode(&DirectKey, &key, &point()).unwrap()).unwrap();
        assert!(raw.get("PK").is_none());
        assert!(raw.get("SK").is_none());
    }

    #[test]
    fn projection_drops_key_attributes() {
        let strategy = CompositeStringKey::default();
        let key = strategy.derive_key("temp", "2024-01-01T00:00:00Z").unwrap();
        let bytes = encode(&strategy, &key, &point()).unwrap();
        assert_eq!(project(&bytes).unwrap(), point());
    }

    #[test]
    fn corrupt_item_is_a_store_failure() {
        assert!(matches!(project(b"not json"), Err(ApiError::StoreFailure(_))));
    }
}
