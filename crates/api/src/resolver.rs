//! Resolver table.
//!
//! Each store-backed field has one [`ResolverSpec`]: a request shape that
//! turns the typed [`Operation`] into a [`StoreCommand`] and a response shape
//! that turns the store's answer into an [`OperationOutput`] or a typed
//! [`ApiError`].
//!
//! | Field                              | Type     | Command            |
//! |------------------------------------|----------|--------------------|
//! | `createDataPoint`                  | mutation | `PutNew` / `Put`   |
//! | `updateDataPoint`                  | mutation | `Replace`          |
//! | `deleteDataPoint`                  | mutation | `Delete`           |
//! | `getDataPoint`                     | query    | `Get`              |
//! | `listDataPoints`                   | query    | `Scan`             |
//! | `queryDataPointsByNameAndDateTime` | query    | `Query`            |

use std::{fmt, ops::Bound, sync::Arc};

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Datelike, FixedOffset, SecondsFormat, Utc};
use pointgate_storage::{KeyValue, SizeLimits, StorageError, StorageResult};

use crate::{
    config::{CreatePolicy, DeleteMissing, TableConfig, TimestampFormat},
    error::{ApiError, ApiResult},
    item,
    keys::{KeyStrategy, PhysicalKey},
    model::{DataPoint, DataPointKey, DataPointPage, DateRange, Pagination},
    source::{StoreCommand, StoreOutcome},
    subscription::Channel,
};

/// Schema root type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationType {
    /// Read.
    Query,
    /// Write.
    Mutation,
    /// Event stream.
    Subscription,
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Query => "Query",
            Self::Mutation => "Mutation",
            Self::Subscription => "Subscription",
        })
    }
}

/// A typed store-backed operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// `createDataPoint(input)`.
    CreateDataPoint(DataPoint),
    /// `updateDataPoint(input)`.
    UpdateDataPoint(DataPoint),
    /// `deleteDataPoint(key)`.
    DeleteDataPoint(DataPointKey),
    /// `getDataPoint(key)`.
    GetDataPoint(DataPointKey),
    /// `listDataPoints(pagination)`.
    ListDataPoints(Pagination),
    /// `queryDataPointsByNameAndDateTime(name, range)`.
    QueryDataPointsByNameAndDateTime {
        /// Series name.
        name: String,
        /// Inclusive `createdAt` bounds.
        range: DateRange,
    },
}

impl Operation {
    /// Schema field name.
    #[must_use]
    pub fn field(&self) -> &'static str {
        match self {
            Self::CreateDataPoint(_) => "createDataPoint",
            Self::UpdateDataPoint(_) => "updateDataPoint",
            Self::DeleteDataPoint(_) => "deleteDataPoint",
            Self::GetDataPoint(_) => "getDataPoint",
            Self::ListDataPoints(_) => "listDataPoints",
            Self::QueryDataPointsByNameAndDateTime { .. } => "queryDataPointsByNameAndDateTime",
        }
    }
}

/// Result of an [`Operation`].
#[derive(Debug, Clone, PartialEq)]
pub enum OperationOutput {
    /// Created or updated entity.
    DataPoint(DataPoint),
    /// Fetched or deleted entity, `None` if absent.
    MaybeDataPoint(Option<DataPoint>),
    /// One listing page.
    Page(DataPointPage),
    /// Range query result in ascending `createdAt` order.
    DataPoints(Vec<DataPoint>),
}

impl OperationOutput {
    /// The entity of a create, update, get or delete.
    #[must_use]
    pub fn into_data_point(self) -> Option<DataPoint> {
        match self {
            Self::DataPoint(point) => Some(point),
            Self::MaybeDataPoint(point) => point,
            Self::Page(_) | Self::DataPoints(_) => None,
        }
    }
}

/// Settings every resolver shares.
pub(crate) struct ResolverContext {
    pub(crate) strategy: Arc<dyn KeyStrategy>,
    pub(crate) table: TableConfig,
    pub(crate) limits: SizeLimits,
}

impl ResolverContext {
    /// Physical key of `(name, created_at)`.
    ///
    /// Under `RFC3339` the sort key is the instant in UTC with nanosecond
    /// precision, so every spelling of one instant maps to one key and byte
    /// order is chronological.
    fn physical_key(&self, name: &str, created_at: &str) -> ApiResult<PhysicalKey> {
        match self.table.timestamp_format {
            TimestampFormat::Opaque => self.strategy.derive_key(name, created_at),
            TimestampFormat::Rfc3339 => {
                let instant = DateTime::parse_from_rfc3339(created_at).map_err(|e| {
                    ApiError::invalid_argument(format!("createdAt {created_at:?} is not RFC 3339: {e}"))
                })?;
                self.strategy.derive_key(name, &canonical_timestamp(instant)?)
            },
        }
    }

    /// Range with full timestamps rewritten to sort-key form. Partial
    /// bounds such as `2024-01-31` are kept and match as prefixes.
    fn sort_range(&self, range: &DateRange) -> ApiResult<DateRange> {
        let bound = |raw: &str| match self.table.timestamp_format {
            TimestampFormat::Rfc3339 => match DateTime::parse_from_rfc3339(raw) {
                Ok(instant) => canonical_timestamp(instant),
                Err(_) => Ok(raw.to_owned()),
            },
            TimestampFormat::Opaque => Ok(raw.to_owned()),
        };
        Ok(DateRange::new(bound(&range.from)?, bound(&range.to)?))
    }

    fn page_limit(&self, requested: Option<usize>) -> ApiResult<usize> {
        match requested.unwrap_or(self.table.page_size) {
            0 => Err(ApiError::invalid_argument("limit must be at least 1")),
            limit => Ok(limit.min(self.table.max_page_size)),
        }
    }

    fn encode_item(&self, point: &DataPoint) -> ApiResult<(Vec<u8>, Vec<u8>)> {
        let key = self.physical_key(&point.name, &point.created_at)?;
        let item = item::encode(self.strategy.as_ref(), &key, point)?;
        Ok((key.to_bytes(), item))
    }

    fn decode_page_token(&self, token: &str) -> ApiResult<Vec<u8>> {
        let key = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| ApiError::invalid_argument("malformed nextToken"))?;
        let (start, end) = self.strategy.list_bounds();
        if key < start || key > end {
            return Err(ApiError::invalid_argument("nextToken does not belong to this table"));
        }
        Ok(key)
    }
}

fn canonical_timestamp(instant: DateTime<FixedOffset>) -> ApiResult<String> {
    let utc = instant.with_timezone(&Utc);
    // Four-digit years keep the encoding fixed width.
    if !(0..=9999).contains(&utc.year()) {
        return Err(ApiError::invalid_argument(format!(
            "createdAt {instant} is outside years 0000-9999 in UTC"
        )));
    }
    Ok(utc.to_rfc3339_opts(SecondsFormat::Nanos, true))
}

type RequestShape = fn(&ResolverContext, &Operation) -> ApiResult<StoreCommand>;
type ResponseShape =
    fn(&ResolverContext, &Operation, StorageResult<StoreOutcome>) -> ApiResult<OperationOutput>;

/// Resolver of one `(operation type, field)` pair.
pub struct ResolverSpec {
    /// Schema root type.
    pub operation_type: OperationType,
    /// Schema field name.
    pub field: &'static str,
    /// Channel notified after a successful commit.
    pub publishes: Option<Channel>,
    request: RequestShape,
    response: ResponseShape,
}

impl fmt::Debug for ResolverSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolverSpec")
            .field("operation_type", &self.operation_type)
            .field("field", &self.field)
            .field("publishes", &self.publishes)
            .finish_non_exhaustive()
    }
}

impl ResolverSpec {
    pub(crate) fn request(&self, ctx: &ResolverContext, op: &Operation) -> ApiResult<StoreCommand> {
        (self.request)(ctx, op)
    }

    pub(crate) fn response(
        &self,
        ctx: &ResolverContext,
        op: &Operation,
        result: StorageResult<StoreOutcome>,
    ) -> ApiResult<OperationOutput> {
        (self.response)(ctx, op, result)
    }
}

static RESOLVERS: [ResolverSpec; 6] = [
    ResolverSpec {
        operation_type: OperationType::Mutation,
        field: "createDataPoint",
        publishes: Some(Channel::OnCreateDataPoint),
        request: create_request,
        response: create_response,
    },
    ResolverSpec {
        operation_type: OperationType::Mutation,
        field: "updateDataPoint",
        publishes: None,
        request: update_request,
        response: update_response,
    },
    ResolverSpec {
        operation_type: OperationType::Mutation,
        field: "deleteDataPoint",
        publishes: None,
        request: delete_request,
        response: delete_response,
    },
    ResolverSpec {
        operation_type: OperationType::Query,
        field: "getDataPoint",
        publishes: None,
        request: get_request,
        response: get_response,
    },
    ResolverSpec {
        operation_type: OperationType::Query,
        field: "listDataPoints",
        publishes: None,
        request: list_request,
        response: list_response,
    },
    ResolverSpec {
        operation_type: OperationType::Query,
        field: "queryDataPointsByNameAndDateTime",
        publishes: None,
        request: query_request,
        response: query_response,
    },
];

/// Every store-backed resolver.
#[must_use]
pub fn resolvers() -> &'static [ResolverSpec] {
    &RESOLVERS
}

/// Resolver of `field`, if one exists.
#[must_use]
pub fn resolver_for(field: &str) -> Option<&'static ResolverSpec> {
    RESOLVERS.iter().find(|spec| spec.field == field)
}

fn mismatched(op: &Operation) -> ApiError {
    ApiError::invalid_argument(format!("{} was routed to the wrong resolver", op.field()))
}

fn unexpected(op: &Operation, outcome: &StoreOutcome) -> ApiError {
    ApiError::StoreFailure(StorageError::internal(format!(
        "{} received unexpected store outcome {outcome:?}",
        op.field()
    )))
}

fn project_all(items: &[KeyValue]) -> ApiResult<Vec<DataPoint>> {
    items.iter().map(|kv| item::project(&kv.value)).collect()
}

fn create_request(ctx: &ResolverContext, op: &Operation) -> ApiResult<StoreCommand> {
    let Operation::CreateDataPoint(point) = op else {
        return Err(mismatched(op));
    };
    let (key, item) = ctx.encode_item(point)?;
    Ok(match ctx.table.create_policy {
        CreatePolicy::RejectDuplicates => StoreCommand::PutNew { key, item },
        CreatePolicy::Overwrite => StoreCommand::Put { key, item },
    })
}

fn create_response(
    _ctx: &ResolverContext,
    op: &Operation,
    result: StorageResult<StoreOutcome>,
) -> ApiResult<OperationOutput> {
    let Operation::CreateDataPoint(point) = op else {
        return Err(mismatched(op));
    };
    match result {
        Ok(StoreOutcome::Written) => Ok(OperationOutput::DataPoint(point.clone())),
        Ok(other) => Err(unexpected(op, &other)),
        Err(StorageError::Conflict) => Err(ApiError::AlreadyExists {
            name: point.name.clone(),
            created_at: point.created_at.clone(),
        }),
        Err(e) => Err(e.into()),
    }
}

fn update_request(ctx: &ResolverContext, op: &Operation) -> ApiResult<StoreCommand> {
    let Operation::UpdateDataPoint(point) = op else {
        return Err(mismatched(op));
    };
    let (key, item) = ctx.encode_item(point)?;
    Ok(StoreCommand::Replace { key, item })
}

fn update_response(
    _ctx: &ResolverContext,
    op: &Operation,
    result: StorageResult<StoreOutcome>,
) -> ApiResult<OperationOutput> {
    let Operation::UpdateDataPoint(point) = op else {
        return Err(mismatched(op));
    };
    match result {
        Ok(StoreOutcome::Written) => Ok(OperationOutput::DataPoint(point.clone())),
        Ok(other) => Err(unexpected(op, &other)),
        Err(StorageError::NotFound { .. }) => Err(ApiError::NotFound {
            name: point.name.clone(),
            created_at: point.created_at.clone(),
        }),
        Err(e) => Err(e.into()),
    }
}

fn delete_request(ctx: &ResolverContext, op: &Operation) -> ApiResult<StoreCommand> {
    let Operation::DeleteDataPoint(key) = op else {
        return Err(mismatched(op));
    };
    let key = ctx.physical_key(&key.name, &key.created_at)?;
    Ok(StoreCommand::Delete { key: key.to_bytes() })
}

fn delete_response(
    ctx: &ResolverContext,
    op: &Operation,
    result: StorageResult<StoreOutcome>,
) -> ApiResult<OperationOutput> {
    let Operation::DeleteDataPoint(key) = op else {
        return Err(mismatched(op));
    };
    match result? {
        StoreOutcome::Removed(Some(bytes)) => {
            Ok(OperationOutput::MaybeDataPoint(Some(item::project(&bytes)?)))
        },
        StoreOutcome::Removed(None) => match ctx.table.delete_missing {
            DeleteMissing::Error => Err(ApiError::NotFound {
                name: key.name.clone(),
                created_at: key.created_at.clone(),
            }),
            DeleteMissing::NoOp => Ok(OperationOutput::MaybeDataPoint(None)),
        },
        other => Err(unexpected(op, &other)),
    }
}

fn get_request(ctx: &ResolverContext, op: &Operation) -> ApiResult<StoreCommand> {
    let Operation::GetDataPoint(key) = op else {
        return Err(mismatched(op));
    };
    let key = ctx.physical_key(&key.name, &key.created_at)?;
    Ok(StoreCommand::Get { key: key.to_bytes() })
}

fn get_response(
    _ctx: &ResolverContext,
    op: &Operation,
    result: StorageResult<StoreOutcome>,
) -> ApiResult<OperationOutput> {
    match result? {
        StoreOutcome::Item(bytes) => Ok(OperationOutput::MaybeDataPoint(
            bytes.map(|b| item::project(&b)).transpose()?,
        )),
        other => Err(unexpected(op, &other)),
    }
}

fn list_request(ctx: &ResolverContext, op: &Operation) -> ApiResult<StoreCommand> {
    let Operation::ListDataPoints(pagination) = op else {
        return Err(mismatched(op));
    };
    let limit = ctx.page_limit(pagination.limit)?;
    let (first, end) = ctx.strategy.list_bounds();
    let start = match &pagination.next_token {
        Some(token) => Bound::Excluded(ctx.decode_page_token(token)?),
        None => Bound::Included(first),
    };
    // One extra item tells whether another page exists.
    Ok(StoreCommand::Scan { start, end, limit: limit.saturating_add(1) })
}

fn list_response(
    ctx: &ResolverContext,
    op: &Operation,
    result: StorageResult<StoreOutcome>,
) -> ApiResult<OperationOutput> {
    let Operation::ListDataPoints(pagination) = op else {
        return Err(mismatched(op));
    };
    let mut entries = match result? {
        StoreOutcome::Items(entries) => entries,
        other => return Err(unexpected(op, &other)),
    };
    let limit = ctx.page_limit(pagination.limit)?;
    let next_token = if entries.len() > limit {
        entries.truncate(limit);
        entries.last().map(|kv| URL_SAFE_NO_PAD.encode(&kv.key))
    } else {
        None
    };
    Ok(OperationOutput::Page(DataPointPage { items: project_all(&entries)?, next_token }))
}

fn query_request(ctx: &ResolverContext, op: &Operation) -> ApiResult<StoreCommand> {
    let Operation::QueryDataPointsByNameAndDateTime { name, range } = op else {
        return Err(mismatched(op));
    };
    let (start, end) = ctx.strategy.sort_bounds(name, &ctx.sort_range(range)?)?;
    Ok(StoreCommand::Query { start, end })
}

fn query_response(
    _ctx: &ResolverContext,
    op: &Operation,
    result: StorageResult<StoreOutcome>,
) -> ApiResult<OperationOutput> {
    match result? {
        StoreOutcome::Items(entries) => Ok(OperationOutput::DataPoints(project_all(&entries)?)),
        other => Err(unexpected(op, &other)),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use bytes::Bytes;
    use serde_json::json;

    use super::*;
    use crate::keys::CompositeStringKey;

    fn ctx(table: TableConfig) -> ResolverContext {
        ResolverContext {
            strategy: Arc::new(CompositeStringKey::default()),
            limits: SizeLimits::default(),
            table,
        }
    }

    fn create(created_at: &str) -> Operation {
        Operation::CreateDataPoint(DataPoint::new("temp", created_at, json!(21.5)))
    }

    #[test]
    fn every_field_has_one_resolver() {
        let fields: Vec<_> = resolvers().iter().map(|spec| spec.field).collect();
        let mut unique = fields.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), fields.len());
        assert_eq!(resolver_for("createDataPoint").unwrap().publishes, Some(Channel::OnCreateDataPoint));
        assert!(resolver_for("onCreateDataPoint").is_none());
    }

    #[test]
    fn create_policy_selects_conditional_write() {
        let spec = resolver_for("createDataPoint").unwrap();
        let strict = ctx(TableConfig::default());
        assert!(matches!(
            spec.request(&strict, &create("2024-01-01T00:00:00Z")).unwrap(),
            StoreCommand::PutNew { .. }
        ));

        let lenient = ctx(TableConfig { create_policy: CreatePolicy::Overwrite, ..TableConfig::default() });
        assert!(matches!(
            spec.request(&lenient, &create("2024-01-01T00:00:00Z")).unwrap(),
            StoreCommand::Put { .. }
        ));
    }

    #[test]
    fn timestamp_format_is_enforced_unless_opaque() {
        let spec = resolver_for("createDataPoint").unwrap();
        let err = spec.request(&ctx(TableConfig::default()), &create("yesterday")).unwrap_err();
        assert!(matches!(err, ApiError::InvalidArgument(_)));

        let opaque = ctx(TableConfig { timestamp_format: TimestampFormat::Opaque, ..TableConfig::default() });
        assert!(spec.request(&opaque, &create("yesterday")).is_ok());
    }

    #[rstest::rstest]
    #[case::utc("2024-01-01T00:00:00Z", "2024-01-01T00:00:00.000000000Z")]
    #[case::fraction("2024-01-01T00:00:00.5Z", "2024-01-01T00:00:00.500000000Z")]
    #[case::offset("2024-01-01T05:00:00+02:00", "2024-01-01T03:00:00.000000000Z")]
    #[case::crosses_midnight("2023-12-31T23:30:00-01:00", "2024-01-01T00:30:00.000000000Z")]
    fn sort_key_is_fixed_width_utc(#[case] created_at: &str, #[case] sort: &str) {
        let key = ctx(TableConfig::default()).physical_key("temp", created_at).unwrap();
        assert_eq!(key.sort, sort);
    }

    #[test]
    fn opaque_sort_key_is_verbatim() {
        let opaque = ctx(TableConfig { timestamp_format: TimestampFormat::Opaque, ..TableConfig::default() });
        assert_eq!(opaque.physical_key("temp", "2024-01-01T05:00:00+02:00").unwrap().sort, "2024-01-01T05:00:00+02:00");
    }

    #[test]
    fn instants_outside_four_digit_years_rejected() {
        let err = ctx(TableConfig::default()).physical_key("temp", "0000-01-01T00:00:00+01:00").unwrap_err();
        assert!(matches!(err, ApiError::InvalidArgument(_)));
    }

    #[test]
    fn lookups_validate_created_at() {
        let spec = resolver_for("getDataPoint").unwrap();
        let op = Operation::GetDataPoint(DataPointKey::new("temp", "2024"));
        let err = spec.request(&ctx(TableConfig::default()), &op).unwrap_err();
        assert!(matches!(err, ApiError::InvalidArgument(_)));
    }

    #[test]
    fn partial_range_bounds_stay_prefixes() {
        let range = ctx(TableConfig::default())
            .sort_range(&DateRange::new("2024-01-01", "2024-01-01T05:00:00+02:00"))
            .unwrap();
        assert_eq!(range, DateRange::new("2024-01-01", "2024-01-01T03:00:00.000000000Z"));
    }

    #[test]
    fn conflict_becomes_already_exists() {
        let spec = resolver_for("createDataPoint").unwrap();
        let op = create("2024-01-01T00:00:00Z");
        let err = spec.response(&ctx(TableConfig::default()), &op, Err(StorageError::Conflict)).unwrap_err();
        assert!(matches!(err, ApiError::AlreadyExists { ref name, .. } if name == "temp"));
    }

    #[test]
    fn delete_missing_follows_policy() {
        let spec = resolver_for("deleteDataPoint").unwrap();
        let op = Operation::DeleteDataPoint(DataPointKey::new("temp", "2024"));

        let strict = ctx(TableConfig::default());
        let err = spec.response(&strict, &op, Ok(StoreOutcome::Removed(None))).unwrap_err();
        assert!(matches!(err, ApiError::NotFound { .. }));

        let lenient = ctx(TableConfig { delete_missing: DeleteMissing::NoOp, ..TableConfig::default() });
        let out = spec.response(&lenient, &op, Ok(StoreOutcome::Removed(None))).unwrap();
        assert_eq!(out, OperationOutput::MaybeDataPoint(None));
    }

    #[test]
    fn page_size_defaults_and_clamps() {
        let spec = resolver_for("listDataPoints").unwrap();
        let table = TableConfig { page_size: 10, max_page_size: 50, ..TableConfig::default() };
        let ctx = ctx(table);

        let StoreCommand::Scan { limit, .. } =
            spec.request(&ctx, &Operation::ListDataPoints(Pagination::default())).unwrap()
        else {
            panic!("expected scan");
        };
        assert_eq!(limit, 11);

        let StoreCommand::Scan { limit, .. } =
            spec.request(&ctx, &Operation::ListDataPoints(Pagination::first(500))).unwrap()
        else {
            panic!("expected scan");
        };
        assert_eq!(limit, 51);

        let err = spec.request(&ctx, &Operation::ListDataPoints(Pagination::first(0))).unwrap_err();
        assert!(matches!(err, ApiError::InvalidArgument(_)));
    }

    #[rstest::rstest]
    #[case::not_base64("!!!")]
    #[case::foreign_key("U2Vuc29yI3RlbXA")]
    fn bad_page_token_rejected(#[case] token: &str) {
        let spec = resolver_for("listDataPoints").unwrap();
        let op = Operation::ListDataPoints(Pagination::after(10, token));
        let err = spec.request(&ctx(TableConfig::default()), &op).unwrap_err();
        assert!(matches!(err, ApiError::InvalidArgument(_)));
    }

    #[test]
    fn corrupt_item_surfaces_as_store_failure() {
        let spec = resolver_for("getDataPoint").unwrap();
        let op = Operation::GetDataPoint(DataPointKey::new("temp", "2024"));
        let err = spec
            .response(&ctx(TableConfig::default()), &op, Ok(StoreOutcome::Item(Some(Bytes::from("{")))))
            .unwrap_err();
        assert!(matches!(err, ApiError::StoreFailure(_)));
    }
}
