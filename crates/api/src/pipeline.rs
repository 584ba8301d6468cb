//! Resolver pipeline.
//!
//! [`ResolverPipeline::execute`] runs one operation end to end:
//!
//! 1. look up the field's [`ResolverSpec`](crate::resolver::ResolverSpec)
//! 2. shape the request into a [`StoreCommand`](crate::source::StoreCommand)
//! 3. run it against the backend
//! 4. shape the response
//! 5. publish to the resolver's channel, only once the write has committed
//!
//! Admission and authorization are not checked here; see
//! [`Gateway`](crate::Gateway).

use pointgate_storage::{HealthProbe, HealthStatus, StorageBackend, StorageError};

use crate::{
    config::TableConfig,
    error::{ApiError, ApiResult, ConfigError},
    keys::KeyStrategy,
    model::{DataPoint, DataPointKey, DataPointPage, DateRange, Pagination},
    resolver::{Operation, OperationOutput, ResolverContext, resolver_for},
    source,
    subscription::{Channel, Subscription, SubscriptionHub},
};

/// Typed operations over one data-point table.
pub struct ResolverPipeline<B> {
    backend: B,
    context: ResolverContext,
    hub: SubscriptionHub,
}

impl<B> std::fmt::Debug for ResolverPipeline<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolverPipeline")
            .field("strategy", &self.context.strategy)
            .field("table", &self.context.table)
            .field("hub", &self.hub)
            .finish_non_exhaustive()
    }
}

#[bon::bon]
impl<B: StorageBackend> ResolverPipeline<B> {
    /// Creates a pipeline over `backend`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Table`] for invalid table settings.
    #[builder]
    pub fn new(
        backend: B,
        #[builder(default)] table: TableConfig,
        #[builder(default)] hub: SubscriptionHub,
    ) -> Result<Self, ConfigError> {
        table.validate()?;
        let context =
            ResolverContext { strategy: table.key_strategy()?, limits: table.size_limits()?, table };
        tracing::info!(
            strategy = context.strategy.name(),
            create_policy = ?context.table.create_policy,
            delete_missing = ?context.table.delete_missing,
            "resolver pipeline ready"
        );
        Ok(Self { backend, context, hub })
    }

    /// Executes `operation`.
    ///
    /// # Errors
    ///
    /// Returns the typed [`ApiError`] of the failing step. Nothing is
    /// published on failure.
    #[tracing::instrument(name = "resolve", skip(self, operation), fields(field = operation.field()))]
    pub async fn execute(&self, operation: Operation) -> ApiResult<OperationOutput> {
        let spec = resolver_for(operation.field()).ok_or_else(|| {
            ApiError::invalid_argument(format!("no resolver for {}", operation.field()))
        })?;
        let command = spec.request(&self.context, &operation)?;
        let kind = command.kind();
        let result = source::execute(&self.backend, &self.context.limits, command).await;
        if let Err(err) = &result {
            if err.is_transient() {
                tracing::warn!(command = kind, error = %err, "store unavailable");
            } else {
                tracing::debug!(command = kind, error = %err, "store command failed");
            }
        }
        let output = spec.response(&self.context, &operation, result)?;

        if let Some(channel) = spec.publishes
            && let OperationOutput::DataPoint(point) = &output
        {
            self.hub.publish(channel, point);
        }
        tracing::debug!(command = kind, "resolved");
        Ok(output)
    }

    /// `createDataPoint`.
    ///
    /// # Errors
    ///
    /// [`ApiError::AlreadyExists`] if the key is taken and duplicates are
    /// rejected.
    pub async fn create_data_point(&self, point: DataPoint) -> ApiResult<DataPoint> {
        let output = self.execute(Operation::CreateDataPoint(point)).await?;
        expect_point(output)
    }

    /// `updateDataPoint`.
    ///
    /// # Errors
    ///
    /// [`ApiError::NotFound`] if the key is absent.
    pub async fn update_data_point(&self, point: DataPoint) -> ApiResult<DataPoint> {
        let output = self.execute(Operation::UpdateDataPoint(point)).await?;
        expect_point(output)
    }

    /// `deleteDataPoint`. `None` only when missing keys are a no-op.
    ///
    /// # Errors
    ///
    /// [`ApiError::NotFound`] if the key is absent and missing keys are an
    /// error.
    pub async fn delete_data_point(&self, key: DataPointKey) -> ApiResult<Option<DataPoint>> {
        Ok(self.execute(Operation::DeleteDataPoint(key)).await?.into_data_point())
    }

    /// `getDataPoint`.
    ///
    /// # Errors
    ///
    /// Store failures and invalid keys.
    pub async fn get_data_point(&self, key: DataPointKey) -> ApiResult<Option<DataPoint>> {
        Ok(self.execute(Operation::GetDataPoint(key)).await?.into_data_point())
    }

    /// `listDataPoints`.
    ///
    /// # Errors
    ///
    /// [`ApiError::InvalidArgument`] for a bad page token or a zero limit.
    pub async fn list_data_points(&self, pagination: Pagination) -> ApiResult<DataPointPage> {
        match self.execute(Operation::ListDataPoints(pagination)).await? {
            OperationOutput::Page(page) => Ok(page),
            other => Err(mismatched_output("listDataPoints", &other)),
        }
    }

    /// `queryDataPointsByNameAndDateTime`, ascending by `createdAt`.
    ///
    /// # Errors
    ///
    /// [`ApiError::InvalidArgument`] if `range.from > range.to`.
    pub async fn query_data_points_by_name_and_date_time(
        &self,
        name: impl Into<String>,
        range: DateRange,
    ) -> ApiResult<Vec<DataPoint>> {
        let operation = Operation::QueryDataPointsByNameAndDateTime { name: name.into(), range };
        match self.execute(operation).await? {
            OperationOutput::DataPoints(points) => Ok(points),
            other => Err(mismatched_output("queryDataPointsByNameAndDateTime", &other)),
        }
    }

    /// `onCreateDataPoint`, optionally for one series.
    #[must_use]
    pub fn on_create_data_point(&self, name: Option<String>) -> Subscription {
        self.hub.subscribe(Channel::OnCreateDataPoint, name)
    }

    /// Backend readiness.
    ///
    /// # Errors
    ///
    /// Returns the mapped store error if the check cannot run.
    pub async fn health_check(&self) -> ApiResult<HealthStatus> {
        Ok(self.backend.health_check(HealthProbe::Readiness).await?)
    }

    /// Configured key strategy.
    #[must_use]
    pub fn key_strategy(&self) -> &dyn KeyStrategy {
        self.context.strategy.as_ref()
    }

    /// Event hub.
    #[must_use]
    pub fn hub(&self) -> &SubscriptionHub {
        &self.hub
    }

    /// Underlying store.
    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }
}

fn expect_point(output: OperationOutput) -> ApiResult<DataPoint> {
    match output {
        OperationOutput::DataPoint(point) => Ok(point),
        other => Err(mismatched_output("mutation", &other)),
    }
}

fn mismatched_output(field: &str, output: &OperationOutput) -> ApiError {
    ApiError::StoreFailure(StorageError::internal(format!(
        "{field} produced unexpected output {output:?}"
    )))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use pointgate_storage::MemoryBackend;
    use serde_json::json;

    use super::*;
    use crate::config::{DeleteMissing, KeyStrategyKind};

    fn pipeline(table: TableConfig) -> ResolverPipeline<MemoryBackend> {
        ResolverPipeline::builder().backend(MemoryBackend::new()).table(table).build().unwrap()
    }

    fn temp(created_at: &str, value: f64) -> DataPoint {
        DataPoint::new("temp", created_at, json!(value))
    }

    #[tokio::test]
    async fn update_targets_existing_items_only() {
        let pipeline = pipeline(TableConfig::default());
        let err = pipeline.update_data_point(temp("2024-01-01T00:00:00Z", 1.0)).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound { .. }));
        assert!(pipeline.backend().is_empty());

        pipeline.create_data_point(temp("2024-01-01T00:00:00Z", 1.0)).await.unwrap();
        pipeline.update_data_point(temp("2024-01-01T00:00:00Z", 2.0)).await.unwrap();
        let stored = pipeline
            .get_data_point(DataPointKey::new("temp", "2024-01-01T00:00:00Z"))
            .await
            .unwrap();
        assert_eq!(stored, Some(temp("2024-01-01T00:00:00Z", 2.0)));
    }

    #[tokio::test]
    async fn delete_returns_removed_item() {
        let pipeline = pipeline(TableConfig::default());
        pipeline.create_data_point(temp("2024-01-01T00:00:00Z", 1.0)).await.unwrap();
        let key = DataPointKey::new("temp", "2024-01-01T00:00:00Z");

        let removed = pipeline.delete_data_point(key.clone()).await.unwrap();
        assert_eq!(removed, Some(temp("2024-01-01T00:00:00Z", 1.0)));
        assert!(matches!(
            pipeline.delete_data_point(key).await.unwrap_err(),
            ApiError::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn delete_missing_no_op() {
        let pipeline =
            pipeline(TableConfig { delete_missing: DeleteMissing::NoOp, ..TableConfig::default() });
        let removed =
            pipeline.delete_data_point(DataPointKey::new("temp", "2024-01-01T00:00:00Z")).await;
        assert_eq!(removed.unwrap(), None);
    }

    #[tokio::test]
    async fn get_missing_is_none() {
        let pipeline = pipeline(TableConfig::default());
        let got = pipeline
            .get_data_point(DataPointKey::new("temp", "2024-01-01T00:00:00Z"))
            .await
            .unwrap();
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn direct_strategy_stores_plain_keys() {
        let pipeline =
            pipeline(TableConfig { key_strategy: KeyStrategyKind::Direct, ..TableConfig::default() });
        pipeline.create_data_point(temp("2024-01-01T00:00:00Z", 1.0)).await.unwrap();
        let stored = pipeline.backend().get(b"temp\x002024-01-01T00:00:00.000000000Z").await.unwrap();
        assert!(stored.is_some());
    }

    #[tokio::test]
    async fn oversized_item_is_invalid_argument() {
        let pipeline = pipeline(TableConfig { max_item_bytes: 64, ..TableConfig::default() });
        let big = DataPoint::new("temp", "2024-01-01T00:00:00Z", json!("x".repeat(100)));
        let err = pipeline.create_data_point(big).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidArgument(_)));
        assert!(pipeline.backend().is_empty());
    }

    #[tokio::test]
    async fn failed_create_publishes_nothing() {
        let pipeline = pipeline(TableConfig::default());
        pipeline.create_data_point(temp("2024-01-01T00:00:00Z", 1.0)).await.unwrap();
        let mut events = pipeline.on_create_data_point(None);

        pipeline.create_data_point(temp("2024-01-01T00:00:00Z", 2.0)).await.unwrap_err();
        assert!(events.try_recv().is_none());
    }

    #[tokio::test]
    async fn health_reports_backend_readiness() {
        let pipeline = pipeline(TableConfig::default());
        let status = pipeline.health_check().await.unwrap();
        assert!(status.is_healthy());
        assert_eq!(status.metadata().details.get("probe").map(String::as_str), Some("readiness"));
    }
}
