//! Request entry point.
//!
//! Every request passes three gates in order, and a failure at one gate
//! stops it before the next:
//!
//! ```text
//! RequestContext ──► WebAcl::evaluate ──► AuthorizationResolver::authorize ──► ResolverPipeline
//!                    (AdmissionBlocked)    (Unauthenticated / Unauthorized)     (store errors)
//! ```
//!
//! The credential is read from the request headers: `Authorization` selects
//! the user-pool mode, `x-api-key` the API-key mode. Without either header
//! the resolver's default mode applies.

use std::{sync::Arc, time::Instant};

use chrono::{DateTime, Utc};
use pointgate_admission::{RequestContext, WebAcl};
use pointgate_authn::{AuthRequest, AuthorizationResolver, Principal};
use pointgate_storage::{HealthMetadata, HealthStatus, StorageBackend};

use crate::{
    error::{ApiError, ApiResult},
    pipeline::ResolverPipeline,
    resolver::{Operation, OperationOutput},
    subscription::{Channel, Subscription},
};

/// Header carrying a user-pool bearer token.
pub const AUTHORIZATION_HEADER: &str = "authorization";

/// Header carrying the static API key.
pub const API_KEY_HEADER: &str = "x-api-key";

// Counter table fill level, in tenths, at which health turns degraded.
const RATE_TABLE_DEGRADED_TENTHS: usize = 9;

/// Admission, authorization and resolution for one table.
pub struct Gateway<B> {
    acl: Arc<WebAcl>,
    authorizer: Arc<AuthorizationResolver>,
    pipeline: ResolverPipeline<B>,
}

impl<B> std::fmt::Debug for Gateway<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("acl", &self.acl)
            .field("authorizer", &self.authorizer)
            .field("pipeline", &self.pipeline)
            .finish()
    }
}

#[bon::bon]
impl<B: StorageBackend> Gateway<B> {
    /// Assembles a gateway from its layers.
    #[builder]
    pub fn new(
        #[builder(into)] acl: Arc<WebAcl>,
        #[builder(into)] authorizer: Arc<AuthorizationResolver>,
        pipeline: ResolverPipeline<B>,
    ) -> Self {
        Self { acl, authorizer, pipeline }
    }

    /// Handles `operation` arriving with `request`.
    ///
    /// # Errors
    ///
    /// [`ApiError::AdmissionBlocked`], then authorization errors, then the
    /// operation's own errors.
    pub async fn handle(
        &self,
        request: &RequestContext,
        operation: Operation,
    ) -> ApiResult<OperationOutput> {
        self.handle_at(request, operation, Utc::now()).await
    }

    /// As [`handle`](Self::handle), checking credential expiry against `now`.
    ///
    /// # Errors
    ///
    /// See [`handle`](Self::handle).
    #[tracing::instrument(
        name = "gateway",
        skip_all,
        fields(field = operation.field(), source_ip = %request.source_ip())
    )]
    pub async fn handle_at(
        &self,
        request: &RequestContext,
        operation: Operation,
        now: DateTime<Utc>,
    ) -> ApiResult<OperationOutput> {
        self.admit(request)?;
        let principal = self.authenticate(request, operation.field(), now).await?;
        tracing::debug!(mode = %principal.mode(), "dispatching");
        self.pipeline.execute(operation).await
    }

    /// Opens a subscription on `channel` for the caller of `request`.
    ///
    /// # Errors
    ///
    /// As for [`handle`](Self::handle); no store access happens.
    pub async fn subscribe(
        &self,
        request: &RequestContext,
        channel: Channel,
        name: Option<String>,
    ) -> ApiResult<Subscription> {
        self.subscribe_at(request, channel, name, Utc::now()).await
    }

    /// As [`subscribe`](Self::subscribe), checking credential expiry against
    /// `now`.
    ///
    /// # Errors
    ///
    /// See [`subscribe`](Self::subscribe).
    #[tracing::instrument(
        name = "gateway_subscribe",
        skip_all,
        fields(field = channel.field(), source_ip = %request.source_ip())
    )]
    pub async fn subscribe_at(
        &self,
        request: &RequestContext,
        channel: Channel,
        name: Option<String>,
        now: DateTime<Utc>,
    ) -> ApiResult<Subscription> {
        self.admit(request)?;
        self.authenticate(request, channel.field(), now).await?;
        Ok(self.pipeline.hub().subscribe(channel, name))
    }

    fn admit(&self, request: &RequestContext) -> ApiResult<()> {
        let decision = self.acl.evaluate(request);
        if decision.is_blocked() {
            return Err(ApiError::AdmissionBlocked {
                rule: decision.matched_rule().map(str::to_owned),
            });
        }
        Ok(())
    }

    async fn authenticate(
        &self,
        request: &RequestContext,
        field: &str,
        now: DateTime<Utc>,
    ) -> ApiResult<Principal> {
        let auth = auth_request(request, field);
        Ok(self.authorizer.authorize_at(&auth, now).await?)
    }

    /// Gateway status merged with the store's readiness.
    ///
    /// Degraded when the admission counter table is nearly full; unhealthy
    /// when the store is.
    pub async fn health_check(&self) -> HealthStatus {
        let started = Instant::now();
        let (used, capacity) = self.acl.rate_table_usage();
        let metadata = HealthMetadata::new(started.elapsed(), "gateway")
            .with_detail("rate_table_used", used.to_string())
            .with_detail("rate_table_capacity", capacity.to_string());
        let own = if capacity > 0
            && used.saturating_mul(10) >= capacity.saturating_mul(RATE_TABLE_DEGRADED_TENTHS)
        {
            HealthStatus::degraded(metadata, "admission rate table nearly full")
        } else {
            HealthStatus::healthy(metadata)
        };

        let store = match self.pipeline.health_check().await {
            Ok(status) => status,
            Err(err) => {
                HealthStatus::unhealthy(HealthMetadata::new(started.elapsed(), "store"), err.to_string())
            },
        };
        own.merge(store)
    }

    /// Admission policy.
    #[must_use]
    pub fn acl(&self) -> &WebAcl {
        &self.acl
    }

    /// Authorization resolver.
    #[must_use]
    pub fn authorizer(&self) -> &AuthorizationResolver {
        &self.authorizer
    }

    /// Resolver pipeline.
    #[must_use]
    pub fn pipeline(&self) -> &ResolverPipeline<B> {
        &self.pipeline
    }
}

fn auth_request(request: &RequestContext, field: &str) -> AuthRequest {
    let auth = AuthRequest::new(field);
    if let Some(token) = request.header(AUTHORIZATION_HEADER) {
        auth.with_bearer(token)
    } else if let Some(key) = request.header(API_KEY_HEADER) {
        auth.with_api_key(key)
    } else {
        auth
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use pointgate_authn::{AuthModeKind, Credential};

    use super::*;

    fn ctx() -> RequestContext {
        RequestContext::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)))
    }

    #[test]
    fn bearer_header_wins_over_api_key() {
        let request = ctx().with_header("Authorization", "Bearer abc").with_header("x-api-key", "da2-k");
        let auth = auth_request(&request, "getDataPoint");
        assert_eq!(auth.credential().map(Credential::mode), Some(AuthModeKind::UserPool));
    }

    #[test]
    fn api_key_header_selects_api_key_mode() {
        let auth = auth_request(&ctx().with_header("X-Api-Key", "da2-k"), "getDataPoint");
        assert_eq!(auth.credential().map(Credential::mode), Some(AuthModeKind::ApiKey));
        assert_eq!(auth.field(), "getDataPoint");
    }

    #[test]
    fn no_header_leaves_mode_to_default() {
        let auth = auth_request(&ctx(), "listDataPoints");
        assert!(auth.credential().is_none());
        assert!(auth.mode().is_none());
    }
}
