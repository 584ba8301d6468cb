//! Process configuration.
//!
//! A [`GatewayConfig`] document is loaded once at startup and every runtime
//! object is built from it. Validation happens here, so a running gateway
//! never meets a malformed rule, mode or table setting.
//!
//! ```json
//! {
//!   "admission": { "name": "WorkshopAPI-ACL", "defaultAction": { "allow": {} }, "rules": [] },
//!   "authorization": {
//!     "defaultAuthorization": {
//!       "authorizationType": "API_KEY",
//!       "apiKeyConfig": { "name": "dev", "key": "da2-...", "expires": "2024-01-08T00:00:00Z" }
//!     }
//!   },
//!   "table": { "keyStrategy": "COMPOSITE", "deleteMissing": "NO_OP" }
//! }
//! ```

use std::{path::Path, sync::Arc};

use pointgate_admission::{PositionalConstraint, WebAcl, WebAclConfig};
use pointgate_authn::{AuthorizationConfig, AuthorizationResolver, IdentityVerifier};
use pointgate_storage::{DEFAULT_MAX_KEY_SIZE, DEFAULT_MAX_VALUE_SIZE, SizeLimits, StorageBackend};
use serde::{Deserialize, Serialize};

use crate::{
    error::ConfigError,
    gateway::{API_KEY_HEADER, Gateway},
    keys::{CompositeStringKey, DEFAULT_ENTITY_TYPE, DirectKey, KeyStrategy},
    pipeline::ResolverPipeline,
};

/// Default `listDataPoints` page size.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Largest `listDataPoints` page size.
pub const DEFAULT_MAX_PAGE_SIZE: usize = 1000;

/// Physical key layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyStrategyKind {
    /// [`CompositeStringKey`].
    #[default]
    Composite,
    /// [`DirectKey`].
    Direct,
}

/// What `createDataPoint` does when the key exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CreatePolicy {
    /// Fail with `AlreadyExists`.
    #[default]
    RejectDuplicates,
    /// Replace the stored item.
    Overwrite,
}

/// What `deleteDataPoint` does when the key is absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeleteMissing {
    /// Fail with `NotFound`.
    #[default]
    Error,
    /// Succeed with no item.
    NoOp,
}

/// Accepted `createdAt` format on writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimestampFormat {
    /// RFC 3339 date-time.
    #[default]
    #[serde(rename = "RFC3339")]
    Rfc3339,
    /// Any non-empty string; ordering is lexicographic.
    #[serde(rename = "OPAQUE")]
    Opaque,
}

fn default_entity_type() -> String {
    DEFAULT_ENTITY_TYPE.to_owned()
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_max_page_size() -> usize {
    DEFAULT_MAX_PAGE_SIZE
}

fn default_max_item_bytes() -> usize {
    DEFAULT_MAX_VALUE_SIZE
}

/// Data-point table settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TableConfig {
    /// Physical key layout.
    #[serde(default)]
    pub key_strategy: KeyStrategyKind,
    /// Partition prefix of the composite layout.
    #[serde(default = "default_entity_type")]
    pub entity_type: String,
    /// Duplicate handling on create.
    #[serde(default)]
    pub create_policy: CreatePolicy,
    /// Missing-key handling on delete.
    #[serde(default)]
    pub delete_missing: DeleteMissing,
    /// `createdAt` validation on writes.
    #[serde(default)]
    pub timestamp_format: TimestampFormat,
    /// `listDataPoints` page size when the caller gives none.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Upper bound for caller page sizes.
    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,
    /// Largest encoded item.
    #[serde(default = "default_max_item_bytes")]
    pub max_item_bytes: usize,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            key_strategy: KeyStrategyKind::default(),
            entity_type: default_entity_type(),
            create_policy: CreatePolicy::default(),
            delete_missing: DeleteMissing::default(),
            timestamp_format: TimestampFormat::default(),
            page_size: DEFAULT_PAGE_SIZE,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
            max_item_bytes: DEFAULT_MAX_VALUE_SIZE,
        }
    }
}

impl TableConfig {
    /// Builds the configured key strategy.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Table`] for an invalid entity type.
    pub fn key_strategy(&self) -> Result<Arc<dyn KeyStrategy>, ConfigError> {
        Ok(match self.key_strategy {
            KeyStrategyKind::Composite => Arc::new(CompositeStringKey::new(&self.entity_type)?),
            KeyStrategyKind::Direct => Arc::new(DirectKey),
        })
    }

    /// Item size limits.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Table`] if `maxItemBytes` is zero.
    pub fn size_limits(&self) -> Result<SizeLimits, ConfigError> {
        SizeLimits::new(DEFAULT_MAX_KEY_SIZE, self.max_item_bytes)
            .map_err(|e| ConfigError::Table { field: "maxItemBytes", reason: e.to_string() })
    }

    /// Checks page sizes.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Table`] for a zero page size or a default page
    /// size above the maximum.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_page_size == 0 {
            return Err(ConfigError::Table { field: "maxPageSize", reason: "must be at least 1".into() });
        }
        if self.page_size == 0 || self.page_size > self.max_page_size {
            return Err(ConfigError::Table {
                field: "pageSize",
                reason: format!("{} is outside 1..={}", self.page_size, self.max_page_size),
            });
        }
        Ok(())
    }
}

/// The whole process configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GatewayConfig {
    /// Admission policy.
    pub admission: WebAclConfig,
    /// Authorization modes.
    pub authorization: AuthorizationConfig,
    /// Table settings.
    #[serde(default)]
    pub table: TableConfig,
}

impl GatewayConfig {
    /// Parses a configuration document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed JSON or unknown fields.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads and parses a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.display().to_string(), source })?;
        Self::from_json_str(&json)
    }

    /// Validates every section and assembles a gateway over `backend`.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure.
    pub fn build<B: StorageBackend>(&self, backend: B) -> Result<Gateway<B>, ConfigError> {
        let authorizer = AuthorizationResolver::from_config(&self.authorization)?;
        self.assemble(backend, authorizer)
    }

    /// As [`build`](Self::build), delegating `USER_POOL` verification to
    /// `verifier`.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure.
    pub fn build_with_verifier<B: StorageBackend>(
        &self,
        backend: B,
        verifier: Arc<dyn IdentityVerifier>,
    ) -> Result<Gateway<B>, ConfigError> {
        let authorizer = AuthorizationResolver::with_verifier(&self.authorization, verifier)?;
        self.assemble(backend, authorizer)
    }

    fn assemble<B: StorageBackend>(
        &self,
        backend: B,
        authorizer: AuthorizationResolver,
    ) -> Result<Gateway<B>, ConfigError> {
        let acl = WebAcl::from_config(&self.admission)?;
        self.check_api_key_rules()?;
        let pipeline = ResolverPipeline::builder().backend(backend).table(self.table.clone()).build()?;
        Ok(Gateway::builder().acl(acl).authorizer(authorizer).pipeline(pipeline).build())
    }

    /// Every `EXACTLY` match on the API-key header must accept one of the
    /// configured keys.
    fn check_api_key_rules(&self) -> Result<(), ConfigError> {
        let keys: Vec<&str> = self
            .authorization
            .modes()
            .filter_map(|mode| mode.api_key_config.as_ref())
            .map(|config| config.key.as_str())
            .collect();
        if keys.is_empty() {
            return Ok(());
        }
        for (rule, byte_match) in self.admission.header_matches(API_KEY_HEADER) {
            if byte_match.positional_constraint != PositionalConstraint::Exactly {
                continue;
            }
            let mut bound = false;
            for key in &keys {
                if byte_match.matches_value(key)? {
                    bound = true;
                    break;
                }
            }
            if !bound {
                return Err(ConfigError::StaleApiKeyRule { rule: rule.to_owned() });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn table_defaults() {
        let table: TableConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(table, TableConfig::default());
        assert_eq!(table.page_size, 100);
        assert_eq!(table.max_page_size, 1000);
        assert_eq!(table.max_item_bytes, 400 * 1024);
        assert_eq!(table.key_strategy().unwrap().name(), "COMPOSITE");
    }

    #[test]
    fn table_enums_use_provisioning_names() {
        let table: TableConfig = serde_json::from_str(
            r#"{
                "keyStrategy": "DIRECT",
                "createPolicy": "OVERWRITE",
                "deleteMissing": "NO_OP",
                "timestampFormat": "OPAQUE"
            }"#,
        )
        .unwrap();
        assert_eq!(table.key_strategy, KeyStrategyKind::Direct);
        assert_eq!(table.create_policy, CreatePolicy::Overwrite);
        assert_eq!(table.delete_missing, DeleteMissing::NoOp);
        assert_eq!(table.timestamp_format, TimestampFormat::Opaque);
    }

    #[rstest]
    #[case::unknown_field(r#"{"ttl": 5}"#)]
    #[case::unknown_strategy(r#"{"keyStrategy": "HASHED"}"#)]
    fn malformed_table_rejected(#[case] json: &str) {
        assert!(serde_json::from_str::<TableConfig>(json).is_err());
    }

    #[rstest]
    #[case::zero_page(TableConfig { page_size: 0, ..TableConfig::default() }, "pageSize")]
    #[case::page_above_max(TableConfig { page_size: 20, max_page_size: 10, ..TableConfig::default() }, "pageSize")]
    #[case::zero_max(TableConfig { max_page_size: 0, ..TableConfig::default() }, "maxPageSize")]
    fn invalid_page_sizes(#[case] table: TableConfig, #[case] expected: &str) {
        let Err(ConfigError::Table { field, .. }) = table.validate() else {
            panic!("expected table error");
        };
        assert_eq!(field, expected);
    }

    #[test]
    fn zero_item_size_rejected() {
        let table = TableConfig { max_item_bytes: 0, ..TableConfig::default() };
        assert!(matches!(table.size_limits(), Err(ConfigError::Table { field: "maxItemBytes", .. })));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = GatewayConfig::from_path("/nonexistent/gateway.json").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/gateway.json"));
    }
}
