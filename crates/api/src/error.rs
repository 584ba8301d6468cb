//! Public error taxonomy of the gateway.
//!
//! Every operation fails with one [`ApiError`]. Admission and authorization
//! failures happen before any store access. Store failures keep the
//! original [`StorageError`] as their source.

use pointgate_admission::AdmissionError;
use pointgate_authn::{AuthError, AuthFailure};
use pointgate_storage::StorageError;
use thiserror::Error;

/// Operation errors.
///
/// # Non-exhaustive
///
/// New variants may be added in minor releases.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ApiError {
    /// The admission policy blocked the request.
    #[error("Request blocked by admission policy{}", rule_suffix(.rule))]
    AdmissionBlocked {
        /// Deciding rule, `None` for the default action or a fail-closed block.
        rule: Option<String>,
    },

    /// Credential missing, invalid or expired.
    #[error("Unauthenticated: {0}")]
    Unauthenticated(#[source] AuthError),

    /// Credential valid but not permitted for the field.
    #[error("Unauthorized: {0}")]
    Unauthorized(#[source] AuthError),

    /// Update or delete targeted a missing item.
    #[error("Data point not found: {name}@{created_at}")]
    NotFound {
        /// Item name.
        name: String,
        /// Item timestamp.
        created_at: String,
    },

    /// Create collided with an existing item.
    #[error("Data point already exists: {name}@{created_at}")]
    AlreadyExists {
        /// Item name.
        name: String,
        /// Item timestamp.
        created_at: String,
    },

    /// Malformed key, timestamp, range, page token or oversized item.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Transient store failure; safe to retry with backoff.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[source] StorageError),

    /// Any other store failure, surfaced verbatim.
    #[error("Store failure: {0}")]
    StoreFailure(#[source] StorageError),
}

fn rule_suffix(rule: &Option<String>) -> String {
    rule.as_deref().map(|r| format!(" (rule {r})")).unwrap_or_default()
}

impl ApiError {
    /// Creates an [`InvalidArgument`](Self::InvalidArgument) error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Returns `true` only for [`StoreUnavailable`](Self::StoreUnavailable).
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }

    /// Stable error type name for transport responses.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::AdmissionBlocked { .. } => "AdmissionBlocked",
            Self::Unauthenticated(_) => "Unauthenticated",
            Self::Unauthorized(_) => "Unauthorized",
            Self::NotFound { .. } => "NotFound",
            Self::AlreadyExists { .. } => "AlreadyExists",
            Self::InvalidArgument(_) => "InvalidArgument",
            Self::StoreUnavailable(_) => "StoreUnavailable",
            Self::StoreFailure(_) => "StoreFailure",
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err.failure() {
            AuthFailure::Unauthenticated => Self::Unauthenticated(err),
            AuthFailure::Unauthorized => Self::Unauthorized(err),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Connection { .. } | StorageError::Timeout => Self::StoreUnavailable(err),
            StorageError::SizeLimitExceeded { .. } => Self::InvalidArgument(err.to_string()),
            other => Self::StoreFailure(other),
        }
    }
}

/// Result type alias for gateway operations.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Errors loading gateway configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// File path.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Malformed JSON, unknown fields or unknown enum values.
    #[error("invalid gateway configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// Invalid admission policy.
    #[error(transparent)]
    Admission(#[from] AdmissionError),

    /// Invalid authorization settings.
    #[error(transparent)]
    Authorization(#[from] pointgate_authn::ConfigError),

    /// An admission rule pins an `x-api-key` value that no configured API
    /// key has.
    #[error("admission rule {rule:?} matches an x-api-key value other than the configured API key")]
    StaleApiKeyRule {
        /// Offending rule.
        rule: String,
    },

    /// Invalid table settings.
    #[error("table setting {field}: {reason}")]
    Table {
        /// Offending setting.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}
