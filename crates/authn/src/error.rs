//! Authorization error types.
//!
//! Every [`AuthError`] classifies as either [`AuthFailure::Unauthenticated`]
//! (no acceptable credential) or [`AuthFailure::Unauthorized`] (a valid
//! credential that may not call the requested field).

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::mode::AuthModeKind;

/// Coarse rejection class surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthFailure {
    /// Credential missing, malformed, invalid or expired.
    Unauthenticated,
    /// Authenticated, but not permitted to call the field.
    Unauthorized,
}

/// Authentication and authorization errors.
///
/// # Non-exhaustive
///
/// New variants may be added in minor releases. Match on
/// [`failure`](Self::failure) when only the class matters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// The request carries no credential for the selected mode.
    #[error("Missing credential for {mode} authorization")]
    MissingCredential {
        /// Mode that governs the request.
        mode: AuthModeKind,
    },

    /// The selected mode is not configured for this deployment.
    #[error("Authorization mode {mode} is not configured")]
    ModeNotConfigured {
        /// Requested mode.
        mode: AuthModeKind,
    },

    /// The presented API key does not match the configured key.
    #[error("Invalid API key")]
    InvalidApiKey,

    /// The configured API key expired before the request arrived.
    #[error("API key {name:?} expired at {expired_at}")]
    ApiKeyExpired {
        /// Key name.
        name: String,
        /// Configured expiry.
        expired_at: DateTime<Utc>,
    },

    /// Malformed JWT, cannot be decoded.
    #[error("Invalid token format: {0}")]
    InvalidTokenFormat(String),

    /// Token has expired.
    #[error("Token expired")]
    TokenExpired,

    /// Token not yet valid (nbf claim in the future).
    #[error("Token not yet valid")]
    TokenNotYetValid,

    /// Signature verification failed.
    #[error("Invalid signature")]
    InvalidSignature,

    /// Issuer does not match the user pool.
    #[error("Invalid issuer: {0}")]
    InvalidIssuer(String),

    /// Neither `aud` nor `client_id` names an accepted app client.
    #[error("Invalid audience: {0}")]
    InvalidAudience(String),

    /// A required claim is missing.
    #[error("Missing claim: {0}")]
    MissingClaim(String),

    /// `token_use` does not match the configured token type.
    #[error("Invalid token use: expected {expected}, got {actual}")]
    InvalidTokenUse {
        /// Configured token type.
        expected: String,
        /// Value found in the token.
        actual: String,
    },

    /// Algorithm not in the accepted list.
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// No signing key with this id is configured.
    #[error("Signing key not found: {kid}")]
    KeyNotFound {
        /// Key ID from the token header.
        kid: String,
    },

    /// The identity collaborator could not complete verification.
    #[error("Identity verification unavailable: {0}")]
    VerifierUnavailable(String),

    /// The principal's mode may not call this field.
    #[error("{mode} authorization may not access field {field:?}")]
    ModeNotPermitted {
        /// Requested field.
        field: String,
        /// Mode the request authenticated under.
        mode: AuthModeKind,
    },

    /// The principal belongs to none of the groups the field requires.
    #[error("Field {field:?} requires membership in one of {required:?}")]
    MissingGroup {
        /// Requested field.
        field: String,
        /// Groups that grant access.
        required: Vec<String>,
    },
}

impl AuthError {
    /// Creates a [`InvalidTokenFormat`](Self::InvalidTokenFormat) error.
    pub fn invalid_token_format(message: impl Into<String>) -> Self {
        Self::InvalidTokenFormat(message.into())
    }

    /// Creates a [`TokenExpired`](Self::TokenExpired) error.
    #[must_use]
    pub fn token_expired() -> Self {
        Self::TokenExpired
    }

    /// Creates a [`InvalidSignature`](Self::InvalidSignature) error.
    #[must_use]
    pub fn invalid_signature() -> Self {
        Self::InvalidSignature
    }

    /// Creates a [`MissingClaim`](Self::MissingClaim) error.
    pub fn missing_claim(claim: impl Into<String>) -> Self {
        Self::MissingClaim(claim.into())
    }

    /// Creates a [`KeyNotFound`](Self::KeyNotFound) error.
    pub fn key_not_found(kid: impl Into<String>) -> Self {
        Self::KeyNotFound { kid: kid.into() }
    }

    /// Creates a [`VerifierUnavailable`](Self::VerifierUnavailable) error.
    pub fn verifier_unavailable(message: impl Into<String>) -> Self {
        Self::VerifierUnavailable(message.into())
    }

    /// Rejection class of this error.
    #[must_use]
    pub fn failure(&self) -> AuthFailure {
        match self {
            Self::ModeNotPermitted { .. } | Self::MissingGroup { .. } => AuthFailure::Unauthorized,
            _ => AuthFailure::Unauthenticated,
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::InvalidToken => Self::invalid_token_format("Invalid JWT structure"),
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            ErrorKind::ExpiredSignature => Self::TokenExpired,
            ErrorKind::ImmatureSignature => Self::TokenNotYetValid,
            ErrorKind::InvalidIssuer => Self::InvalidIssuer("Issuer validation failed".into()),
            ErrorKind::InvalidAlgorithm => {
                Self::UnsupportedAlgorithm("Algorithm does not match signing key".into())
            },
            ErrorKind::MissingRequiredClaim(claim) => Self::missing_claim(claim.clone()),
            _ => Self::invalid_token_format(format!("JWT error: {err}")),
        }
    }
}

/// Configuration errors, reported when authorization settings are loaded.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A mode type is listed more than once.
    #[error("Authorization mode {0} is configured more than once")]
    DuplicateMode(AuthModeKind),

    /// A mode lacks its settings block.
    #[error("Authorization mode {mode} requires {field}")]
    MissingModeSettings {
        /// Mode being configured.
        mode: AuthModeKind,
        /// Missing block, e.g. `apiKeyConfig`.
        field: &'static str,
    },

    /// An API key has empty key material.
    #[error("API key {name:?} has an empty key")]
    EmptyApiKey {
        /// Key name.
        name: String,
    },

    /// A user pool lists no signing keys.
    #[error("User pool {pool:?} has no signing keys")]
    NoSigningKeys {
        /// User pool id.
        pool: String,
    },

    /// A signing key could not be decoded.
    #[error("Invalid public key {kid:?}: {reason}")]
    InvalidPublicKey {
        /// Key ID.
        kid: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Two signing keys share an id.
    #[error("Duplicate signing key id {0:?}")]
    DuplicateKeyId(String),

    /// A field rule allows a mode that is not configured.
    #[error("Field {field:?} allows unconfigured mode {mode}")]
    FieldModeNotConfigured {
        /// Field name.
        field: String,
        /// Unconfigured mode.
        mode: AuthModeKind,
    },

    /// A field has more than one rule.
    #[error("Field {0:?} has more than one authorization rule")]
    DuplicateFieldRule(String),

    /// A field requires groups but does not admit user-pool callers.
    #[error("Field {0:?} requires groups but does not allow USER_POOL")]
    GroupsWithoutUserPool(String),
}

/// Result type alias for authorization operations.
pub type Result<T> = std::result::Result<T, AuthError>;
