//! # Pointgate Authn
//!
//! Per-request authorization for the data-point gateway.
//!
//! A deployment configures one default mode and optional additional modes:
//!
//! - **`USER_POOL`**: bearer JWTs verified by an [`IdentityVerifier`]. The
//!   shipped [`JwtVerifier`] accepts only asymmetric algorithms (EdDSA,
//!   RS256) and checks `exp`, `nbf`, issuer, app client and `token_use`.
//! - **`API_KEY`**: a static `x-api-key`, compared in constant time and
//!   rejected once the configured expiry has passed.
//!
//! [`AuthorizationResolver`] picks the mode per request, verifies the
//! credential and applies per-field rules. Failures classify as
//! unauthenticated or unauthorized through [`AuthError::failure`].
//!
//! ## Example
//!
//! ```
//! use chrono::{TimeZone, Utc};
//! use pointgate_authn::{
//!     AuthRequest, AuthorizationResolver,
//!     mode::{ApiKeyConfig, AuthorizationConfig, AuthorizationModeConfig},
//! };
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let anchor = Utc.with_ymd_and_hms(2024, 1, 1, 15, 30, 0).unwrap();
//! let config = AuthorizationConfig {
//!     default_authorization: AuthorizationModeConfig::api_key(
//!         ApiKeyConfig::expiring_days_after("default", "da2-example", anchor, 7),
//!     ),
//!     additional_authorization_modes: vec![],
//!     field_authorization: vec![],
//! };
//! let resolver = AuthorizationResolver::from_config(&config).unwrap();
//!
//! let request = AuthRequest::new("listDataPoints").with_api_key("da2-example");
//! let before = Utc.with_ymd_and_hms(2024, 1, 7, 0, 0, 0).unwrap();
//! let after = Utc.with_ymd_and_hms(2024, 1, 8, 0, 0, 1).unwrap();
//! assert!(resolver.authorize_at(&request, before).await.is_ok());
//! assert!(resolver.authorize_at(&request, after).await.is_err());
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Authorization error types.
pub mod error;
/// JWT user-pool verification.
pub mod jwt;
/// Mode, API-key and field-rule configuration.
pub mod mode;
/// Verified identities.
pub mod principal;
/// Mode selection and field authorization.
pub mod resolver;
/// Shared test utilities.
#[cfg(feature = "testutil")]
pub mod testutil;
/// Algorithm and secret checks.
pub mod validation;
/// Identity verifier contract.
pub mod verifier;

pub use error::{AuthError, AuthFailure, ConfigError, Result};
pub use jwt::JwtVerifier;
pub use mode::{AuthModeKind, AuthorizationConfig};
pub use principal::Principal;
pub use resolver::{AuthRequest, AuthorizationResolver, Credential};
pub use verifier::IdentityVerifier;
