//! Authorization mode configuration.
//!
//! A deployment has one default mode and any number of additional modes,
//! each type appearing at most once. Field rules narrow which modes (and
//! which user-pool groups) may call a given operation field.
//!
//! ```
//! use pointgate_authn::mode::{AuthModeKind, AuthorizationConfig};
//!
//! let config: AuthorizationConfig = serde_json::from_str(r#"{
//!     "defaultAuthorization": {
//!         "authorizationType": "USER_POOL",
//!         "userPoolConfig": {
//!             "userPoolId": "eu-west-1_example",
//!             "issuer": "https://idp.example.com/eu-west-1_example",
//!             "signingKeys": [{ "alg": "EdDSA", "kid": "k1", "x": "11qYAYKxCrfVS_7TyWQHOg7hcvPapiMlrwIaaPcHURo" }]
//!         }
//!     },
//!     "additionalAuthorizationModes": [{
//!         "authorizationType": "API_KEY",
//!         "apiKeyConfig": { "name": "dev", "key": "da2-abc", "expires": "2030-01-08T00:00:00Z" }
//!     }]
//! }"#).unwrap();
//!
//! config.validate().unwrap();
//! assert_eq!(config.default_mode(), AuthModeKind::UserPool);
//! ```

use std::{collections::HashSet, fmt};

use chrono::{DateTime, Days, NaiveTime, Utc};
use rand::{Rng, distributions::Alphanumeric};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::ConfigError;

/// Days an API key stays valid in the reference deployment.
pub const DEFAULT_API_KEY_VALIDITY_DAYS: u32 = 7;

/// Prefix of generated API keys.
pub const API_KEY_PREFIX: &str = "da2-";

const GENERATED_KEY_LEN: usize = 26;

/// Authentication mechanism type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthModeKind {
    /// Bearer JWT issued by an external identity provider.
    UserPool,
    /// Static key sent in the `x-api-key` header.
    ApiKey,
}

impl AuthModeKind {
    /// Provisioning name, e.g. `USER_POOL`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UserPool => "USER_POOL",
            Self::ApiKey => "API_KEY",
        }
    }
}

impl fmt::Display for AuthModeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Algorithm-tagged public key, JWK style.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "alg", deny_unknown_fields)]
pub enum SigningKeyConfig {
    /// Ed25519 key; `x` is the base64url raw 32-byte public key.
    #[serde(rename = "EdDSA")]
    EdDsa {
        /// Key ID matched against the token header.
        kid: String,
        /// Public key.
        x: String,
    },
    /// RSA key given by base64url modulus and exponent.
    #[serde(rename = "RS256")]
    Rs256 {
        /// Key ID matched against the token header.
        kid: String,
        /// Modulus.
        n: String,
        /// Public exponent.
        e: String,
    },
}

impl SigningKeyConfig {
    /// Key ID.
    #[must_use]
    pub fn kid(&self) -> &str {
        match self {
            Self::EdDsa { kid, .. } | Self::Rs256 { kid, .. } => kid,
        }
    }
}

/// Token type a user pool accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenUse {
    /// ID tokens.
    Id,
    /// Access tokens.
    Access,
}

impl TokenUse {
    /// Claim value.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Access => "access",
        }
    }
}

fn default_leeway() -> u64 {
    60
}

/// Settings for `USER_POOL` verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UserPoolConfig {
    /// Pool identifier, used in logs.
    pub user_pool_id: String,
    /// Expected `iss` claim.
    pub issuer: String,
    /// Accepted app client ids; empty accepts any.
    #[serde(default)]
    pub client_ids: Vec<String>,
    /// Required `token_use`, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_use: Option<TokenUse>,
    /// Public keys tokens may be signed with.
    pub signing_keys: Vec<SigningKeyConfig>,
    /// Clock skew tolerance for `exp`/`nbf`, in seconds.
    #[serde(default = "default_leeway")]
    pub leeway_seconds: u64,
}

/// A static API key.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ApiKeyConfig {
    /// Key name, used in logs.
    pub name: String,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Key material.
    pub key: Zeroizing<String>,
    /// The key is rejected once the current time is after this instant.
    pub expires: DateTime<Utc>,
}

impl fmt::Debug for ApiKeyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKeyConfig")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("key", &"<redacted>")
            .field("expires", &self.expires)
            .finish()
    }
}

/// Start of `anchor`'s UTC day plus `days` days.
///
/// Saturates at the latest representable instant.
#[must_use]
pub fn expiry_days_after(anchor: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    anchor
        .date_naive()
        .and_time(NaiveTime::MIN)
        .and_utc()
        .checked_add_days(Days::new(u64::from(days)))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl ApiKeyConfig {
    /// Key that expires `days` days after the start of `anchor`'s UTC day.
    pub fn expiring_days_after(
        name: impl Into<String>,
        key: impl Into<String>,
        anchor: DateTime<Utc>,
        days: u32,
    ) -> Self {
        Self {
            name: name.into(),
            description: None,
            key: Zeroizing::new(key.into()),
            expires: expiry_days_after(anchor, days),
        }
    }

    /// Freshly generated `da2-` key expiring at `expires`.
    pub fn generate(name: impl Into<String>, expires: DateTime<Utc>) -> Self {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(GENERATED_KEY_LEN)
            .map(|b| char::from(b).to_ascii_lowercase())
            .collect();
        Self {
            name: name.into(),
            description: None,
            key: Zeroizing::new(format!("{API_KEY_PREFIX}{suffix}")),
            expires,
        }
    }

    /// Returns `true` once `now` is past the expiry.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires
    }
}

/// One configured mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AuthorizationModeConfig {
    /// Mode type.
    pub authorization_type: AuthModeKind,
    /// Required for `USER_POOL`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_pool_config: Option<UserPoolConfig>,
    /// Required for `API_KEY`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_config: Option<ApiKeyConfig>,
}

impl AuthorizationModeConfig {
    /// `USER_POOL` mode.
    #[must_use]
    pub fn user_pool(config: UserPoolConfig) -> Self {
        Self {
            authorization_type: AuthModeKind::UserPool,
            user_pool_config: Some(config),
            api_key_config: None,
        }
    }

    /// `API_KEY` mode.
    #[must_use]
    pub fn api_key(config: ApiKeyConfig) -> Self {
        Self {
            authorization_type: AuthModeKind::ApiKey,
            user_pool_config: None,
            api_key_config: Some(config),
        }
    }
}

/// Access rule for one operation field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FieldAuthorization {
    /// Operation field, e.g. `createDataPoint`.
    pub field: String,
    /// Modes allowed to call it; empty allows every configured mode.
    #[serde(default)]
    pub allowed_modes: Vec<AuthModeKind>,
    /// User-pool groups, any one of which grants access.
    #[serde(default)]
    pub required_groups: Vec<String>,
}

/// All authorization settings of a deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AuthorizationConfig {
    /// Mode governing requests that do not select another.
    pub default_authorization: AuthorizationModeConfig,
    /// Override modes.
    #[serde(default)]
    pub additional_authorization_modes: Vec<AuthorizationModeConfig>,
    /// Per-field access rules.
    #[serde(default)]
    pub field_authorization: Vec<FieldAuthorization>,
}

impl AuthorizationConfig {
    /// Default mode type.
    #[must_use]
    pub fn default_mode(&self) -> AuthModeKind {
        self.default_authorization.authorization_type
    }

    /// Default mode first, then the additional modes.
    pub fn modes(&self) -> impl Iterator<Item = &AuthorizationModeConfig> {
        std::iter::once(&self.default_authorization).chain(&self.additional_authorization_modes)
    }

    /// Checks structural consistency.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for mode in self.modes() {
            let kind = mode.authorization_type;
            if !seen.insert(kind) {
                return Err(ConfigError::DuplicateMode(kind));
            }
            match kind {
                AuthModeKind::UserPool => {
                    let pool = mode.user_pool_config.as_ref().ok_or(
                        ConfigError::MissingModeSettings { mode: kind, field: "userPoolConfig" },
                    )?;
                    if pool.signing_keys.is_empty() {
                        return Err(ConfigError::NoSigningKeys { pool: pool.user_pool_id.clone() });
                    }
                },
                AuthModeKind::ApiKey => {
                    let key = mode.api_key_config.as_ref().ok_or(
                        ConfigError::MissingModeSettings { mode: kind, field: "apiKeyConfig" },
                    )?;
                    if key.key.is_empty() {
                        return Err(ConfigError::EmptyApiKey { name: key.name.clone() });
                    }
                },
            }
        }

        let mut fields = HashSet::new();
        for rule in &self.field_authorization {
            if !fields.insert(rule.field.as_str()) {
                return Err(ConfigError::DuplicateFieldRule(rule.field.clone()));
            }
            if let Some(&mode) = rule.allowed_modes.iter().find(|m| !seen.contains(*m)) {
                return Err(ConfigError::FieldModeNotConfigured { field: rule.field.clone(), mode });
            }
            let admits_user_pool = if rule.allowed_modes.is_empty() {
                seen.contains(&AuthModeKind::UserPool)
            } else {
                rule.allowed_modes.contains(&AuthModeKind::UserPool)
            };
            if !rule.required_groups.is_empty() && !admits_user_pool {
                return Err(ConfigError::GroupsWithoutUserPool(rule.field.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use chrono::TimeZone;
    use rstest::rstest;

    use super::*;

    fn api_key_mode() -> AuthorizationModeConfig {
        AuthorizationModeConfig::api_key(ApiKeyConfig::expiring_days_after(
            "dev",
            "da2-devkey",
            Utc::now(),
            DEFAULT_API_KEY_VALIDITY_DAYS,
        ))
    }

    #[rstest]
    #[case::midday(Utc.with_ymd_and_hms(2024, 3, 10, 13, 45, 12).unwrap())]
    #[case::midnight(Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap())]
    #[case::last_second(Utc.with_ymd_and_hms(2024, 3, 10, 23, 59, 59).unwrap())]
    fn seven_day_expiry_starts_at_day_boundary(#[case] anchor: DateTime<Utc>) {
        assert_eq!(expiry_days_after(anchor, 7), Utc.with_ymd_and_hms(2024, 3, 17, 0, 0, 0).unwrap());
    }

    #[test]
    fn expiry_saturates() {
        assert_eq!(expiry_days_after(Utc::now(), u32::MAX), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn key_valid_until_the_expiry_instant_inclusive() {
        let key = ApiKeyConfig::expiring_days_after(
            "k",
            "da2-x",
            Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap(),
            7,
        );
        assert!(!key.is_expired_at(key.expires));
        assert!(key.is_expired_at(key.expires + chrono::TimeDelta::seconds(1)));
    }

    #[test]
    fn generated_keys_have_prefix_and_are_unique() {
        let a = ApiKeyConfig::generate("a", Utc::now());
        let b = ApiKeyConfig::generate("b", Utc::now());
        assert!(a.key.starts_with(API_KEY_PREFIX));
        assert_eq!(a.key.len(), API_KEY_PREFIX.len() + GENERATED_KEY_LEN);
        assert!(a.key.chars().all(|c| c == '-' || c.is_ascii_lowercase() || c.is_ascii_digit()));
        assert_ne!(*a.key, *b.key);
    }

    #[test]
    fn debug_redacts_key() {
        let key = ApiKeyConfig::expiring_days_after("k", "da2-topsecret", Utc::now(), 1);
        let debug = format!("{key:?}");
        assert!(!debug.contains("topsecret"), "{debug}");
    }

    #[test]
    fn duplicate_mode_rejected() {
        let config = AuthorizationConfig {
            default_authorization: api_key_mode(),
            additional_authorization_modes: vec![api_key_mode()],
            field_authorization: Vec::new(),
        };
        assert!(matches!(config.validate(), Err(ConfigError::DuplicateMode(AuthModeKind::ApiKey))));
    }

    #[test]
    fn mode_without_settings_rejected() {
        let config = AuthorizationConfig {
            default_authorization: AuthorizationModeConfig {
                authorization_type: AuthModeKind::UserPool,
                user_pool_config: None,
                api_key_config: None,
            },
            additional_authorization_modes: Vec::new(),
            field_authorization: Vec::new(),
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingModeSettings { field: "userPoolConfig", .. })
        ));
    }

    #[test]
    fn field_rules_must_reference_configured_modes() {
        let config = AuthorizationConfig {
            default_authorization: api_key_mode(),
            additional_authorization_modes: Vec::new(),
            field_authorization: vec![FieldAuthorization {
                field: "createDataPoint".into(),
                allowed_modes: vec![AuthModeKind::UserPool],
                required_groups: Vec::new(),
            }],
        };
        assert!(matches!(config.validate(), Err(ConfigError::FieldModeNotConfigured { .. })));
    }

    #[test]
    fn groups_require_user_pool() {
        let config = AuthorizationConfig {
            default_authorization: api_key_mode(),
            additional_authorization_modes: Vec::new(),
            field_authorization: vec![FieldAuthorization {
                field: "deleteDataPoint".into(),
                allowed_modes: Vec::new(),
                required_groups: vec!["admin".into()],
            }],
        };
        assert!(matches!(config.validate(), Err(ConfigError::GroupsWithoutUserPool(_))));
    }

    #[test]
    fn unknown_mode_type_rejected_by_parser() {
        let err = serde_json::from_str::<AuthorizationModeConfig>(
            r#"{"authorizationType":"AWS_IAM"}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("AWS_IAM"), "{err}");
    }
}
