//! Authorization mode resolution.
//!
//! [`AuthorizationResolver::authorize`] decides which mode governs a request,
//! verifies the credential under that mode and applies the field rule of the
//! requested operation. The mode is the one the request names explicitly, else
//! the one implied by its credential, else the deployment default.

use std::{collections::HashMap, fmt, sync::Arc};

use chrono::{DateTime, Utc};
use zeroize::Zeroizing;

use crate::{
    error::{AuthError, ConfigError, Result},
    jwt::JwtVerifier,
    mode::{ApiKeyConfig, AuthModeKind, AuthorizationConfig, FieldAuthorization},
    principal::Principal,
    validation::secrets_match,
    verifier::IdentityVerifier,
};

/// A credential carried by a request.
#[derive(Clone)]
pub enum Credential {
    /// Value of the `x-api-key` header.
    ApiKey(Zeroizing<String>),
    /// Bearer token from the `Authorization` header.
    Bearer(String),
}

impl Credential {
    /// Mode this credential belongs to.
    #[must_use]
    pub fn mode(&self) -> AuthModeKind {
        match self {
            Self::ApiKey(_) => AuthModeKind::ApiKey,
            Self::Bearer(_) => AuthModeKind::UserPool,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ApiKey(_) => f.write_str("ApiKey(<redacted>)"),
            Self::Bearer(_) => f.write_str("Bearer(<redacted>)"),
        }
    }
}

/// What the resolver needs to know about one inbound operation.
#[derive(Debug, Clone)]
pub struct AuthRequest {
    field: String,
    mode: Option<AuthModeKind>,
    credential: Option<Credential>,
}

impl AuthRequest {
    /// Request for the operation `field`, without a credential.
    pub fn new(field: impl Into<String>) -> Self {
        Self { field: field.into(), mode: None, credential: None }
    }

    /// Attaches an API key.
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.credential = Some(Credential::ApiKey(Zeroizing::new(key.into())));
        self
    }

    /// Attaches a bearer token. A leading `Bearer ` scheme is stripped.
    #[must_use]
    pub fn with_bearer(mut self, token: impl AsRef<str>) -> Self {
        let token = token.as_ref().trim();
        let token = match token.get(..7) {
            Some(scheme) if scheme.eq_ignore_ascii_case("bearer ") => token[7..].trim_start(),
            _ => token,
        };
        self.credential = Some(Credential::Bearer(token.to_owned()));
        self
    }

    /// Selects a mode explicitly.
    #[must_use]
    pub fn with_mode(mut self, mode: AuthModeKind) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Operation field.
    #[must_use]
    pub fn field(&self) -> &str {
        &self.field
    }

    /// Explicitly selected mode.
    #[must_use]
    pub fn mode(&self) -> Option<AuthModeKind> {
        self.mode
    }

    /// Attached credential.
    #[must_use]
    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }
}

/// Stateless per-request authorization.
pub struct AuthorizationResolver {
    default_mode: AuthModeKind,
    api_key: Option<ApiKeyConfig>,
    user_pool: Option<Arc<dyn IdentityVerifier>>,
    field_rules: HashMap<String, FieldAuthorization>,
}

impl fmt::Debug for AuthorizationResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizationResolver")
            .field("default_mode", &self.default_mode)
            .field("api_key", &self.api_key)
            .field("user_pool", &self.user_pool.is_some())
            .field("field_rules", &self.field_rules.len())
            .finish()
    }
}

impl AuthorizationResolver {
    /// Builds a resolver, verifying `USER_POOL` tokens with a
    /// [`JwtVerifier`] constructed from the pool settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the settings are inconsistent or a signing
    /// key is invalid.
    pub fn from_config(config: &AuthorizationConfig) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let verifier = config
            .modes()
            .find_map(|mode| mode.user_pool_config.as_ref())
            .map(JwtVerifier::from_config)
            .transpose()?
            .map(|verifier| Arc::new(verifier) as Arc<dyn IdentityVerifier>);
        Ok(Self::assemble(config, verifier))
    }

    /// Builds a resolver that delegates `USER_POOL` verification to
    /// `verifier`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the settings are inconsistent.
    pub fn with_verifier(
        config: &AuthorizationConfig,
        verifier: Arc<dyn IdentityVerifier>,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let configured = config.modes().any(|m| m.authorization_type == AuthModeKind::UserPool);
        Ok(Self::assemble(config, configured.then_some(verifier)))
    }

    fn assemble(config: &AuthorizationConfig, user_pool: Option<Arc<dyn IdentityVerifier>>) -> Self {
        Self {
            default_mode: config.default_mode(),
            api_key: config.modes().find_map(|mode| mode.api_key_config.clone()),
            user_pool,
            field_rules: config
                .field_authorization
                .iter()
                .map(|rule| (rule.field.clone(), rule.clone()))
                .collect(),
        }
    }

    /// Default mode.
    #[must_use]
    pub fn default_mode(&self) -> AuthModeKind {
        self.default_mode
    }

    /// Expiry of the configured API key, if any.
    #[must_use]
    pub fn api_key_expiry(&self) -> Option<DateTime<Utc>> {
        self.api_key.as_ref().map(|key| key.expires)
    }

    /// Authorizes `request` at the current time.
    ///
    /// # Errors
    ///
    /// See [`authorize_at`](Self::authorize_at).
    pub async fn authorize(&self, request: &AuthRequest) -> Result<Principal> {
        self.authorize_at(request, Utc::now()).await
    }

    /// Authorizes `request` as if it arrived at `now`.
    ///
    /// # Errors
    ///
    /// Unauthenticated errors for a missing, wrong or expired credential or an
    /// unconfigured mode; unauthorized errors when the field rule excludes the
    /// principal.
    #[tracing::instrument(name = "authorize", skip_all, fields(field = %request.field))]
    pub async fn authorize_at(&self, request: &AuthRequest, now: DateTime<Utc>) -> Result<Principal> {
        let mode = request
            .mode
            .or_else(|| request.credential.as_ref().map(Credential::mode))
            .unwrap_or(self.default_mode);

        let outcome = match self.authenticate(mode, request.credential.as_ref(), now).await {
            Ok(principal) => self.check_field(&request.field, &principal).map(|()| principal),
            Err(err) => Err(err),
        };
        match &outcome {
            Ok(principal) => tracing::debug!(
                mode = %mode,
                subject = principal.subject().unwrap_or("-"),
                "request authorized"
            ),
            Err(err) => tracing::warn!(mode = %mode, failure = ?err.failure(), error = %err, "request rejected"),
        }
        outcome
    }

    async fn authenticate(
        &self,
        mode: AuthModeKind,
        credential: Option<&Credential>,
        now: DateTime<Utc>,
    ) -> Result<Principal> {
        match mode {
            AuthModeKind::ApiKey => {
                let config = self.api_key.as_ref().ok_or(AuthError::ModeNotConfigured { mode })?;
                let Some(Credential::ApiKey(presented)) = credential else {
                    return Err(AuthError::MissingCredential { mode });
                };
                if !secrets_match(presented.as_bytes(), config.key.as_bytes()) {
                    return Err(AuthError::InvalidApiKey);
                }
                if config.is_expired_at(now) {
                    return Err(AuthError::ApiKeyExpired {
                        name: config.name.clone(),
                        expired_at: config.expires,
                    });
                }
                Ok(Principal::api_key())
            },
            AuthModeKind::UserPool => {
                let verifier =
                    self.user_pool.as_ref().ok_or(AuthError::ModeNotConfigured { mode })?;
                let Some(Credential::Bearer(token)) = credential else {
                    return Err(AuthError::MissingCredential { mode });
                };
                verifier.verify(token).await
            },
        }
    }

    fn check_field(&self, field: &str, principal: &Principal) -> Result<()> {
        let Some(rule) = self.field_rules.get(field) else {
            return Ok(());
        };
        if !rule.allowed_modes.is_empty() && !rule.allowed_modes.contains(&principal.mode()) {
            return Err(AuthError::ModeNotPermitted { field: field.to_owned(), mode: principal.mode() });
        }
        if !rule.required_groups.is_empty() && !principal.in_any_group(&rule.required_groups) {
            return Err(AuthError::MissingGroup {
                field: field.to_owned(),
                required: rule.required_groups.clone(),
            });
        }
        Ok(())
    }
}
