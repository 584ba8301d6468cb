//! User-pool JWT verification.
//!
//! [`JwtVerifier`] is the shipped [`IdentityVerifier`] for `USER_POOL`
//! mode. It holds a fixed set of public keys indexed by `kid` and checks,
//! in order: header algorithm, key lookup, signature with `exp`/`nbf`/`iss`,
//! app client id (`aud` or `client_id`), `token_use`, then extracts the
//! subject and `cognito:groups`.

use std::{collections::HashMap, fmt};

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use ed25519_dalek::{PUBLIC_KEY_LENGTH, VerifyingKey};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde_json::{Map, Value};

use crate::{
    error::{AuthError, ConfigError},
    mode::{SigningKeyConfig, TokenUse, UserPoolConfig},
    principal::Principal,
    validation::validate_algorithm,
    verifier::IdentityVerifier,
};

/// Claim holding group memberships.
pub const GROUPS_CLAIM: &str = "cognito:groups";

struct VerificationKey {
    algorithm: Algorithm,
    key: DecodingKey,
}

/// Verifies bearer tokens issued by one user pool.
pub struct JwtVerifier {
    user_pool_id: String,
    issuer: String,
    client_ids: Vec<String>,
    token_use: Option<TokenUse>,
    leeway_seconds: u64,
    keys: HashMap<String, VerificationKey>,
}

impl fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtVerifier")
            .field("user_pool_id", &self.user_pool_id)
            .field("issuer", &self.issuer)
            .field("client_ids", &self.client_ids)
            .field("token_use", &self.token_use)
            .field("kids", &self.keys.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[bon::bon]
impl JwtVerifier {
    /// Creates a verifier.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if no keys are given, a key id repeats, or a
    /// key cannot be decoded.
    #[builder]
    pub fn new(
        #[builder(into)] user_pool_id: String,
        #[builder(into)] issuer: String,
        #[builder(default)] client_ids: Vec<String>,
        token_use: Option<TokenUse>,
        signing_keys: Vec<SigningKeyConfig>,
        #[builder(default = 60)] leeway_seconds: u64,
    ) -> Result<Self, ConfigError> {
        if signing_keys.is_empty() {
            return Err(ConfigError::NoSigningKeys { pool: user_pool_id });
        }
        let mut keys = HashMap::with_capacity(signing_keys.len());
        for config in &signing_keys {
            let key = to_verification_key(config)?;
            if keys.insert(config.kid().to_owned(), key).is_some() {
                return Err(ConfigError::DuplicateKeyId(config.kid().to_owned()));
            }
        }
        Ok(Self { user_pool_id, issuer, client_ids, token_use, leeway_seconds, keys })
    }

    /// Creates a verifier from provisioning settings.
    ///
    /// # Errors
    ///
    /// As for [`JwtVerifier::builder`].
    pub fn from_config(config: &UserPoolConfig) -> Result<Self, ConfigError> {
        Self::builder()
            .user_pool_id(config.user_pool_id.clone())
            .issuer(config.issuer.clone())
            .client_ids(config.client_ids.clone())
            .maybe_token_use(config.token_use)
            .signing_keys(config.signing_keys.clone())
            .leeway_seconds(config.leeway_seconds)
            .build()
    }

    /// Verifies `token` and returns its principal.
    ///
    /// # Errors
    ///
    /// Returns the first failed check as an [`AuthError`].
    pub fn verify_token(&self, token: &str) -> Result<Principal, AuthError> {
        let header = decode_header(token).map_err(|e| {
            AuthError::invalid_token_format(format!("Failed to decode JWT header: {e}"))
        })?;
        validate_algorithm(&format!("{:?}", header.alg))?;

        let kid = header
            .kid
            .ok_or_else(|| AuthError::invalid_token_format("JWT header missing 'kid' field"))?;
        let entry = self.keys.get(&kid).ok_or_else(|| AuthError::key_not_found(&kid))?;
        if entry.algorithm != header.alg {
            return Err(AuthError::UnsupportedAlgorithm(format!(
                "key '{kid}' is {:?}, token is {:?}",
                entry.algorithm, header.alg
            )));
        }

        let mut validation = Validation::new(entry.algorithm);
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.validate_aud = false;
        validation.leeway = self.leeway_seconds;
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);

        let claims = decode::<Map<String, Value>>(token, &entry.key, &validation)?.claims;

        self.check_client_id(&claims)?;
        self.check_token_use(&claims)?;

        let subject = claims
            .get("sub")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AuthError::missing_claim("sub"))?
            .to_owned();
        let groups = claims
            .get(GROUPS_CLAIM)
            .and_then(Value::as_array)
            .map(|groups| groups.iter().filter_map(Value::as_str).map(str::to_owned).collect())
            .unwrap_or_default();

        tracing::debug!(pool = %self.user_pool_id, kid = %kid, subject = %subject, "token verified");
        Ok(Principal::user(subject, groups, claims))
    }

    fn check_client_id(&self, claims: &Map<String, Value>) -> Result<(), AuthError> {
        if self.client_ids.is_empty() {
            return Ok(());
        }
        let mut presented: Vec<&str> = match claims.get("aud") {
            Some(Value::String(aud)) => vec![aud.as_str()],
            Some(Value::Array(auds)) => auds.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        };
        if let Some(client_id) = claims.get("client_id").and_then(Value::as_str) {
            presented.push(client_id);
        }
        if presented.is_empty() {
            return Err(AuthError::missing_claim("aud"));
        }
        if presented.iter().any(|id| self.client_ids.iter().any(|accepted| accepted == id)) {
            Ok(())
        } else {
            Err(AuthError::InvalidAudience(format!("client {presented:?} not accepted")))
        }
    }

    fn check_token_use(&self, claims: &Map<String, Value>) -> Result<(), AuthError> {
        let Some(expected) = self.token_use else {
            return Ok(());
        };
        let actual = claims
            .get("token_use")
            .and_then(Value::as_str)
            .ok_or_else(|| AuthError::missing_claim("token_use"))?;
        if actual == expected.as_str() {
            Ok(())
        } else {
            Err(AuthError::InvalidTokenUse {
                expected: expected.as_str().to_owned(),
                actual: actual.to_owned(),
            })
        }
    }
}

#[async_trait]
impl IdentityVerifier for JwtVerifier {
    #[tracing::instrument(name = "jwt_verify", skip_all, fields(pool = %self.user_pool_id))]
    async fn verify(&self, token: &str) -> Result<Principal, AuthError> {
        self.verify_token(token)
    }
}

fn to_verification_key(config: &SigningKeyConfig) -> Result<VerificationKey, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidPublicKey {
        kid: config.kid().to_owned(),
        reason,
    };
    match config {
        SigningKeyConfig::EdDsa { x, .. } => {
            let bytes =
                URL_SAFE_NO_PAD.decode(x).map_err(|e| invalid(format!("base64 decode: {e}")))?;
            let bytes: [u8; PUBLIC_KEY_LENGTH] = bytes.as_slice().try_into().map_err(|_| {
                invalid(format!("expected {PUBLIC_KEY_LENGTH} bytes, got {}", bytes.len()))
            })?;
            VerifyingKey::from_bytes(&bytes)
                .map_err(|e| invalid(format!("invalid Ed25519 key: {e}")))?;
            let key =
                DecodingKey::from_ed_components(x).map_err(|err| invalid(err.to_string()))?;
            Ok(VerificationKey { algorithm: Algorithm::EdDSA, key })
        },
        SigningKeyConfig::Rs256 { n, e, .. } => {
            let key =
                DecodingKey::from_rsa_components(n, e).map_err(|err| invalid(err.to_string()))?;
            Ok(VerificationKey { algorithm: Algorithm::RS256, key })
        },
    }
}
