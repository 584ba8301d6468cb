//! Shared test utilities for authorization testing.
//!
//! Feature-gated behind `testutil`. Provides Ed25519 key pairs, a
//! [`TestUserPool`] that signs tokens its own [`UserPoolConfig`] accepts,
//! raw JWT crafting for attack tests, a [`StaticVerifier`] and the
//! [`assert_auth_error!`](crate::assert_auth_error) macro.
//!
//! ```toml
//! [dev-dependencies]
//! pointgate-authn = { path = "../authn", features = ["testutil"] }
//! ```

use std::collections::HashMap;

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use ed25519_dalek::SigningKey;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rand_core::OsRng;
use serde_json::{Value, json};
use zeroize::Zeroizing;

use crate::{
    error::AuthError,
    mode::{SigningKeyConfig, TokenUse, UserPoolConfig},
    principal::Principal,
    verifier::IdentityVerifier,
};

/// Issuer used by [`TestUserPool`].
pub const TEST_ISSUER: &str = "https://idp.test/pool-1";

/// App client id used by [`TestUserPool`].
pub const TEST_CLIENT_ID: &str = "test-client";

/// Generates an Ed25519 key pair.
///
/// Returns `(pkcs8_der, public_key_base64url)`. The private key is wrapped
/// in [`Zeroizing`].
pub fn generate_test_keypair() -> (Zeroizing<Vec<u8>>, String) {
    let signing_key = SigningKey::generate(&mut OsRng);
    let public_key_b64 = URL_SAFE_NO_PAD.encode(signing_key.verifying_key().to_bytes());

    let private_bytes: Zeroizing<[u8; 32]> = Zeroizing::new(signing_key.to_bytes());
    let mut pkcs8_der = Zeroizing::new(vec![
        0x30, 0x2e, // SEQUENCE, 46 bytes
        0x02, 0x01, 0x00, // INTEGER version 0
        0x30, 0x05, // SEQUENCE, 5 bytes (algorithm identifier)
        0x06, 0x03, 0x2b, 0x65, 0x70, // OID 1.3.101.112 (Ed25519)
        0x04, 0x22, // OCTET STRING, 34 bytes
        0x04, 0x20, // OCTET STRING, 32 bytes (the actual key)
    ]);
    pkcs8_der.extend_from_slice(&*private_bytes);

    (pkcs8_der, public_key_b64)
}

/// A user pool with one fresh signing key.
pub struct TestUserPool {
    kid: String,
    pkcs8_der: Zeroizing<Vec<u8>>,
    public_key: String,
}

impl TestUserPool {
    /// Pool whose key has id `kid`.
    pub fn new(kid: impl Into<String>) -> Self {
        let (pkcs8_der, public_key) = generate_test_keypair();
        Self { kid: kid.into(), pkcs8_der, public_key }
    }

    /// Signing key id.
    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Public half of the signing key.
    #[must_use]
    pub fn signing_key_config(&self) -> SigningKeyConfig {
        SigningKeyConfig::EdDsa { kid: self.kid.clone(), x: self.public_key.clone() }
    }

    /// Settings accepting ID tokens for [`TEST_CLIENT_ID`], no leeway.
    #[must_use]
    pub fn config(&self) -> UserPoolConfig {
        UserPoolConfig {
            user_pool_id: "pool-1".into(),
            issuer: TEST_ISSUER.into(),
            client_ids: vec![TEST_CLIENT_ID.into()],
            token_use: Some(TokenUse::Id),
            signing_keys: vec![self.signing_key_config()],
            leeway_seconds: 0,
        }
    }

    /// Claims of a valid one-hour ID token for `subject`.
    #[must_use]
    pub fn claims(&self, subject: &str, groups: &[&str]) -> Value {
        let now = Utc::now().timestamp();
        json!({
            "iss": TEST_ISSUER,
            "sub": subject,
            "aud": TEST_CLIENT_ID,
            "token_use": "id",
            "iat": now,
            "exp": now + 3600,
            "cognito:groups": groups,
            "cognito:username": subject,
        })
    }

    /// Signs arbitrary `claims` with this pool's key.
    ///
    /// # Panics
    ///
    /// Panics if encoding fails.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn sign(&self, claims: &Value) -> String {
        let mut header = Header::new(Algorithm::EdDSA);
        header.kid = Some(self.kid.clone());
        let key = EncodingKey::from_ed_der(&self.pkcs8_der);
        jsonwebtoken::encode(&header, claims, &key).expect("Failed to encode test JWT")
    }

    /// Valid token for `subject` in `groups`.
    #[must_use]
    pub fn token(&self, subject: &str, groups: &[&str]) -> String {
        self.sign(&self.claims(subject, groups))
    }
}

/// Builds `{header}.{payload}.` with an empty signature.
///
/// # Panics
///
/// Panics if JSON serialization fails.
#[must_use]
#[allow(clippy::expect_used)]
pub fn craft_raw_jwt(header_json: &Value, payload_json: &Value) -> String {
    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(header_json).expect("header json"));
    let payload_b64 =
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload_json).expect("payload json"));
    format!("{header_b64}.{payload_b64}.")
}

/// Verifier backed by a fixed token table.
#[derive(Debug, Default, Clone)]
pub struct StaticVerifier {
    principals: HashMap<String, Principal>,
    unavailable: bool,
}

impl StaticVerifier {
    /// Empty verifier; every token is rejected.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts `token` as `subject` in `groups`.
    #[must_use]
    pub fn with_user(mut self, token: &str, subject: &str, groups: &[&str]) -> Self {
        let groups = groups.iter().map(|g| (*g).to_owned()).collect();
        self.principals
            .insert(token.to_owned(), Principal::user(subject, groups, serde_json::Map::new()));
        self
    }

    /// Fails every verification as if the identity provider were down.
    #[must_use]
    pub fn unavailable() -> Self {
        Self { principals: HashMap::new(), unavailable: true }
    }
}

#[async_trait]
impl IdentityVerifier for StaticVerifier {
    async fn verify(&self, token: &str) -> Result<Principal, AuthError> {
        if self.unavailable {
            return Err(AuthError::verifier_unavailable("identity provider unreachable"));
        }
        self.principals.get(token).cloned().ok_or_else(AuthError::invalid_signature)
    }
}

/// Asserts that a `Result<T, AuthError>` is an `Err` of the given variant.
///
/// ```no_run
/// use pointgate_authn::{assert_auth_error, error::AuthError};
///
/// let result: Result<(), AuthError> = Err(AuthError::token_expired());
/// assert_auth_error!(result, TokenExpired);
/// ```
#[macro_export]
macro_rules! assert_auth_error {
    ($result:expr, $variant:ident) => {
        assert!(
            matches!($result, Err($crate::error::AuthError::$variant { .. })),
            "expected AuthError::{}, got: {:?}",
            stringify!($variant),
            $result,
        );
    };
    ($result:expr, $variant:ident, $msg:expr) => {
        assert!(
            matches!($result, Err($crate::error::AuthError::$variant { .. })),
            "{}: expected AuthError::{}, got: {:?}",
            $msg,
            stringify!($variant),
            $result,
        );
    };
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::jwt::JwtVerifier;

    #[test]
    fn keypair_shapes() {
        let (pkcs8_der, public_key_b64) = generate_test_keypair();
        assert_eq!(pkcs8_der.len(), 48);
        assert_eq!(public_key_b64.len(), 43);
    }

    #[test]
    fn pool_tokens_verify_against_pool_config() {
        let pool = TestUserPool::new("kid-1");
        let verifier = JwtVerifier::from_config(&pool.config()).unwrap();
        let principal = verifier.verify_token(&pool.token("alice", &["admin"])).unwrap();
        assert_eq!(principal.subject(), Some("alice"));
        assert_eq!(principal.groups(), ["admin".to_owned()]);
    }

    #[test]
    fn raw_jwt_has_empty_signature() {
        let jwt = craft_raw_jwt(&json!({"alg": "none"}), &json!({"sub": "x"}));
        assert!(jwt.ends_with('.'));
        assert_eq!(jwt.split('.').count(), 3);
    }

    #[tokio::test]
    async fn static_verifier_table() {
        let verifier = StaticVerifier::new().with_user("t1", "bob", &[]);
        assert_eq!(verifier.verify("t1").await.unwrap().subject(), Some("bob"));
        assert_auth_error!(verifier.verify("t2").await, InvalidSignature);
        assert_auth_error!(StaticVerifier::unavailable().verify("t1").await, VerifierUnavailable);
    }
}
