//! Mode selection, API-key expiry and field authorization.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use pointgate_authn::{
    AuthFailure, AuthModeKind, AuthRequest, AuthorizationResolver, assert_auth_error,
    mode::{ApiKeyConfig, AuthorizationConfig, AuthorizationModeConfig, FieldAuthorization},
    testutil::{StaticVerifier, TestUserPool},
};
use rstest::rstest;

const KEY: &str = "da2-0123456789abcdefghijklmnop";

fn anchor() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()
}

fn expiry() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 8, 0, 0, 0).unwrap()
}

/// USER_POOL default with API_KEY as an additional mode.
fn config(pool: &TestUserPool, fields: Vec<FieldAuthorization>) -> AuthorizationConfig {
    AuthorizationConfig {
        default_authorization: AuthorizationModeConfig::user_pool(pool.config()),
        additional_authorization_modes: vec![AuthorizationModeConfig::api_key(
            ApiKeyConfig::expiring_days_after("workshop", KEY, anchor(), 7),
        )],
        field_authorization: fields,
    }
}

fn resolver(fields: Vec<FieldAuthorization>) -> (TestUserPool, AuthorizationResolver) {
    let pool = TestUserPool::new("kid-1");
    let resolver = AuthorizationResolver::from_config(&config(&pool, fields)).unwrap();
    (pool, resolver)
}

#[tokio::test]
async fn api_key_valid_before_expiry() {
    let (_pool, resolver) = resolver(vec![]);
    let request = AuthRequest::new("listDataPoints").with_api_key(KEY);

    let principal = resolver.authorize_at(&request, expiry() - TimeDelta::hours(1)).await.unwrap();
    assert_eq!(principal.mode(), AuthModeKind::ApiKey);
    assert!(principal.is_anonymous());
    assert_eq!(resolver.api_key_expiry(), Some(expiry()));
}

#[rstest]
#[case::at_expiry(TimeDelta::zero(), true)]
#[case::one_second_after(TimeDelta::seconds(1), false)]
#[case::a_week_after(TimeDelta::days(7), false)]
#[tokio::test]
async fn api_key_expiry_boundary(#[case] offset: TimeDelta, #[case] accepted: bool) {
    let (_pool, resolver) = resolver(vec![]);
    let request = AuthRequest::new("getDataPoint").with_api_key(KEY);
    let result = resolver.authorize_at(&request, expiry() + offset).await;
    assert_eq!(result.is_ok(), accepted, "{result:?}");
    if !accepted {
        let err = result.unwrap_err();
        assert_eq!(err.failure(), AuthFailure::Unauthenticated);
        assert!(matches!(err, pointgate_authn::AuthError::ApiKeyExpired { .. }));
    }
}

#[tokio::test]
async fn wrong_api_key_rejected() {
    let (_pool, resolver) = resolver(vec![]);
    let request = AuthRequest::new("getDataPoint").with_api_key("da2-guess");
    assert_auth_error!(resolver.authorize_at(&request, anchor()).await, InvalidApiKey);
}

#[tokio::test]
async fn bearer_token_selects_user_pool() {
    let (pool, resolver) = resolver(vec![]);
    let request = AuthRequest::new("createDataPoint").with_bearer(format!("Bearer {}", pool.token("alice", &[])));
    let principal = resolver.authorize(&request).await.unwrap();
    assert_eq!(principal.mode(), AuthModeKind::UserPool);
    assert_eq!(principal.subject(), Some("alice"));
}

#[tokio::test]
async fn request_without_credential_falls_to_default_mode() {
    let (_pool, resolver) = resolver(vec![]);
    let result = resolver.authorize(&AuthRequest::new("listDataPoints")).await;
    assert!(
        matches!(
            &result,
            Err(pointgate_authn::AuthError::MissingCredential { mode: AuthModeKind::UserPool })
        ),
        "{result:?}"
    );
}

#[tokio::test]
async fn explicit_mode_must_match_credential() {
    let (pool, resolver) = resolver(vec![]);
    let request = AuthRequest::new("listDataPoints")
        .with_bearer(pool.token("alice", &[]))
        .with_mode(AuthModeKind::ApiKey);
    assert_auth_error!(resolver.authorize(&request).await, MissingCredential);
}

#[tokio::test]
async fn unconfigured_mode_rejected() {
    let config = AuthorizationConfig {
        default_authorization: AuthorizationModeConfig::api_key(ApiKeyConfig::expiring_days_after(
            "only", KEY, anchor(), 7,
        )),
        additional_authorization_modes: vec![],
        field_authorization: vec![],
    };
    let resolver = AuthorizationResolver::from_config(&config).unwrap();
    let request = AuthRequest::new("listDataPoints").with_bearer("header.payload.sig");
    assert_auth_error!(resolver.authorize_at(&request, anchor()).await, ModeNotConfigured);
}

#[tokio::test]
async fn field_rule_restricts_modes() {
    let (pool, resolver) = resolver(vec![FieldAuthorization {
        field: "deleteDataPoint".into(),
        allowed_modes: vec![AuthModeKind::UserPool],
        required_groups: vec![],
    }]);

    let by_key = AuthRequest::new("deleteDataPoint").with_api_key(KEY);
    let err = resolver.authorize_at(&by_key, anchor()).await.unwrap_err();
    assert_eq!(err.failure(), AuthFailure::Unauthorized);

    let by_user = AuthRequest::new("deleteDataPoint").with_bearer(pool.token("alice", &[]));
    assert!(resolver.authorize(&by_user).await.is_ok());

    // Fields without a rule stay open to every configured mode.
    let other = AuthRequest::new("getDataPoint").with_api_key(KEY);
    assert!(resolver.authorize_at(&other, anchor()).await.is_ok());
}

#[tokio::test]
async fn field_rule_requires_group_membership() {
    let (pool, resolver) = resolver(vec![FieldAuthorization {
        field: "createDataPoint".into(),
        allowed_modes: vec![],
        required_groups: vec!["writers".into(), "admins".into()],
    }]);

    let reader = AuthRequest::new("createDataPoint").with_bearer(pool.token("r", &["readers"]));
    assert_auth_error!(resolver.authorize(&reader).await, MissingGroup);

    let admin = AuthRequest::new("createDataPoint").with_bearer(pool.token("a", &["admins"]));
    assert!(resolver.authorize(&admin).await.is_ok());

    // API-key principals carry no groups.
    let by_key = AuthRequest::new("createDataPoint").with_api_key(KEY);
    assert_auth_error!(resolver.authorize_at(&by_key, anchor()).await, MissingGroup);
}

#[tokio::test]
async fn custom_verifier_replaces_jwt_verification() {
    let pool = TestUserPool::new("unused");
    let verifier = StaticVerifier::new().with_user("opaque-token", "svc", &["ops"]);
    let resolver =
        AuthorizationResolver::with_verifier(&config(&pool, vec![]), Arc::new(verifier)).unwrap();

    let request = AuthRequest::new("listDataPoints").with_bearer("opaque-token");
    assert_eq!(resolver.authorize(&request).await.unwrap().subject(), Some("svc"));
}

#[tokio::test]
async fn verifier_outage_is_unauthenticated() {
    let pool = TestUserPool::new("unused");
    let resolver = AuthorizationResolver::with_verifier(
        &config(&pool, vec![]),
        Arc::new(StaticVerifier::unavailable()),
    )
    .unwrap();

    let request = AuthRequest::new("listDataPoints").with_bearer("anything");
    let err = resolver.authorize(&request).await.unwrap_err();
    assert_eq!(err.failure(), AuthFailure::Unauthenticated);
}

#[test]
fn invalid_configuration_rejected_at_load() {
    let pool = TestUserPool::new("kid-1");
    let mut config = config(&pool, vec![]);
    config.additional_authorization_modes.push(AuthorizationModeConfig::user_pool(pool.config()));
    assert!(AuthorizationResolver::from_config(&config).is_err());
}
