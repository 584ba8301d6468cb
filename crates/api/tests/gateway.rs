//! Requests through all three gates.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::{
    net::{IpAddr, Ipv4Addr},
    sync::Arc,
};

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use pointgate_admission::{RequestContext, WebAclConfig};
use pointgate_api::{
    ApiError, Channel, ConfigError, DataPoint, DataPointKey, Gateway, GatewayConfig, Operation,
    OperationOutput, TableConfig,
};
use pointgate_authn::{
    AuthError, AuthModeKind,
    mode::{ApiKeyConfig, AuthorizationConfig, AuthorizationModeConfig, FieldAuthorization},
    testutil::{StaticVerifier, TestUserPool},
};
use pointgate_storage::MemoryBackend;
use serde_json::json;

const KEY: &str = "da2-0123456789abcdefghijklmnop";
const OFFICE: Ipv4Addr = Ipv4Addr::new(146, 198, 93, 180);
const ELSEWHERE: Ipv4Addr = Ipv4Addr::new(203, 0, 113, 9);
const ALICE_TOKEN: &str = "token-alice";

fn anchor() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()
}

fn expiry() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 8, 0, 0, 0).unwrap()
}

fn config(fields: Vec<FieldAuthorization>) -> GatewayConfig {
    let pool = TestUserPool::new("kid-1");
    GatewayConfig {
        admission: WebAclConfig::reference(KEY, vec![format!("{OFFICE}/32")]),
        authorization: AuthorizationConfig {
            default_authorization: AuthorizationModeConfig::user_pool(pool.config()),
            additional_authorization_modes: vec![AuthorizationModeConfig::api_key(
                ApiKeyConfig::expiring_days_after("workshop", KEY, anchor(), 7),
            )],
            field_authorization: fields,
        },
        table: TableConfig::default(),
    }
}

fn gateway_with(fields: Vec<FieldAuthorization>) -> Gateway<MemoryBackend> {
    let verifier = StaticVerifier::new().with_user(ALICE_TOKEN, "alice", &["writers"]);
    config(fields).build_with_verifier(MemoryBackend::new(), Arc::new(verifier)).unwrap()
}

fn gateway() -> Gateway<MemoryBackend> {
    gateway_with(Vec::new())
}

fn from(ip: Ipv4Addr) -> RequestContext {
    RequestContext::new(IpAddr::V4(ip))
}

fn create(created_at: &str) -> Operation {
    Operation::CreateDataPoint(DataPoint::new("temp", created_at, json!(21.5)))
}

#[tokio::test]
async fn bearer_token_reaches_the_store() {
    let gateway = gateway();
    let request = from(ELSEWHERE).with_header("Authorization", format!("Bearer {ALICE_TOKEN}"));

    let output = gateway.handle(&request, create("2024-01-01T00:00:00Z")).await.unwrap();
    assert!(matches!(output, OperationOutput::DataPoint(_)));

    let fetched = gateway
        .handle(&request, Operation::GetDataPoint(DataPointKey::new("temp", "2024-01-01T00:00:00Z")))
        .await
        .unwrap();
    assert_eq!(
        fetched.into_data_point(),
        Some(DataPoint::new("temp", "2024-01-01T00:00:00Z", json!(21.5)))
    );
}

#[tokio::test]
async fn api_key_from_allow_listed_address_before_expiry() {
    let gateway = gateway();
    let request = from(OFFICE).with_header("x-api-key", KEY);
    let now = expiry() - TimeDelta::hours(1);

    gateway.handle_at(&request, create("2024-01-01T00:00:00Z"), now).await.unwrap();
    assert_eq!(gateway.pipeline().backend().len(), 1);
}

#[tokio::test]
async fn expired_api_key_is_unauthenticated_even_when_admitted() {
    let gateway = gateway();
    let request = from(OFFICE).with_header("x-api-key", KEY);
    let now = expiry() + TimeDelta::seconds(1);

    let err = gateway.handle_at(&request, create("2024-01-01T00:00:00Z"), now).await.unwrap_err();
    assert!(
        matches!(err, ApiError::Unauthenticated(AuthError::ApiKeyExpired { .. })),
        "got {err:?}"
    );
    assert_eq!(gateway.acl().metrics().allowed, 1);
    assert!(gateway.pipeline().backend().is_empty());
}

#[tokio::test]
async fn shared_key_from_unlisted_address_is_blocked_before_auth() {
    let gateway = gateway();
    let request = from(ELSEWHERE).with_header("x-api-key", KEY);

    let err = gateway.handle_at(&request, create("2024-01-01T00:00:00Z"), anchor()).await.unwrap_err();
    assert!(
        matches!(&err, ApiError::AdmissionBlocked { rule: Some(rule) } if rule == "RestrictAPIKey"),
        "got {err:?}"
    );
    assert!(gateway.pipeline().backend().is_empty());
}

#[tokio::test]
async fn flood_is_blocked_after_limit() {
    let gateway = gateway();
    let request = from(ELSEWHERE).with_header("Authorization", format!("Bearer {ALICE_TOKEN}"));
    let get = || Operation::GetDataPoint(DataPointKey::new("temp", "2024-01-01T00:00:00Z"));

    for _ in 0..1000 {
        gateway.handle(&request, get()).await.unwrap();
    }
    let err = gateway.handle(&request, get()).await.unwrap_err();
    assert!(
        matches!(&err, ApiError::AdmissionBlocked { rule: Some(rule) } if rule == "FloodProtection"),
        "got {err:?}"
    );
}

#[tokio::test]
async fn missing_credential_uses_default_mode() {
    let err = gateway().handle(&from(ELSEWHERE), create("2024-01-01T00:00:00Z")).await.unwrap_err();
    assert!(
        matches!(err, ApiError::Unauthenticated(AuthError::MissingCredential { mode: AuthModeKind::UserPool })),
        "got {err:?}"
    );
}

#[tokio::test]
async fn field_rule_rejects_api_key_mutations() {
    let gateway = gateway_with(vec![FieldAuthorization {
        field: "createDataPoint".into(),
        allowed_modes: vec![AuthModeKind::UserPool],
        required_groups: Vec::new(),
    }]);
    let request = from(OFFICE).with_header("x-api-key", KEY);

    let err = gateway.handle_at(&request, create("2024-01-01T00:00:00Z"), anchor()).await.unwrap_err();
    assert!(matches!(err, ApiError::Unauthorized(_)), "got {err:?}");

    // Reads stay open to both modes.
    let read = Operation::GetDataPoint(DataPointKey::new("temp", "2024-01-01T00:00:00Z"));
    assert!(gateway.handle_at(&request, read, anchor()).await.is_ok());
}

#[tokio::test]
async fn subscription_requires_authorization_and_sees_creates() {
    let gateway = gateway();
    let anonymous = from(ELSEWHERE);
    let err = gateway.subscribe(&anonymous, Channel::OnCreateDataPoint, None).await.unwrap_err();
    assert!(matches!(err, ApiError::Unauthenticated(_)));

    let alice = from(ELSEWHERE).with_header("Authorization", format!("Bearer {ALICE_TOKEN}"));
    let mut events = gateway.subscribe(&alice, Channel::OnCreateDataPoint, None).await.unwrap();
    gateway.handle(&alice, create("2024-01-01T00:00:00Z")).await.unwrap();
    assert_eq!(events.recv().await.map(|p| p.name), Some("temp".to_owned()));
}

#[tokio::test]
async fn expired_api_key_cannot_open_a_subscription() {
    let gateway = gateway();
    let request = from(OFFICE).with_header("x-api-key", KEY);

    let before = expiry() - TimeDelta::minutes(1);
    let events = gateway.subscribe_at(&request, Channel::OnCreateDataPoint, None, before).await;
    assert!(events.is_ok());
    assert_eq!(gateway.pipeline().hub().subscriber_count(Channel::OnCreateDataPoint), 1);

    let after = expiry() + TimeDelta::seconds(1);
    let err = gateway
        .subscribe_at(&request, Channel::OnCreateDataPoint, None, after)
        .await
        .unwrap_err();
    assert!(
        matches!(err, ApiError::Unauthenticated(AuthError::ApiKeyExpired { .. })),
        "got {err:?}"
    );
    assert_eq!(gateway.pipeline().hub().subscriber_count(Channel::OnCreateDataPoint), 1);
}

#[tokio::test]
async fn health_merges_gateway_and_store() {
    let status = gateway().health_check().await;
    assert!(status.is_healthy(), "got {status}");
    let details = &status.metadata().details;
    assert_eq!(details.get("rate_table_used").map(String::as_str), Some("0"));
    assert_eq!(details.get("memory.probe").map(String::as_str), Some("readiness"));
}

#[test]
fn config_document_round_trips_through_json() {
    let original = config(Vec::new());
    let json = serde_json::to_string(&original).unwrap();
    let parsed = GatewayConfig::from_json_str(&json).unwrap();
    assert_eq!(parsed.admission, original.admission);
    assert_eq!(parsed.table, original.table);
    assert!(parsed.build(MemoryBackend::new()).is_ok());
}

#[test]
fn invalid_admission_policy_fails_at_load() {
    let mut config = config(Vec::new());
    config.admission.rules[1].priority = 1;
    let err = config.build(MemoryBackend::new()).unwrap_err();
    assert!(matches!(err, ConfigError::Admission(_)), "got {err:?}");
}

#[test]
fn rotated_api_key_must_be_reflected_in_admission_rules() {
    let mut config = config(Vec::new());
    config.authorization.additional_authorization_modes = vec![AuthorizationModeConfig::api_key(
        ApiKeyConfig::generate("rotated", expiry()),
    )];
    let err = config.build(MemoryBackend::new()).unwrap_err();
    assert!(
        matches!(&err, ConfigError::StaleApiKeyRule { rule } if rule == "RestrictAPIKey"),
        "got {err:?}"
    );

    let rotated = config.authorization.additional_authorization_modes[0]
        .api_key_config
        .as_ref()
        .unwrap()
        .key
        .as_str()
        .to_owned();
    config.admission = WebAclConfig::reference(&rotated, vec![format!("{OFFICE}/32")]);
    assert!(config.build(MemoryBackend::new()).is_ok());
}

#[test]
fn upper_case_key_binds_to_lowercased_rule() {
    let mut config = config(Vec::new());
    config.authorization.additional_authorization_modes = vec![AuthorizationModeConfig::api_key(
        ApiKeyConfig::expiring_days_after("workshop", KEY.to_uppercase(), anchor(), 7),
    )];
    assert!(config.build(MemoryBackend::new()).is_ok());
}
