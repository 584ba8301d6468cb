//! End-to-end behavior of the reference policy and policy validation.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{
    net::IpAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use pointgate_admission::{
    Action, AdmissionError, DecisionSource, EvaluationError, IpSetProvider, RateTableConfig,
    RequestContext, SharedIpSet, WebAcl, WebAclConfig,
};
use rstest::rstest;

const API_KEY: &str = "da2-s3cr3tkey";
const OFFICE: &str = "146.198.93.180";

fn reference_acl() -> WebAcl {
    WebAclConfig::reference(API_KEY, vec![format!("{OFFICE}/32")]).compile().unwrap()
}

fn from(ip: &str) -> RequestContext {
    RequestContext::new(ip.parse().unwrap())
}

#[test]
fn flood_protection_blocks_the_request_after_the_limit() {
    let acl = reference_acl();
    let now = Instant::now();
    let ctx = from("203.0.113.7");

    for i in 0..1000 {
        let decision = acl.evaluate_at(&ctx, now + Duration::from_millis(i));
        assert_eq!(decision.action, Action::Allow, "request {i} should pass");
    }
    let decision = acl.evaluate_at(&ctx, now + Duration::from_millis(1000));
    assert_eq!(decision.action, Action::Block);
    assert_eq!(decision.matched_rule(), Some("FloodProtection"));

    // Other sources are unaffected.
    assert_eq!(acl.evaluate_at(&from("203.0.113.8"), now).action, Action::Allow);
}

#[test]
fn flood_window_rolls_over() {
    let acl = reference_acl();
    let start = Instant::now();
    let ctx = from("203.0.113.7");

    for _ in 0..1001 {
        acl.evaluate_at(&ctx, start);
    }
    assert!(acl.evaluate_at(&ctx, start + Duration::from_secs(60)).is_blocked());
    assert!(!acl.evaluate_at(&ctx, start + Duration::from_secs(301)).is_blocked());
}

#[rstest]
#[case::unlisted_address("198.51.100.4", Action::Block)]
#[case::allow_listed_address(OFFICE, Action::Allow)]
fn restrict_api_key_by_source(#[case] ip: &str, #[case] expected: Action) {
    let acl = reference_acl();
    let decision = acl.evaluate(&from(ip).with_header("X-Api-Key", API_KEY));
    assert_eq!(decision.action, expected);
    if expected == Action::Block {
        assert_eq!(decision.matched_rule(), Some("RestrictAPIKey"));
    } else {
        assert_eq!(decision.source, DecisionSource::Default);
    }
}

#[test]
fn header_value_is_lowercased_before_comparison() {
    let acl = reference_acl();
    let decision = acl.evaluate(&from("198.51.100.4").with_header("x-api-key", "DA2-S3CR3TKEY"));
    assert_eq!(decision.matched_rule(), Some("RestrictAPIKey"));
}

#[test]
fn requests_without_the_key_fall_through_to_default() {
    let acl = reference_acl();
    let decision = acl.evaluate(&from("198.51.100.4").with_header("x-api-key", "other"));
    assert_eq!(decision.action, Action::Allow);
    assert_eq!(decision.source, DecisionSource::Default);
}

#[test]
fn metrics_reflect_decisions() {
    let acl = reference_acl();
    acl.evaluate(&from("198.51.100.4").with_header("x-api-key", API_KEY));
    acl.evaluate(&from(OFFICE).with_header("x-api-key", API_KEY));

    let metrics = acl.metrics();
    assert_eq!(metrics.allowed, 1);
    assert_eq!(metrics.blocked, 1);
    assert_eq!(metrics.rule_matches.get("RestrictAPIKey"), Some(&1));
    assert_eq!(metrics.rule_matches.get("FloodProtection"), Some(&0));
}

#[test]
fn duplicate_priority_rejected_at_load() {
    let mut config = WebAclConfig::reference(API_KEY, vec![]);
    config.rules[1].priority = 1;
    let err = config.compile().unwrap_err();
    assert!(matches!(err, AdmissionError::DuplicatePriority { priority: 1, .. }), "{err}");
}

#[test]
fn unknown_ip_set_rejected_at_load() {
    let mut config = WebAclConfig::reference(API_KEY, vec![]);
    config.ip_sets.clear();
    let err = config.compile().unwrap_err();
    assert!(matches!(err, AdmissionError::UnknownIpSet { .. }), "{err}");
}

#[test]
fn invalid_allow_list_entry_rejected_at_load() {
    let config = WebAclConfig::reference(API_KEY, vec!["not-an-address".into()]);
    assert!(matches!(config.compile(), Err(AdmissionError::InvalidCidr { .. })));
}

#[test]
fn policy_document_from_json() {
    let json = r#"{
        "name": "edge",
        "defaultAction": { "block": {} },
        "ipSets": [{ "name": "office", "ipAddressVersion": "IPV4", "addresses": ["10.0.0.0/8"] }],
        "rules": [{
            "name": "AllowOffice",
            "priority": 5,
            "action": { "allow": {} },
            "statement": { "ipSetReferenceStatement": { "name": "office" } }
        }]
    }"#;
    let acl = WebAclConfig::from_json_str(json).unwrap().compile().unwrap();
    assert_eq!(acl.evaluate(&from("10.20.30.40")).action, Action::Allow);
    assert_eq!(acl.evaluate(&from("11.0.0.1")).action, Action::Block);
}

#[derive(Debug)]
struct UnreachableAllowList;

impl IpSetProvider for UnreachableAllowList {
    fn name(&self) -> &str {
        "ApiKeyAllowList"
    }

    fn contains(&self, _addr: IpAddr) -> Result<bool, EvaluationError> {
        Err(EvaluationError::ip_set_unavailable("ApiKeyAllowList", "backend unreachable"))
    }
}

#[test]
fn failing_ip_set_provider_blocks_request() {
    let config = WebAclConfig::reference(API_KEY, vec![]);
    let provider: SharedIpSet = Arc::new(UnreachableAllowList);
    let acl = WebAcl::from_config_with_providers(&config, [provider]).unwrap();

    let decision = acl.evaluate(&from(OFFICE).with_header("x-api-key", API_KEY));
    assert_eq!(decision.action, Action::Block);
    assert_eq!(decision.source, DecisionSource::FailClosed);

    // Without the key the set is never consulted.
    assert_eq!(acl.evaluate(&from(OFFICE)).action, Action::Allow);
}

#[test]
fn full_counter_table_fails_closed() {
    let mut config = WebAclConfig::reference(API_KEY, vec![]);
    config.rate_limits = RateTableConfig { max_tracked_keys: 2, shards: 1, sweep_interval: 1024 };
    let acl = config.compile().unwrap();
    let now = Instant::now();

    assert!(!acl.evaluate_at(&from("192.0.2.1"), now).is_blocked());
    assert!(!acl.evaluate_at(&from("192.0.2.2"), now).is_blocked());
    let third = acl.evaluate_at(&from("192.0.2.3"), now);
    assert_eq!(third.source, DecisionSource::FailClosed);
    assert_eq!(acl.rate_table_usage(), (2, 2));

    // Once the windows elapse the sweep frees room.
    let later = now + Duration::from_secs(301);
    assert!(!acl.evaluate_at(&from("192.0.2.3"), later).is_blocked());
}

#[test]
fn concurrent_evaluation_counts_every_request() {
    let acl = Arc::new(reference_acl());
    let now = Instant::now();
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let acl = Arc::clone(&acl);
            std::thread::spawn(move || {
                let ctx = from("203.0.113.50");
                (0..200).filter(|_| acl.evaluate_at(&ctx, now).is_blocked()).count()
            })
        })
        .collect();
    let blocked: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(blocked, 600);
}
