//! Policy documents.
//!
//! A [`WebAclConfig`] is the JSON form of a web ACL: a default action, a list
//! of prioritized rules whose statements form a boolean tree, and the IP
//! sets those statements reference. Field names follow the camelCase
//! provisioning vocabulary, and unknown fields or statement types are
//! rejected when the document is parsed.
//!
//! ```
//! use pointgate_admission::WebAclConfig;
//!
//! let config = WebAclConfig::from_json_str(r#"{
//!     "name": "edge",
//!     "defaultAction": { "allow": {} },
//!     "rules": [{
//!         "name": "FloodProtection",
//!         "priority": 1,
//!         "action": { "block": {} },
//!         "statement": { "rateBasedStatement": { "limit": 1000, "aggregateKeyType": "IP" } },
//!         "visibilityConfig": { "metricName": "FloodProtection" }
//!     }]
//! }"#).unwrap();
//!
//! let acl = config.compile().unwrap();
//! assert_eq!(acl.rule_names().collect::<Vec<_>>(), vec!["FloodProtection"]);
//! ```

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    acl::{Action, WebAcl},
    error::AdmissionError,
    ip_set::{IpAddressVersion, IpSetConfig},
    rate::{RateTableConfig, WindowMode},
    statement::ByteMatchStatement,
    transform::{TextTransformation, TransformType},
};

/// Rate window used when a statement does not set one.
pub const DEFAULT_EVALUATION_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Name of the allow-list set in [`WebAclConfig::reference`].
pub const REFERENCE_ALLOW_LIST: &str = "ApiKeyAllowList";

fn default_window() -> Duration {
    DEFAULT_EVALUATION_WINDOW
}

fn default_true() -> bool {
    true
}

/// Empty JSON object used where the document carries a tag with no settings,
/// such as `{ "block": {} }` or `{ "uriPath": {} }`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Empty {}

/// `{ "allow": {} }` or `{ "block": {} }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionConfig {
    /// Let the request through.
    Allow(Empty),
    /// Reject the request.
    Block(Empty),
}

impl ActionConfig {
    /// The runtime action.
    #[must_use]
    pub fn action(self) -> Action {
        match self {
            Self::Allow(_) => Action::Allow,
            Self::Block(_) => Action::Block,
        }
    }
}

impl From<Action> for ActionConfig {
    fn from(action: Action) -> Self {
        match action {
            Action::Allow => Self::Allow(Empty {}),
            Action::Block => Self::Block(Empty {}),
        }
    }
}

/// Metric settings for a rule or the whole ACL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct VisibilityConfig {
    /// Name under which matches are counted.
    pub metric_name: String,
    /// Whether matches are counted at all.
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

impl VisibilityConfig {
    /// Enabled metrics under `metric_name`.
    #[must_use]
    pub fn named(metric_name: impl Into<String>) -> Self {
        Self { metric_name: metric_name.into(), metrics_enabled: true }
    }
}

/// One node of a rule's statement tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatementConfig {
    /// Matches when an aggregate key exceeds its request limit.
    #[serde(rename = "rateBasedStatement")]
    RateBased(RateBasedConfig),
    /// Matches a request component against a search string.
    #[serde(rename = "byteMatchStatement")]
    ByteMatch(ByteMatchConfig),
    /// Matches when the source address is in a named set.
    #[serde(rename = "ipSetReferenceStatement")]
    IpSetReference(IpSetReferenceConfig),
    /// Negation.
    #[serde(rename = "notStatement")]
    Not(NotConfig),
    /// Conjunction.
    #[serde(rename = "andStatement")]
    And(CompoundConfig),
    /// Disjunction.
    #[serde(rename = "orStatement")]
    Or(CompoundConfig),
}

impl StatementConfig {
    /// `notStatement` wrapping `inner`.
    #[must_use]
    pub fn not(inner: StatementConfig) -> Self {
        Self::Not(NotConfig { statement: Box::new(inner) })
    }

    /// `andStatement` over `statements`.
    #[must_use]
    pub fn and(statements: Vec<StatementConfig>) -> Self {
        Self::And(CompoundConfig { statements })
    }

    /// `orStatement` over `statements`.
    #[must_use]
    pub fn or(statements: Vec<StatementConfig>) -> Self {
        Self::Or(CompoundConfig { statements })
    }

    /// `ipSetReferenceStatement` for the set called `name`.
    #[must_use]
    pub fn ip_set(name: impl Into<String>) -> Self {
        Self::IpSetReference(IpSetReferenceConfig { name: name.into() })
    }

    /// Per-source-IP rate statement with default window settings.
    #[must_use]
    pub fn rate_per_ip(limit: u64) -> Self {
        Self::RateBased(RateBasedConfig {
            limit,
            aggregate_key_type: AggregateKeyType::Ip,
            evaluation_window: DEFAULT_EVALUATION_WINDOW,
            window_mode: WindowMode::Sliding,
            forwarded_ip_config: None,
            scope_down_statement: None,
        })
    }

    /// Single-header byte match.
    #[must_use]
    pub fn header_match(
        header: impl Into<String>,
        constraint: PositionalConstraint,
        search_string: impl Into<String>,
        transforms: &[TransformType],
    ) -> Self {
        Self::ByteMatch(ByteMatchConfig {
            field_to_match: FieldToMatch::SingleHeader(SingleHeader { name: header.into() }),
            positional_constraint: constraint,
            search_string: search_string.into(),
            text_transformations: transforms
                .iter()
                .zip(1u32..)
                .map(|(&kind, priority)| TextTransformation { priority, kind })
                .collect(),
        })
    }
}

/// `notStatement` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NotConfig {
    /// Negated statement.
    pub statement: Box<StatementConfig>,
}

/// `andStatement` / `orStatement` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CompoundConfig {
    /// Operands, at least two.
    pub statements: Vec<StatementConfig>,
}

/// Dimension a rate-based statement counts by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AggregateKeyType {
    /// Connection source address.
    #[default]
    Ip,
    /// Address taken from a forwarding header.
    ForwardedIp,
}

/// What a forwarded-IP statement does when the header is missing or invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FallbackBehavior {
    /// Treat the statement as matching.
    Match,
    /// Treat the statement as not matching.
    NoMatch,
}

/// Header settings for `FORWARDED_IP` aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ForwardedIpConfig {
    /// Header carrying the client address, e.g. `X-Forwarded-For`. The first
    /// comma-separated entry is used.
    pub header_name: String,
    /// Behavior when the header is absent or unparsable.
    pub fallback_behavior: FallbackBehavior,
}

/// `rateBasedStatement` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RateBasedConfig {
    /// Requests allowed per window; the statement matches above this.
    pub limit: u64,
    /// Counting dimension.
    #[serde(default)]
    pub aggregate_key_type: AggregateKeyType,
    /// Window length, e.g. `"5m"`.
    #[serde(default = "default_window", with = "humantime_serde")]
    pub evaluation_window: Duration,
    /// Sliding or fixed window.
    #[serde(default)]
    pub window_mode: WindowMode,
    /// Required for `FORWARDED_IP`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forwarded_ip_config: Option<ForwardedIpConfig>,
    /// Only requests matching this statement are counted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_down_statement: Option<Box<StatementConfig>>,
}

/// Where in the request a byte match looks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldToMatch {
    /// One named header.
    SingleHeader(SingleHeader),
    /// The URI path.
    UriPath(Empty),
    /// The raw query string.
    QueryString(Empty),
    /// The HTTP method.
    Method(Empty),
}

/// `singleHeader` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SingleHeader {
    /// Header name, case-insensitive.
    pub name: String,
}

/// How the search string must sit in the field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionalConstraint {
    /// Whole field equals the search string.
    Exactly,
    /// Field begins with it.
    StartsWith,
    /// Field ends with it.
    EndsWith,
    /// Field contains it anywhere.
    Contains,
    /// Field contains it delimited by non-word characters or the field edges.
    ContainsWord,
}

/// `byteMatchStatement` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ByteMatchConfig {
    /// Inspected component.
    pub field_to_match: FieldToMatch,
    /// Match position.
    pub positional_constraint: PositionalConstraint,
    /// Text to look for. Transformations apply to it as well.
    pub search_string: String,
    /// Normalization steps.
    #[serde(default)]
    pub text_transformations: Vec<TextTransformation>,
}

impl ByteMatchConfig {
    /// Whether `value`, read from the inspected field, satisfies this match.
    ///
    /// # Errors
    ///
    /// Returns the load-time validation error of an invalid match.
    pub fn matches_value(&self, value: &str) -> Result<bool, AdmissionError> {
        Ok(ByteMatchStatement::compile("", self)?.matches_value(value))
    }

    fn inspects_header(&self, name: &str) -> bool {
        matches!(&self.field_to_match, FieldToMatch::SingleHeader(h) if h.name.eq_ignore_ascii_case(name))
    }
}

/// `ipSetReferenceStatement` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct IpSetReferenceConfig {
    /// Name of a declared or registered IP set.
    pub name: String,
}

/// One rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RuleConfig {
    /// Unique rule name, reported in decisions.
    pub name: String,
    /// Unique priority; lower runs first.
    pub priority: u32,
    /// Action when the statement matches.
    pub action: ActionConfig,
    /// Statement tree.
    pub statement: StatementConfig,
    /// Match counting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility_config: Option<VisibilityConfig>,
}

/// A complete web ACL document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WebAclConfig {
    /// ACL name.
    pub name: String,
    /// Action when no rule matches.
    pub default_action: ActionConfig,
    /// ACL-level metric settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility_config: Option<VisibilityConfig>,
    /// Declared IP sets.
    #[serde(default)]
    pub ip_sets: Vec<IpSetConfig>,
    /// Rules in any order.
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
    /// Counter table sizing.
    #[serde(default)]
    pub rate_limits: RateTableConfig,
}

impl WebAclConfig {
    /// Parses a policy document.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::Parse`] for malformed JSON, unknown fields or
    /// unknown statement types.
    pub fn from_json_str(json: &str) -> Result<Self, AdmissionError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Parses a policy document from `reader`.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::Parse`] as for [`from_json_str`](Self::from_json_str).
    pub fn from_reader(reader: impl std::io::Read) -> Result<Self, AdmissionError> {
        Ok(serde_json::from_reader(reader)?)
    }

    /// Reads and parses a policy file.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::Io`] if the file cannot be opened.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, AdmissionError> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .map_err(|source| AdmissionError::Io { path: path.display().to_string(), source })?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    /// The reference policy: allow by default, block any source IP above
    /// 1000 requests per 5 minutes (`FloodProtection`), and block use of the
    /// shared API key from addresses outside `allow_list` (`RestrictAPIKey`).
    #[must_use]
    pub fn reference(api_key: &str, allow_list: Vec<String>) -> Self {
        Self {
            name: "WorkshopAPI-ACL".to_owned(),
            default_action: ActionConfig::Allow(Empty {}),
            visibility_config: Some(VisibilityConfig::named("WorkshopAPI-ACL")),
            ip_sets: vec![IpSetConfig {
                name: REFERENCE_ALLOW_LIST.to_owned(),
                ip_address_version: IpAddressVersion::Ipv4,
                addresses: allow_list,
            }],
            rules: vec![
                RuleConfig {
                    name: "FloodProtection".to_owned(),
                    priority: 1,
                    action: ActionConfig::Block(Empty {}),
                    statement: StatementConfig::rate_per_ip(1000),
                    visibility_config: Some(VisibilityConfig::named("FloodProtection")),
                },
                RuleConfig {
                    name: "RestrictAPIKey".to_owned(),
                    priority: 2,
                    action: ActionConfig::Block(Empty {}),
                    statement: StatementConfig::and(vec![
                        StatementConfig::header_match(
                            "x-api-key",
                            PositionalConstraint::Exactly,
                            api_key,
                            &[TransformType::Lowercase],
                        ),
                        StatementConfig::not(StatementConfig::ip_set(REFERENCE_ALLOW_LIST)),
                    ]),
                    visibility_config: Some(VisibilityConfig::named("RestrictAPIKey")),
                },
            ],
            rate_limits: RateTableConfig::default(),
        }
    }

    /// Every byte match on header `name`, with the name of its rule.
    #[must_use]
    pub fn header_matches(&self, name: &str) -> Vec<(&str, &ByteMatchConfig)> {
        fn walk<'a>(
            rule: &'a str,
            statement: &'a StatementConfig,
            name: &str,
            found: &mut Vec<(&'a str, &'a ByteMatchConfig)>,
        ) {
            match statement {
                StatementConfig::ByteMatch(byte_match) if byte_match.inspects_header(name) => {
                    found.push((rule, byte_match));
                },
                StatementConfig::RateBased(RateBasedConfig {
                    scope_down_statement: Some(scope), ..
                }) => walk(rule, scope, name, found),
                StatementConfig::Not(not) => walk(rule, &not.statement, name, found),
                StatementConfig::And(compound) | StatementConfig::Or(compound) => {
                    for child in &compound.statements {
                        walk(rule, child, name, found);
                    }
                },
                _ => {},
            }
        }

        let mut found = Vec::new();
        for rule in &self.rules {
            walk(&rule.name, &rule.statement, name, &mut found);
        }
        found
    }

    /// Validates the document and builds the runtime ACL.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure; see [`AdmissionError`].
    pub fn compile(&self) -> Result<WebAcl, AdmissionError> {
        WebAcl::from_config(self)
    }
}
