//! # Pointgate Admission
//!
//! Request admission for the data-point gateway. A [`WebAcl`] holds rules in
//! ascending priority order; each rule pairs a statement tree with an
//! [`Action`]. The first matching rule decides, otherwise the ACL's default
//! action applies.
//!
//! ## Statements
//!
//! | Statement                 | Matches when                                          |
//! |---------------------------|-------------------------------------------------------|
//! | `rateBasedStatement`      | the aggregate key exceeded `limit` within the window  |
//! | `byteMatchStatement`      | a transformed request field satisfies the constraint  |
//! | `ipSetReferenceStatement` | the source address is inside the named set            |
//! | `notStatement`            | the inner statement does not match                    |
//! | `andStatement`            | every operand matches                                 |
//! | `orStatement`             | any operand matches                                   |
//!
//! Every rate-based statement counts every request it is in scope for, even
//! when an earlier rule already decided. Evaluation errors block the request.
//!
//! ## Quick start
//!
//! ```
//! use pointgate_admission::{Action, RequestContext, WebAclConfig};
//!
//! let acl = WebAclConfig::reference("da2-key", vec!["10.0.0.0/8".into()])
//!     .compile()
//!     .unwrap();
//!
//! let inside = RequestContext::new("10.1.2.3".parse().unwrap()).with_header("x-api-key", "da2-key");
//! assert_eq!(acl.evaluate(&inside).action, Action::Allow);
//!
//! let outside = RequestContext::new("192.0.2.9".parse().unwrap()).with_header("x-api-key", "da2-key");
//! assert_eq!(acl.evaluate(&outside).matched_rule(), Some("RestrictAPIKey"));
//! ```

#![deny(unsafe_code)]

pub mod acl;
pub mod config;
pub mod context;
pub mod error;
pub mod ip_set;
mod metrics;
pub mod rate;
mod statement;
pub mod transform;

pub use acl::{Action, Decision, DecisionSource, WebAcl};
pub use config::{
    ActionConfig, AggregateKeyType, ByteMatchConfig, DEFAULT_EVALUATION_WINDOW, Empty,
    FallbackBehavior, FieldToMatch, ForwardedIpConfig, PositionalConstraint, RateBasedConfig,
    REFERENCE_ALLOW_LIST, RuleConfig, StatementConfig, VisibilityConfig, WebAclConfig,
};
pub use context::RequestContext;
pub use error::{AdmissionError, EvaluationError};
pub use ip_set::{Cidr, IpAddressVersion, IpSet, IpSetConfig, IpSetProvider, SharedIpSet};
pub use metrics::AdmissionMetricsSnapshot;
pub use rate::{RateCounter, RateTableConfig, WindowMode};
pub use transform::{TextTransformation, TransformType};
