//! Error types for policy loading and rule evaluation.
//!
//! Configuration problems are [`AdmissionError`]s and surface when a policy
//! is compiled, never while a request is being evaluated. Problems that can
//! only appear at request time are [`EvaluationError`]s; the ACL turns every
//! one of them into a block decision.

use thiserror::Error;

/// Errors raised while loading or compiling a web ACL policy.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AdmissionError {
    /// The policy document is not valid JSON or has an unknown shape.
    #[error("invalid policy document: {0}")]
    Parse(#[from] serde_json::Error),

    /// The policy file could not be read.
    #[error("failed to read policy file {path}: {source}")]
    Io {
        /// File path.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Two rules share the same priority.
    #[error("rules {first:?} and {second:?} share priority {priority}")]
    DuplicatePriority {
        /// The shared priority.
        priority: u32,
        /// Rule declared first.
        first: String,
        /// Rule declared second.
        second: String,
    },

    /// Two rules share the same name.
    #[error("duplicate rule name {name:?}")]
    DuplicateRuleName {
        /// The repeated name.
        name: String,
    },

    /// Two IP sets share the same name.
    #[error("duplicate IP set name {name:?}")]
    DuplicateIpSet {
        /// The repeated name.
        name: String,
    },

    /// A rule references an IP set that was never declared.
    #[error("rule {rule:?} references unknown IP set {set:?}")]
    UnknownIpSet {
        /// Referencing rule.
        rule: String,
        /// Missing set name.
        set: String,
    },

    /// An IP set entry is not a valid address or CIDR range.
    #[error("IP set {set:?}: invalid address {value:?}: {reason}")]
    InvalidCidr {
        /// Owning set.
        set: String,
        /// Offending entry.
        value: String,
        /// What is wrong with it.
        reason: String,
    },

    /// An IP set entry belongs to the other address family.
    #[error("IP set {set:?} is {version} but contains {value:?}")]
    AddressVersionMismatch {
        /// Owning set.
        set: String,
        /// Declared version of the set.
        version: &'static str,
        /// Offending entry.
        value: String,
    },

    /// A byte-match statement has nothing to match.
    #[error("rule {rule:?}: byte match search string is empty")]
    EmptySearchString {
        /// Offending rule.
        rule: String,
    },

    /// A single-header field names no header.
    #[error("rule {rule:?}: header name is empty")]
    EmptyHeaderName {
        /// Offending rule.
        rule: String,
    },

    /// Two text transformations share a priority.
    #[error("rule {rule:?}: duplicate text transformation priority {priority}")]
    DuplicateTransformPriority {
        /// Offending rule.
        rule: String,
        /// The shared priority.
        priority: u32,
    },

    /// A rate-based statement has a zero limit.
    #[error("rule {rule:?}: rate limit must be at least 1")]
    ZeroRateLimit {
        /// Offending rule.
        rule: String,
    },

    /// A rate-based statement has a zero-length window.
    #[error("rule {rule:?}: evaluation window must be non-zero")]
    ZeroWindow {
        /// Offending rule.
        rule: String,
    },

    /// A `FORWARDED_IP` rate-based statement has no forwarded-IP settings.
    #[error("rule {rule:?}: FORWARDED_IP aggregation requires forwardedIpConfig")]
    MissingForwardedIpConfig {
        /// Offending rule.
        rule: String,
    },

    /// A rate-based statement appears below a rule's top level.
    #[error("rule {rule:?}: rate-based statements are only allowed as a rule's top-level statement")]
    NestedRateBased {
        /// Offending rule.
        rule: String,
    },

    /// An `and`/`or` statement has fewer than two operands.
    #[error("rule {rule:?}: {operator} statement needs at least 2 operands, got {count}")]
    TooFewOperands {
        /// Offending rule.
        rule: String,
        /// `"and"` or `"or"`.
        operator: &'static str,
        /// Number of operands supplied.
        count: usize,
    },

    /// A rate-limit table setting is out of range.
    #[error("rateLimits.{field} must be at least 1")]
    InvalidRateLimits {
        /// Offending field.
        field: &'static str,
    },
}

/// Errors that can occur while evaluating a request.
///
/// The ACL never lets these escape: any evaluation error results in a block.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum EvaluationError {
    /// An IP set provider could not answer a membership query.
    #[error("IP set {set:?} unavailable: {message}")]
    IpSetUnavailable {
        /// Set that failed.
        set: String,
        /// Provider's description of the failure.
        message: String,
    },

    /// The rate counter table is full and no expired entries could be swept.
    #[error("rate counter table full ({max} keys tracked)")]
    CounterCapacity {
        /// Configured maximum number of tracked keys.
        max: usize,
    },
}

impl EvaluationError {
    /// Creates an `IpSetUnavailable` error.
    #[must_use]
    pub fn ip_set_unavailable(set: impl Into<String>, message: impl Into<String>) -> Self {
        Self::IpSetUnavailable { set: set.into(), message: message.into() }
    }
}
