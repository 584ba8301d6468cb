//! Compiled statement trees.
//!
//! Evaluation runs in two passes over every rule. [`Statement::record_rates`]
//! visits each rate-based node and bumps its counter, so rate state reflects
//! all traffic no matter which rule ends up deciding. [`Statement::evaluate`]
//! then walks the tree with the recorded counts.

use std::{collections::HashMap, net::IpAddr, sync::Arc, time::Instant};

use crate::{
    config::{
        AggregateKeyType, ByteMatchConfig, FallbackBehavior, FieldToMatch, PositionalConstraint,
        RateBasedConfig, StatementConfig,
    },
    context::RequestContext,
    error::{AdmissionError, EvaluationError},
    ip_set::SharedIpSet,
    rate::{RateCounter, RateTableConfig},
    transform::TransformChain,
};

/// Per-evaluation result of one rate-based node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RateOutcome {
    /// The scope-down statement excluded this request; nothing was counted.
    OutOfScope,
    /// Requests in the window, this one included.
    Counted(u64),
    /// The aggregate key could not be derived; the configured fallback applies.
    Fallback(bool),
}

#[derive(Debug)]
enum AggregateKey {
    SourceIp,
    ForwardedIp { header: String, fallback_match: bool },
}

#[derive(Debug)]
pub(crate) struct RateBasedStatement {
    slot: usize,
    counter: Arc<RateCounter>,
    aggregate: AggregateKey,
    scope_down: Option<Box<Statement>>,
}

#[derive(Debug)]
enum Field {
    Header(String),
    UriPath,
    QueryString,
    Method,
}

#[derive(Debug)]
pub(crate) struct ByteMatchStatement {
    field: Field,
    constraint: PositionalConstraint,
    search: String,
    transforms: TransformChain,
}

/// A validated statement tree.
#[derive(Debug)]
pub(crate) enum Statement {
    RateBased(RateBasedStatement),
    ByteMatch(ByteMatchStatement),
    IpSetReference(SharedIpSet),
    Not(Box<Statement>),
    And(Vec<Statement>),
    Or(Vec<Statement>),
}

impl Statement {
    /// Records this request if the rule is rate-based. Rate-based nodes
    /// only occur at a rule's top level.
    pub(crate) fn record_rates(
        &self,
        ctx: &RequestContext,
        now: Instant,
        outcomes: &mut [RateOutcome],
    ) -> Result<(), EvaluationError> {
        if let Self::RateBased(rate) = self {
            outcomes[rate.slot] = rate.record(ctx, now)?;
        }
        Ok(())
    }

    /// Evaluates the tree. `And` and `Or` short-circuit.
    pub(crate) fn evaluate(
        &self,
        ctx: &RequestContext,
        outcomes: &[RateOutcome],
    ) -> Result<bool, EvaluationError> {
        match self {
            Self::RateBased(rate) => Ok(match outcomes[rate.slot] {
                RateOutcome::OutOfScope => false,
                RateOutcome::Counted(count) => count > rate.counter.limit(),
                RateOutcome::Fallback(matched) => matched,
            }),
            Self::ByteMatch(byte_match) => Ok(byte_match.matches(ctx)),
            Self::IpSetReference(set) => set.contains(ctx.source_ip()),
            Self::Not(inner) => Ok(!inner.evaluate(ctx, outcomes)?),
            Self::And(children) => {
                for child in children {
                    if !child.evaluate(ctx, outcomes)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            },
            Self::Or(children) => {
                for child in children {
                    if child.evaluate(ctx, outcomes)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            },
        }
    }
}

impl RateBasedStatement {
    fn record(&self, ctx: &RequestContext, now: Instant) -> Result<RateOutcome, EvaluationError> {
        if let Some(scope) = &self.scope_down
            && !scope.evaluate(ctx, &[])?
        {
            return Ok(RateOutcome::OutOfScope);
        }

        let key = match &self.aggregate {
            AggregateKey::SourceIp => ctx.source_ip().to_string(),
            AggregateKey::ForwardedIp { header, fallback_match } => {
                match ctx.header(header).and_then(first_forwarded_ip) {
                    Some(ip) => ip.to_string(),
                    None => return Ok(RateOutcome::Fallback(*fallback_match)),
                }
            },
        };
        Ok(RateOutcome::Counted(self.counter.record_at(&key, now)?))
    }
}

fn first_forwarded_ip(value: &str) -> Option<IpAddr> {
    value.split(',').next()?.trim().parse::<IpAddr>().ok().map(|ip| ip.to_canonical())
}

impl ByteMatchStatement {
    pub(crate) fn compile(rule: &str, config: &ByteMatchConfig) -> Result<Self, AdmissionError> {
        let field = match &config.field_to_match {
            FieldToMatch::SingleHeader(header) => {
                if header.name.trim().is_empty() {
                    return Err(AdmissionError::EmptyHeaderName { rule: rule.to_owned() });
                }
                Field::Header(header.name.to_ascii_lowercase())
            },
            FieldToMatch::UriPath(_) => Field::UriPath,
            FieldToMatch::QueryString(_) => Field::QueryString,
            FieldToMatch::Method(_) => Field::Method,
        };
        let transforms = TransformChain::new(&config.text_transformations).map_err(|priority| {
            AdmissionError::DuplicateTransformPriority { rule: rule.to_owned(), priority }
        })?;
        let search = transforms.apply(&config.search_string).into_owned();
        if search.is_empty() {
            return Err(AdmissionError::EmptySearchString { rule: rule.to_owned() });
        }
        Ok(Self { field, constraint: config.positional_constraint, search, transforms })
    }

    fn matches(&self, ctx: &RequestContext) -> bool {
        let raw = match &self.field {
            Field::Header(name) => match ctx.header(name) {
                Some(value) => value,
                None => return false,
            },
            Field::UriPath => ctx.uri_path(),
            Field::QueryString => ctx.query_string(),
            Field::Method => ctx.method(),
        };
        self.matches_value(raw)
    }

    /// Matches an already extracted field value.
    pub(crate) fn matches_value(&self, raw: &str) -> bool {
        let value = self.transforms.apply(raw);
        let search = self.search.as_str();
        match self.constraint {
            PositionalConstraint::Exactly => value == search,
            PositionalConstraint::StartsWith => value.starts_with(search),
            PositionalConstraint::EndsWith => value.ends_with(search),
            PositionalConstraint::Contains => value.contains(search),
            PositionalConstraint::ContainsWord => contains_word(&value, search),
        }
    }
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn contains_word(haystack: &str, word: &str) -> bool {
    let bytes = haystack.as_bytes();
    haystack.match_indices(word).any(|(start, found)| {
        let end = start + found.len();
        let left_ok = start == 0 || !is_word_byte(bytes[start - 1]);
        let right_ok = end == bytes.len() || !is_word_byte(bytes[end]);
        left_ok && right_ok
    })
}

/// Builds statements for one rule, assigning rate slots across the ACL.
pub(crate) struct Compiler<'a> {
    pub(crate) ip_sets: &'a HashMap<String, SharedIpSet>,
    pub(crate) table: RateTableConfig,
    pub(crate) epoch: Instant,
    pub(crate) counters: Vec<Arc<RateCounter>>,
}

impl Compiler<'_> {
    pub(crate) fn compile(
        &mut self,
        rule: &str,
        config: &StatementConfig,
    ) -> Result<Statement, AdmissionError> {
        match config {
            StatementConfig::RateBased(rate) => self.compile_rate(rule, rate),
            other => self.compile_node(rule, other),
        }
    }

    /// Compiles a node below the rule's top level, where rate-based
    /// statements are not allowed.
    fn compile_node(
        &mut self,
        rule: &str,
        config: &StatementConfig,
    ) -> Result<Statement, AdmissionError> {
        match config {
            StatementConfig::RateBased(_) => {
                Err(AdmissionError::NestedRateBased { rule: rule.to_owned() })
            },
            StatementConfig::ByteMatch(byte_match) => {
                Ok(Statement::ByteMatch(ByteMatchStatement::compile(rule, byte_match)?))
            },
            StatementConfig::IpSetReference(reference) => {
                match self.ip_sets.get(&reference.name) {
                    Some(set) => Ok(Statement::IpSetReference(Arc::clone(set))),
                    None => Err(AdmissionError::UnknownIpSet {
                        rule: rule.to_owned(),
                        set: reference.name.clone(),
                    }),
                }
            },
            StatementConfig::Not(not) => {
                Ok(Statement::Not(Box::new(self.compile_node(rule, &not.statement)?)))
            },
            StatementConfig::And(compound) | StatementConfig::Or(compound) => {
                let operator = if matches!(config, StatementConfig::And(_)) { "and" } else { "or" };
                if compound.statements.len() < 2 {
                    return Err(AdmissionError::TooFewOperands {
                        rule: rule.to_owned(),
                        operator,
                        count: compound.statements.len(),
                    });
                }
                let children = compound
                    .statements
                    .iter()
                    .map(|child| self.compile_node(rule, child))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(if operator == "and" { Statement::And(children) } else { Statement::Or(children) })
            },
        }
    }

    fn compile_rate(
        &mut self,
        rule: &str,
        config: &RateBasedConfig,
    ) -> Result<Statement, AdmissionError> {
        if config.limit == 0 {
            return Err(AdmissionError::ZeroRateLimit { rule: rule.to_owned() });
        }
        if config.evaluation_window.is_zero() {
            return Err(AdmissionError::ZeroWindow { rule: rule.to_owned() });
        }
        let aggregate = match config.aggregate_key_type {
            AggregateKeyType::Ip => AggregateKey::SourceIp,
            AggregateKeyType::ForwardedIp => {
                let Some(forwarded) = &config.forwarded_ip_config else {
                    return Err(AdmissionError::MissingForwardedIpConfig { rule: rule.to_owned() });
                };
                if forwarded.header_name.trim().is_empty() {
                    return Err(AdmissionError::EmptyHeaderName { rule: rule.to_owned() });
                }
                AggregateKey::ForwardedIp {
                    header: forwarded.header_name.to_ascii_lowercase(),
                    fallback_match: forwarded.fallback_behavior == FallbackBehavior::Match,
                }
            },
        };
        let scope_down = match &config.scope_down_statement {
            Some(scope) => Some(Box::new(self.compile_node(rule, scope)?)),
            None => None,
        };
        let counter = Arc::new(RateCounter::with_epoch(
            config.limit,
            config.evaluation_window,
            config.window_mode,
            self.table,
            self.epoch,
        ));
        let slot = self.counters.len();
        self.counters.push(Arc::clone(&counter));
        Ok(Statement::RateBased(RateBasedStatement { slot, counter, aggregate, scope_down }))
    }
}
