//! The web ACL: prioritized rules plus a default action.

use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::Arc,
    time::Instant,
};

use crate::{
    config::WebAclConfig,
    context::RequestContext,
    error::{AdmissionError, EvaluationError},
    ip_set::{IpSet, SharedIpSet},
    metrics::{AdmissionMetrics, AdmissionMetricsSnapshot},
    rate::RateCounter,
    statement::{Compiler, RateOutcome, Statement},
};

/// What happens to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Continue to authorization.
    Allow,
    /// Reject before any further processing.
    Block,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Allow => "allow",
            Self::Block => "block",
        })
    }
}

/// Why a decision was reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecisionSource {
    /// The named rule matched.
    Rule(String),
    /// No rule matched.
    Default,
    /// Evaluation failed and the request was blocked.
    FailClosed,
}

/// Outcome of evaluating one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Resulting action.
    pub action: Action,
    /// Where the action came from.
    pub source: DecisionSource,
}

impl Decision {
    /// Name of the deciding rule, if a rule matched.
    #[must_use]
    pub fn matched_rule(&self) -> Option<&str> {
        match &self.source {
            DecisionSource::Rule(name) => Some(name),
            DecisionSource::Default | DecisionSource::FailClosed => None,
        }
    }

    /// Returns `true` for a block.
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        self.action == Action::Block
    }
}

#[derive(Debug)]
struct Rule {
    name: String,
    priority: u32,
    action: Action,
    statement: Statement,
}

/// A compiled, immutable web ACL.
///
/// Rules are held in ascending priority. Evaluation first records the
/// request against every rate-based statement, then returns the action of
/// the first rule whose statement matches, or the default action. Any
/// evaluation error blocks the request.
///
/// `WebAcl` is `Send + Sync`; share it behind an `Arc`.
pub struct WebAcl {
    name: String,
    default_action: Action,
    rules: Vec<Rule>,
    counters: Vec<Arc<RateCounter>>,
    metrics: AdmissionMetrics,
}

impl fmt::Debug for WebAcl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebAcl")
            .field("name", &self.name)
            .field("default_action", &self.default_action)
            .field("rules", &self.rules.iter().map(|r| (&r.name, r.priority)).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl WebAcl {
    /// Compiles `config` using only the IP sets it declares.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure.
    pub fn from_config(config: &WebAclConfig) -> Result<Self, AdmissionError> {
        Self::from_config_with_providers(config, Vec::new())
    }

    /// Compiles `config`, resolving IP set references against the declared
    /// sets and `providers`. A provider replaces a declared set of the same
    /// name.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure.
    pub fn from_config_with_providers(
        config: &WebAclConfig,
        providers: impl IntoIterator<Item = SharedIpSet>,
    ) -> Result<Self, AdmissionError> {
        if config.rate_limits.max_tracked_keys == 0 {
            return Err(AdmissionError::InvalidRateLimits { field: "maxTrackedKeys" });
        }
        if config.rate_limits.shards == 0 {
            return Err(AdmissionError::InvalidRateLimits { field: "shards" });
        }
        if config.rate_limits.sweep_interval == 0 {
            return Err(AdmissionError::InvalidRateLimits { field: "sweepInterval" });
        }

        let mut ip_sets: HashMap<String, SharedIpSet> = HashMap::new();
        for set_config in &config.ip_sets {
            let set = IpSet::from_config(set_config)?;
            if ip_sets.insert(set_config.name.clone(), Arc::new(set)).is_some() {
                return Err(AdmissionError::DuplicateIpSet { name: set_config.name.clone() });
            }
        }
        for provider in providers {
            ip_sets.insert(provider.name().to_owned(), provider);
        }

        let mut ordered: Vec<_> = config.rules.iter().collect();
        ordered.sort_by_key(|rule| rule.priority);
        let mut names = HashSet::new();
        for pair in ordered.windows(2) {
            if pair[0].priority == pair[1].priority {
                return Err(AdmissionError::DuplicatePriority {
                    priority: pair[0].priority,
                    first: pair[0].name.clone(),
                    second: pair[1].name.clone(),
                });
            }
        }

        let mut compiler = Compiler {
            ip_sets: &ip_sets,
            table: config.rate_limits,
            epoch: Instant::now(),
            counters: Vec::new(),
        };
        let mut rules = Vec::with_capacity(ordered.len());
        let mut metric_names = Vec::with_capacity(ordered.len());
        for rule in ordered {
            if !names.insert(rule.name.as_str()) {
                return Err(AdmissionError::DuplicateRuleName { name: rule.name.clone() });
            }
            let statement = compiler.compile(&rule.name, &rule.statement)?;
            metric_names.push(match &rule.visibility_config {
                Some(visibility) if visibility.metrics_enabled => {
                    Some(visibility.metric_name.clone())
                },
                Some(_) => None,
                None => Some(rule.name.clone()),
            });
            rules.push(Rule {
                name: rule.name.clone(),
                priority: rule.priority,
                action: rule.action.action(),
                statement,
            });
        }
        let counters = compiler.counters;

        tracing::info!(
            acl = %config.name,
            rules = rules.len(),
            rate_statements = counters.len(),
            ip_sets = ip_sets.len(),
            "web ACL compiled"
        );

        Ok(Self {
            name: config.name.clone(),
            default_action: config.default_action.action(),
            rules,
            counters,
            metrics: AdmissionMetrics::new(metric_names),
        })
    }

    /// ACL name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Action applied when no rule matches.
    #[must_use]
    pub fn default_action(&self) -> Action {
        self.default_action
    }

    /// Rule names in evaluation order.
    pub fn rule_names(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|rule| rule.name.as_str())
    }

    /// Evaluates `ctx` at the current instant.
    pub fn evaluate(&self, ctx: &RequestContext) -> Decision {
        self.evaluate_at(ctx, Instant::now())
    }

    /// Evaluates `ctx` as if it arrived at `now`.
    #[tracing::instrument(
        name = "admission_evaluate",
        skip_all,
        fields(acl = %self.name, source_ip = %ctx.source_ip())
    )]
    pub fn evaluate_at(&self, ctx: &RequestContext, now: Instant) -> Decision {
        let (decision, rule_index) = match self.first_match(ctx, now) {
            Ok(Some(idx)) => {
                let rule = &self.rules[idx];
                let decision =
                    Decision { action: rule.action, source: DecisionSource::Rule(rule.name.clone()) };
                (decision, Some(idx))
            },
            Ok(None) => {
                (Decision { action: self.default_action, source: DecisionSource::Default }, None)
            },
            Err(error) => {
                tracing::error!(%error, "rule evaluation failed, blocking request");
                (Decision { action: Action::Block, source: DecisionSource::FailClosed }, None)
            },
        };
        self.metrics.record(&decision, rule_index);

        match (&decision.action, decision.matched_rule()) {
            (Action::Block, rule) => tracing::warn!(rule, "request blocked"),
            (Action::Allow, rule) => tracing::debug!(rule, "request allowed"),
        }
        decision
    }

    fn first_match(
        &self,
        ctx: &RequestContext,
        now: Instant,
    ) -> Result<Option<usize>, EvaluationError> {
        let mut outcomes = vec![RateOutcome::OutOfScope; self.counters.len()];
        for rule in &self.rules {
            rule.statement.record_rates(ctx, now, &mut outcomes)?;
        }
        for (idx, rule) in self.rules.iter().enumerate() {
            if rule.statement.evaluate(ctx, &outcomes)? {
                return Ok(Some(idx));
            }
        }
        Ok(None)
    }

    /// Current decision counters.
    #[must_use]
    pub fn metrics(&self) -> AdmissionMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Aggregate keys tracked across all rate statements, and the combined
    /// capacity.
    #[must_use]
    pub fn rate_table_usage(&self) -> (usize, usize) {
        self.counters.iter().fold((0, 0), |(used, cap), counter| {
            (used + counter.tracked_keys(), cap + counter.capacity())
        })
    }
}
