//! Decision counters for a web ACL.

use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicU64, Ordering},
};

use crate::acl::{Action, Decision, DecisionSource};

/// Lock-free counters updated on every evaluation.
#[derive(Debug)]
pub(crate) struct AdmissionMetrics {
    allowed: AtomicU64,
    blocked: AtomicU64,
    fail_closed: AtomicU64,
    /// Indexed like the ACL's rules; `None` when the rule's metrics are disabled.
    rule_matches: Vec<Option<(String, AtomicU64)>>,
}

/// Point-in-time copy of the ACL counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdmissionMetricsSnapshot {
    /// Requests allowed, by a rule or by default.
    pub allowed: u64,
    /// Requests blocked, including fail-closed blocks.
    pub blocked: u64,
    /// Requests blocked because evaluation failed.
    pub fail_closed: u64,
    /// Deciding matches per rule metric name.
    pub rule_matches: BTreeMap<String, u64>,
}

impl AdmissionMetrics {
    pub(crate) fn new(rule_metric_names: Vec<Option<String>>) -> Self {
        Self {
            allowed: AtomicU64::new(0),
            blocked: AtomicU64::new(0),
            fail_closed: AtomicU64::new(0),
            rule_matches: rule_metric_names
                .into_iter()
                .map(|name| name.map(|name| (name, AtomicU64::new(0))))
                .collect(),
        }
    }

    pub(crate) fn record(&self, decision: &Decision, rule_index: Option<usize>) {
        match decision.action {
            Action::Allow => self.allowed.fetch_add(1, Ordering::Relaxed),
            Action::Block => self.blocked.fetch_add(1, Ordering::Relaxed),
        };
        if decision.source == DecisionSource::FailClosed {
            self.fail_closed.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(Some((_, counter))) = rule_index.and_then(|idx| self.rule_matches.get(idx)) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn snapshot(&self) -> AdmissionMetricsSnapshot {
        AdmissionMetricsSnapshot {
            allowed: self.allowed.load(Ordering::Relaxed),
            blocked: self.blocked.load(Ordering::Relaxed),
            fail_closed: self.fail_closed.load(Ordering::Relaxed),
            rule_matches: self
                .rule_matches
                .iter()
                .flatten()
                .map(|(name, counter)| (name.clone(), counter.load(Ordering::Relaxed)))
                .collect(),
        }
    }
}
