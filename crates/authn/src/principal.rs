//! Verified identities.

use serde_json::{Map, Value};

use crate::mode::AuthModeKind;

/// The identity a request runs as.
///
/// User-pool principals carry the token subject, groups and the full claim
/// set. API-key principals are service-level and anonymous.
#[derive(Debug, Clone, PartialEq)]
pub struct Principal {
    mode: AuthModeKind,
    subject: Option<String>,
    groups: Vec<String>,
    claims: Map<String, Value>,
}

impl Principal {
    /// Principal for a verified user-pool token.
    pub fn user(
        subject: impl Into<String>,
        groups: Vec<String>,
        claims: Map<String, Value>,
    ) -> Self {
        Self { mode: AuthModeKind::UserPool, subject: Some(subject.into()), groups, claims }
    }

    /// Anonymous service principal for a valid API key.
    #[must_use]
    pub fn api_key() -> Self {
        Self { mode: AuthModeKind::ApiKey, subject: None, groups: Vec::new(), claims: Map::new() }
    }

    /// Mode the principal authenticated under.
    #[must_use]
    pub fn mode(&self) -> AuthModeKind {
        self.mode
    }

    /// Token subject, `None` for API-key principals.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    /// Group memberships.
    #[must_use]
    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    /// All verified claims.
    #[must_use]
    pub fn claims(&self) -> &Map<String, Value> {
        &self.claims
    }

    /// One claim by name.
    #[must_use]
    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }

    /// Returns `true` for principals without a subject.
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.subject.is_none()
    }

    /// Returns `true` if the principal is in any of `groups`.
    #[must_use]
    pub fn in_any_group(&self, groups: &[String]) -> bool {
        groups.iter().any(|wanted| self.groups.contains(wanted))
    }
}
