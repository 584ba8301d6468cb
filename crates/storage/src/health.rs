//! Health reporting for storage backends.
//!
//! [`StorageBackend::health_check`](crate::StorageBackend::health_check) takes a
//! [`HealthProbe`] and answers with a [`HealthStatus`]. The gateway folds the
//! store's answer into its own status with [`HealthStatus::merge`].

use std::{collections::HashMap, fmt, time::Duration};

/// Which question a health check answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HealthProbe {
    /// Process is alive and not deadlocked.
    Liveness,
    /// Backend can serve reads and writes.
    Readiness,
    /// Initial warm-up has completed.
    Startup,
}

impl fmt::Display for HealthProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Liveness => "liveness",
            Self::Readiness => "readiness",
            Self::Startup => "startup",
        })
    }
}

/// Outcome of a health check.
///
/// `Degraded` still serves traffic; `Unhealthy` does not. Both carry a reason.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use pointgate_storage::health::{HealthMetadata, HealthStatus};
///
/// let status = HealthStatus::healthy(HealthMetadata::new(Duration::from_millis(2), "memory"));
/// assert!(status.is_healthy());
/// ```
#[derive(Debug, Clone)]
pub enum HealthStatus {
    /// Fully operational.
    Healthy(HealthMetadata),
    /// Operational with reduced capability.
    Degraded(HealthMetadata, String),
    /// Cannot serve traffic.
    Unhealthy(HealthMetadata, String),
}

impl HealthStatus {
    /// Creates a `Healthy` status.
    #[must_use]
    pub fn healthy(metadata: HealthMetadata) -> Self {
        Self::Healthy(metadata)
    }

    /// Creates a `Degraded` status with a reason.
    #[must_use]
    pub fn degraded(metadata: HealthMetadata, reason: impl Into<String>) -> Self {
        Self::Degraded(metadata, reason.into())
    }

    /// Creates an `Unhealthy` status with a reason.
    #[must_use]
    pub fn unhealthy(metadata: HealthMetadata, reason: impl Into<String>) -> Self {
        Self::Unhealthy(metadata, reason.into())
    }

    /// Returns `true` if fully healthy.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy(_))
    }

    /// Returns `true` if degraded.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded(..))
    }

    /// Returns `true` if unhealthy.
    #[must_use]
    pub fn is_unhealthy(&self) -> bool {
        matches!(self, Self::Unhealthy(..))
    }

    /// Returns the metadata attached to this status.
    #[must_use]
    pub fn metadata(&self) -> &HealthMetadata {
        match self {
            Self::Healthy(m) | Self::Degraded(m, _) | Self::Unhealthy(m, _) => m,
        }
    }

    /// Returns the degradation or failure reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Healthy(_) => None,
            Self::Degraded(_, reason) | Self::Unhealthy(_, reason) => Some(reason),
        }
    }

    fn severity(&self) -> u8 {
        match self {
            Self::Healthy(_) => 0,
            Self::Degraded(..) => 1,
            Self::Unhealthy(..) => 2,
        }
    }

    /// Combines two statuses, keeping the more severe one.
    ///
    /// Ties keep `self`. Check durations are summed and the other status'
    /// details are copied in under a `"<backend>.<key>"` prefix.
    #[must_use]
    pub fn merge(self, other: HealthStatus) -> HealthStatus {
        let (mut winner, loser) =
            if other.severity() > self.severity() { (other, self) } else { (self, other) };
        let extra = loser.metadata().clone();
        let meta = match &mut winner {
            Self::Healthy(m) | Self::Degraded(m, _) | Self::Unhealthy(m, _) => m,
        };
        meta.check_duration += extra.check_duration;
        for (key, value) in extra.details {
            meta.details.insert(format!("{}.{key}", extra.backend), value);
        }
        winner
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ms = self.metadata().check_duration.as_millis();
        match self {
            Self::Healthy(_) => write!(f, "healthy ({ms}ms)"),
            Self::Degraded(_, reason) => write!(f, "degraded: {reason} ({ms}ms)"),
            Self::Unhealthy(_, reason) => write!(f, "unhealthy: {reason} ({ms}ms)"),
        }
    }
}

/// Timing and detail information attached to a [`HealthStatus`].
#[derive(Debug, Clone)]
pub struct HealthMetadata {
    /// How long the check took.
    pub check_duration: Duration,
    /// Component identifier, e.g. `"memory"` or `"gateway"`.
    pub backend: String,
    /// Component-specific details such as `entry_count`.
    pub details: HashMap<String, String>,
}

impl HealthMetadata {
    /// Creates metadata with no details.
    #[must_use]
    pub fn new(check_duration: Duration, backend: impl Into<String>) -> Self {
        Self { check_duration, backend: backend.into(), details: HashMap::new() }
    }

    /// Adds a detail entry.
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}
