//! Health check types for storage tiers.
//!
//! [`StorageBackend::health_check`](crate::StorageBackend::health_check)
//! returns a [`HealthStatus`] for the requested [`HealthProbe`]. The service
//! wiring uses it to answer "is the durable store reachable" and "is the cache
//! reachable" independently, since a dead cache degrades latency but not
//! correctness.

use std::{fmt, time::Duration};

/// The type of health probe to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HealthProbe {
    /// Process is alive and the backend handle is not deadlocked.
    Liveness,
    /// Backend can serve traffic right now.
    Readiness,
}

impl fmt::Display for HealthProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Liveness => write!(f, "liveness"),
            Self::Readiness => write!(f, "readiness"),
        }
    }
}

/// Result of a health probe against one storage tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// The tier answered the probe.
    Healthy {
        /// Backend identifier (e.g. `"memory"`).
        backend: String,
        /// How long the probe took.
        latency: Duration,
    },
    /// The tier could not answer the probe.
    Unhealthy {
        /// Backend identifier (e.g. `"memory"`).
        backend: String,
        /// Why the probe failed.
        reason: String,
    },
}

impl HealthStatus {
    /// Creates a `Healthy` status.
    #[must_use]
    pub fn healthy(backend: impl Into<String>, latency: Duration) -> Self {
        Self::Healthy { backend: backend.into(), latency }
    }

    /// Creates an `Unhealthy` status with a reason.
    #[must_use]
    pub fn unhealthy(backend: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unhealthy { backend: backend.into(), reason: reason.into() }
    }

    /// Returns `true` if the probe passed.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy { .. })
    }

    /// Returns the failure reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Healthy { .. } => None,
            Self::Unhealthy { reason, .. } => Some(reason),
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy { backend, latency } => {
                write!(f, "{backend}: healthy ({}ms)", latency.as_millis())
            },
            Self::Unhealthy { backend, reason } => write!(f, "{backend}: unhealthy: {reason}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_healthy_status() {
        let status = HealthStatus::healthy("memory", Duration::from_millis(2));

        assert!(status.is_healthy());
        assert!(status.reason().is_none());
        assert_eq!(status.to_string(), "memory: healthy (2ms)");
    }

    #[test]
    fn test_unhealthy_status() {
        let status = HealthStatus::unhealthy("cache", "connection refused");

        assert!(!status.is_healthy());
        assert_eq!(status.reason(), Some("connection refused"));
        assert_eq!(status.to_string(), "cache: unhealthy: connection refused");
    }

    #[test]
    fn test_health_probe_display() {
        assert_eq!(HealthProbe::Liveness.to_string(), "liveness");
        assert_eq!(HealthProbe::Readiness.to_string(), "readiness");
    }
}
