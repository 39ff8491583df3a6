//! Health reporting types.
//!
//! A failed substrate probe makes the relay *degraded*, not unhealthy: the
//! process is still up and answers every request deterministically, it just
//! cannot reach its workers.

use serde::Serialize;

/// Reported health of the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// The substrate answered its probe
    Healthy,
    /// The process is up but the substrate is unreachable
    Degraded,
}

impl HealthStatus {
    /// `true` for [`HealthStatus::Healthy`].
    #[must_use]
    pub const fn is_healthy(self) -> bool {
        matches!(self, Self::Healthy)
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
        })
    }
}

/// Outcome of probing one dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    /// Probed dependency
    pub component: String,
    /// Resulting status
    pub status: HealthStatus,
    /// Failure detail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HealthCheck {
    /// Reachable is healthy, unreachable is degraded.
    #[must_use]
    pub fn from_probe(component: impl Into<String>, reachable: bool) -> Self {
        let (status, message) = if reachable {
            (HealthStatus::Healthy, None)
        } else {
            (HealthStatus::Degraded, Some("probe failed".to_string()))
        };
        Self {
            component: component.into(),
            status,
            message,
        }
    }

    /// Whether the probed dependency answered.
    #[must_use]
    pub const fn is_up(&self) -> bool {
        self.status.is_healthy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_result_maps_to_status() {
        let up = HealthCheck::from_probe("agent_service", true);
        assert!(up.is_up());
        assert_eq!(up.status.to_string(), "healthy");
        assert_eq!(up.message, None);

        let down = HealthCheck::from_probe("agent_service", false);
        assert!(!down.is_up());
        assert_eq!(down.status.to_string(), "degraded");
        assert_eq!(down.message.as_deref(), Some("probe failed"));
    }
}
