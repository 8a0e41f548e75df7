//! Backend health observations.
//!
//! # State Transitions
//! ```text
//! Healthy → Unhealthy: consecutive failures >= unhealthy_threshold
//! Unhealthy → Healthy: consecutive successes >= healthy_threshold
//! ```
//! The streak counters live on [`Backend`](crate::load_balancer::Backend);
//! this module holds the read-mostly snapshot exposed to operators.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// Latest probe result for one `(route, backend)` target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    /// Result of the most recent probe.
    pub healthy: bool,
    pub last_check: Option<DateTime<Utc>>,
    pub response_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthStatus {
    /// Registered targets are assumed healthy until probed.
    pub fn initial() -> Self {
        Self {
            healthy: true,
            last_check: None,
            response_time_ms: 0,
            error: None,
        }
    }
}

/// Outcome of one probe.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub healthy: bool,
    pub checked_at: DateTime<Utc>,
    pub response_time: Duration,
    pub error: Option<String>,
}

impl From<&ProbeOutcome> for HealthStatus {
    fn from(outcome: &ProbeOutcome) -> Self {
        Self {
            healthy: outcome.healthy,
            last_check: Some(outcome.checked_at),
            response_time_ms: u64::try_from(outcome.response_time.as_millis()).unwrap_or(u64::MAX),
            error: outcome.error.clone(),
        }
    }
}

/// One entry of the operator-facing health listing.
#[derive(Debug, Clone, Serialize)]
pub struct TargetHealth {
    pub route: String,
    pub backend: String,
    #[serde(flatten)]
    pub status: HealthStatus,
}
