//! Cache Health Reporting
//!
//! Result types for [`TieredCache::health_check`](super::manager::TieredCache::health_check).

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// Every probe succeeded within the threshold
    Healthy,
    /// Every probe succeeded but at least one was slow
    Degraded,
    /// At least one probe failed
    Unhealthy,
}

impl HealthStatus {
    /// Check if status is healthy or degraded (operational)
    pub fn is_operational(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
    }

    /// Check if status is healthy
    pub fn is_healthy(&self) -> bool {
        *self == HealthStatus::Healthy
    }

    fn severity(&self) -> u8 {
        match self {
            HealthStatus::Healthy => 0,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 2,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "Healthy"),
            HealthStatus::Degraded => write!(f, "Degraded"),
            HealthStatus::Unhealthy => write!(f, "Unhealthy"),
        }
    }
}

/// Result of probing one tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentHealth {
    /// Tier name
    pub name: String,
    pub status: HealthStatus,
    /// Failure or slowness detail
    pub message: Option<String>,
    /// Probe duration
    pub duration_ms: u64,
}

impl ComponentHealth {
    pub fn healthy(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Healthy,
            message: None,
            duration_ms: 0,
        }
    }

    pub fn degraded(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Degraded,
            message: Some(message.into()),
            duration_ms: 0,
        }
    }

    pub fn unhealthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
            duration_ms: 0,
        }
    }

    /// Classify a successful probe by its duration
    pub fn timed(name: impl Into<String>, elapsed: Duration, slow_threshold: Duration) -> Self {
        let name = name.into();
        let result = if elapsed > slow_threshold {
            Self::degraded(
                name,
                format!(
                    "probe took {}ms (threshold {}ms)",
                    elapsed.as_millis(),
                    slow_threshold.as_millis()
                ),
            )
        } else {
            Self::healthy(name)
        };
        result.with_duration(elapsed)
    }

    /// Set duration
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = duration.as_millis() as u64;
        self
    }
}

/// Aggregate health of the cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Worst component status
    pub status: HealthStatus,
    pub components: Vec<ComponentHealth>,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    pub fn new(components: Vec<ComponentHealth>) -> Self {
        let status = components
            .iter()
            .map(|c| c.status)
            .max_by_key(HealthStatus::severity)
            .unwrap_or(HealthStatus::Healthy);

        Self {
            status,
            components,
            checked_at: Utc::now(),
        }
    }

    /// Look up one component by name
    pub fn component(&self, name: &str) -> Option<&ComponentHealth> {
        self.components.iter().find(|c| c.name == name)
    }
}
