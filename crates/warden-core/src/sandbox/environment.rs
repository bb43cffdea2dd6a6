//! Execution environments and the derived global security metrics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upper bound of a security score.
pub const MAX_SECURITY_SCORE: f64 = 100.0;

/// Lifecycle status of an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentStatus {
    /// At least one execution is in flight.
    Active,
    Idle,
    /// Rejects executions until restored.
    Quarantined,
    /// The isolation unit could not be started; rejects executions until
    /// restored.
    Error,
}

impl EnvironmentStatus {
    /// Whether new executions are rejected.
    pub fn is_blocked(self) -> bool {
        matches!(self, EnvironmentStatus::Quarantined | EnvironmentStatus::Error)
    }
}

impl std::fmt::Display for EnvironmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EnvironmentStatus::Active => "active",
            EnvironmentStatus::Idle => "idle",
            EnvironmentStatus::Quarantined => "quarantined",
            EnvironmentStatus::Error => "error",
        };
        f.pad(s)
    }
}

/// Static description of an environment, from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSpec {
    pub id: String,
    pub name: String,
    pub policy: String,
}

impl EnvironmentSpec {
    pub fn new(id: impl Into<String>, name: impl Into<String>, policy: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            policy: policy.into(),
        }
    }

    /// The environment set used when configuration names none.
    pub fn defaults() -> Vec<EnvironmentSpec> {
        vec![
            EnvironmentSpec::new("js-sandbox", "JavaScript Sandbox", "sandbox"),
            EnvironmentSpec::new("secure-isolate", "Secure Isolate", "isolated"),
            EnvironmentSpec::new("debug-monitor", "Debug Monitor", "monitored"),
        ]
    }
}

/// Point-in-time view of an environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionEnvironment {
    pub id: String,
    pub name: String,
    pub policy: String,
    pub status: EnvironmentStatus,
    /// Last run's memory use as a share of the policy limit, 0 to 100.
    pub memory_usage_pct: f64,
    /// Last run's wall time as a share of the policy timeout, 0 to 100.
    pub cpu_usage_pct: f64,
    pub security_score: f64,
    pub execution_count: u64,
    pub error_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<DateTime<Utc>>,
}

/// Global threat classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatLevel {
    Low,
    Medium,
    High,
}

impl ThreatLevel {
    /// High above one quarantined environment, Medium at exactly one.
    pub fn from_quarantined(quarantined: usize) -> Self {
        match quarantined {
            0 => ThreatLevel::Low,
            1 => ThreatLevel::Medium,
            _ => ThreatLevel::High,
        }
    }
}

impl std::fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ThreatLevel::Low => "low",
            ThreatLevel::Medium => "medium",
            ThreatLevel::High => "high",
        };
        f.pad(s)
    }
}

/// Aggregate security posture across all environments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityMetrics {
    pub threat_level: ThreatLevel,
    pub active_threats: u64,
    pub quarantined_processes: u64,
    pub security_score: f64,
    pub computed_at: DateTime<Utc>,
}

impl SecurityMetrics {
    pub fn compute(environments: &[ExecutionEnvironment]) -> Self {
        let quarantined = environments
            .iter()
            .filter(|e| e.status == EnvironmentStatus::Quarantined)
            .count();
        let security_score = if environments.is_empty() {
            MAX_SECURITY_SCORE
        } else {
            environments.iter().map(|e| e.security_score).sum::<f64>() / environments.len() as f64
        };
        Self {
            threat_level: ThreatLevel::from_quarantined(quarantined),
            active_threats: quarantined as u64,
            quarantined_processes: quarantined as u64,
            security_score,
            computed_at: Utc::now(),
        }
    }
}

impl Default for SecurityMetrics {
    fn default() -> Self {
        Self::compute(&[])
    }
}

/// Apply a penalty that stops at `floor` and never lifts a score already
/// below it.
pub fn lower_score(score: f64, penalty: f64, floor: f64) -> f64 {
    if score <= floor {
        score
    } else {
        (score - penalty).max(floor)
    }
}
