//! Security policies and the registry that resolves them by name.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::capability::Capability;
use super::error::{SandboxError, SandboxResult};

const MB: u64 = 1024 * 1024;

/// Limits and grants applied to every execution under one policy.
///
/// Policies are immutable once loaded; the registry hands them out as
/// `Arc<SecurityPolicy>`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SecurityPolicy {
    pub name: String,
    /// Capability names the isolation unit exposes.
    pub allowed_capabilities: BTreeSet<Capability>,
    pub memory_limit_bytes: u64,
    pub execution_timeout_ms: u64,
    pub network_access: bool,
    pub file_access: bool,
    /// Security score an environment returns to on `restore`.
    #[serde(default = "default_baseline_score")]
    pub baseline_score: f64,
}

fn default_baseline_score() -> f64 {
    95.0
}

impl SecurityPolicy {
    pub fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.execution_timeout_ms)
    }

    /// Whether code under this policy may reference `capability`.
    ///
    /// I/O capabilities additionally need their policy flag.
    pub fn permits(&self, capability: &Capability) -> bool {
        if !self.allowed_capabilities.contains(capability) {
            return false;
        }
        if capability.requires_network() && !self.network_access {
            return false;
        }
        if capability.requires_files() && !self.file_access {
            return false;
        }
        true
    }

    /// Most restrictive built-in: console and Math only, 25 MB, 3 s.
    pub fn isolated() -> Self {
        Self {
            name: "isolated".into(),
            allowed_capabilities: [Capability::Console, Capability::Math].into(),
            memory_limit_bytes: 25 * MB,
            execution_timeout_ms: 3_000,
            network_access: false,
            file_access: false,
            baseline_score: 98.0,
        }
    }

    /// Default built-in for general snippets.
    pub fn sandbox() -> Self {
        Self {
            name: "sandbox".into(),
            allowed_capabilities: [
                Capability::Console,
                Capability::Math,
                Capability::Json,
                Capability::Date,
            ]
            .into(),
            memory_limit_bytes: 50 * MB,
            execution_timeout_ms: 5_000,
            network_access: false,
            file_access: false,
            baseline_score: 95.0,
        }
    }

    /// Most permissive built-in; still capability-restricted.
    pub fn monitored() -> Self {
        Self {
            name: "monitored".into(),
            allowed_capabilities: [
                Capability::Console,
                Capability::Math,
                Capability::Json,
                Capability::Date,
                Capability::Fetch,
            ]
            .into(),
            memory_limit_bytes: 100 * MB,
            execution_timeout_ms: 10_000,
            network_access: true,
            file_access: false,
            baseline_score: 90.0,
        }
    }

    fn validate(&self) -> SandboxResult<()> {
        if self.name.trim().is_empty() {
            return Err(SandboxError::InvalidConfig(
                "policy name must not be empty".into(),
            ));
        }
        if self.memory_limit_bytes == 0 {
            return Err(SandboxError::InvalidConfig(format!(
                "policy {}: memory_limit_bytes must be positive",
                self.name
            )));
        }
        if self.execution_timeout_ms == 0 {
            return Err(SandboxError::InvalidConfig(format!(
                "policy {}: execution_timeout_ms must be positive",
                self.name
            )));
        }
        if !(0.0..=100.0).contains(&self.baseline_score) {
            return Err(SandboxError::InvalidConfig(format!(
                "policy {}: baseline_score must be within 0..=100",
                self.name
            )));
        }
        Ok(())
    }
}

/// Immutable name → policy table. Cheap to clone and safe to share.
#[derive(Debug, Clone)]
pub struct PolicyRegistry {
    policies: BTreeMap<String, Arc<SecurityPolicy>>,
}

impl PolicyRegistry {
    /// The built-in `isolated`, `sandbox` and `monitored` policies.
    pub fn builtin() -> Self {
        let policies = [
            SecurityPolicy::isolated(),
            SecurityPolicy::sandbox(),
            SecurityPolicy::monitored(),
        ]
        .into_iter()
        .map(|p| (p.name.clone(), Arc::new(p)))
        .collect();
        Self { policies }
    }

    /// Built-ins overlaid with `overrides`; a same-named override replaces
    /// the built-in. Duplicate names within `overrides` are rejected.
    pub fn with_overrides(overrides: Vec<SecurityPolicy>) -> SandboxResult<Self> {
        let mut registry = Self::builtin();
        let mut seen = BTreeSet::new();
        for policy in overrides {
            policy.validate()?;
            if !seen.insert(policy.name.clone()) {
                return Err(SandboxError::InvalidConfig(format!(
                    "duplicate policy: {}",
                    policy.name
                )));
            }
            registry
                .policies
                .insert(policy.name.clone(), Arc::new(policy));
        }
        Ok(registry)
    }

    /// Resolve a policy by name.
    pub fn resolve(&self, name: &str) -> SandboxResult<Arc<SecurityPolicy>> {
        self.policies
            .get(name)
            .cloned()
            .ok_or_else(|| SandboxError::UnknownPolicy(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.policies.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SecurityPolicy> {
        self.policies.values().map(Arc::as_ref)
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
