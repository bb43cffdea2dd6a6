//! TOML configuration: monitor tuning, extra policies, environment set.
//!
//! ```toml
//! [monitor]
//! interval_ms = 5000
//! high_threshold = 0.3
//!
//! [[policies]]
//! name = "strict"
//! allowed_capabilities = ["console"]
//! memory_limit_bytes = 8388608
//! execution_timeout_ms = 1000
//! network_access = false
//! file_access = false
//!
//! [[environments]]
//! id = "tenant-a"
//! name = "Tenant A"
//! policy = "strict"
//! ```
//!
//! Every section is optional. Configured policies are added to the built-in
//! table (a configured name replaces the built-in of the same name); with no
//! `[[environments]]` the default set is used.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, WardenError};
use crate::sandbox::{EnvironmentSpec, MonitorConfig, PolicyRegistry, SecurityPolicy};

/// Environment variable naming the configuration file.
pub const CONFIG_ENV_VAR: &str = "WARDEN_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WardenConfig {
    pub monitor: MonitorConfig,
    pub policies: Vec<SecurityPolicy>,
    pub environments: Vec<EnvironmentSpec>,
}

impl WardenConfig {
    /// Parse and validate a configuration document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: WardenConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate the file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// `explicit` if given, else the file named by `WARDEN_CONFIG`, else the
    /// defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load(path),
            None => Self::from_env_or_default(),
        }
    }

    pub fn from_env_or_default() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) if !path.is_empty() => Self::load(&PathBuf::from(path)),
            _ => Ok(Self::default()),
        }
    }

    /// Check thresholds, policies and that every environment resolves.
    pub fn validate(&self) -> Result<()> {
        self.monitor.validate()?;
        let registry = self.registry()?;

        let mut seen = BTreeSet::new();
        for spec in self.environment_specs() {
            if spec.id.trim().is_empty() {
                return Err(WardenError::InvalidConfig(
                    "environment id must not be empty".into(),
                ));
            }
            if !seen.insert(spec.id.clone()) {
                return Err(WardenError::InvalidConfig(format!(
                    "duplicate environment id: {}",
                    spec.id
                )));
            }
            registry.resolve(&spec.policy)?;
        }
        Ok(())
    }

    /// Built-in policies with the configured ones layered on top.
    pub fn registry(&self) -> Result<PolicyRegistry> {
        Ok(PolicyRegistry::with_overrides(self.policies.clone())?)
    }

    /// Configured environments, or the default set when none are listed.
    pub fn environment_specs(&self) -> Vec<EnvironmentSpec> {
        if self.environments.is_empty() {
            EnvironmentSpec::defaults()
        } else {
            self.environments.clone()
        }
    }
}
