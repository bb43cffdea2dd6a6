//! Error types for the sandbox module.
//!
//! Only pre-execution contract violations live here. Everything that goes
//! wrong *inside* an isolation unit is reported as data on
//! [`ExecutionResult`](super::execution::ExecutionResult).

/// Errors produced by the sandbox layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SandboxError {
    #[error("unknown policy: {0}")]
    UnknownPolicy(String),

    #[error("environment not found: {0}")]
    EnvironmentNotFound(String),

    #[error("environment {0} is quarantined")]
    EnvironmentQuarantined(String),

    #[error("environment {0} is faulted and must be restored")]
    EnvironmentFaulted(String),

    #[error("invalid sandbox configuration: {0}")]
    InvalidConfig(String),
}

impl SandboxError {
    /// Stable machine-readable code, used on the RPC surface.
    pub fn code(&self) -> &'static str {
        match self {
            SandboxError::UnknownPolicy(_) => "unknown_policy",
            SandboxError::EnvironmentNotFound(_) => "environment_not_found",
            SandboxError::EnvironmentQuarantined(_) => "environment_quarantined",
            SandboxError::EnvironmentFaulted(_) => "environment_faulted",
            SandboxError::InvalidConfig(_) => "invalid_config",
        }
    }
}

/// Result type for sandbox operations.
pub type SandboxResult<T> = std::result::Result<T, SandboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SandboxError::EnvironmentQuarantined("js-sandbox".into());
        assert_eq!(err.to_string(), "environment js-sandbox is quarantined");

        let err = SandboxError::UnknownPolicy("lenient".into());
        assert!(err.to_string().contains("lenient"));
    }

    #[test]
    fn test_codes_are_distinct() {
        let codes = [
            SandboxError::UnknownPolicy(String::new()).code(),
            SandboxError::EnvironmentNotFound(String::new()).code(),
            SandboxError::EnvironmentQuarantined(String::new()).code(),
            SandboxError::EnvironmentFaulted(String::new()).code(),
            SandboxError::InvalidConfig(String::new()).code(),
        ];
        let unique: std::collections::BTreeSet<_> = codes.iter().collect();
        assert_eq!(unique.len(), codes.len());
    }
}
