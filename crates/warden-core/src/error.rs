//! Crate-level error taxonomy for Warden.

use crate::sandbox::SandboxError;

/// Warden errors.
#[derive(Debug, thiserror::Error)]
pub enum WardenError {
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("request task failed: {0}")]
    Task(String),
}

impl WardenError {
    /// Stable machine-readable code, shared with [`SandboxError::code`].
    pub fn code(&self) -> &'static str {
        match self {
            WardenError::Sandbox(e) => e.code(),
            WardenError::InvalidConfig(_) => "invalid_config",
            WardenError::Toml(_) => "invalid_config",
            WardenError::Serialization(_) => "invalid_request",
            WardenError::Io(_) => "io",
            WardenError::Task(_) => "internal",
        }
    }
}

/// Result type for Warden operations.
pub type Result<T> = std::result::Result<T, WardenError>;
