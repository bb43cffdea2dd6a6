//! Execution outcomes: what an isolation unit reports and what callers see.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Output marker for runs that complete without producing a value.
pub const SUCCESS_MARKER: &str = "Code executed successfully";

/// Violation message for a run that hits its deadline.
pub const TIMEOUT_VIOLATION: &str = "execution timeout exceeded";

/// Failure message for a run that hits `limit`.
pub fn timeout_message(limit: Duration) -> String {
    format!("execution exceeded the {}ms time limit", limit.as_millis())
}

/// Why a run failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ExecutionTimeout,
    MemoryLimitExceeded,
    CapabilityViolation,
    DynamicCode,
    RuntimeError,
    Cancelled,
    /// The isolation unit itself could not be started.
    InitFailure,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::ExecutionTimeout => "execution_timeout",
            FailureKind::MemoryLimitExceeded => "memory_limit_exceeded",
            FailureKind::CapabilityViolation => "capability_violation",
            FailureKind::DynamicCode => "dynamic_code",
            FailureKind::RuntimeError => "runtime_error",
            FailureKind::Cancelled => "cancelled",
            FailureKind::InitFailure => "init_failure",
        };
        f.write_str(s)
    }
}

/// Category of an intercepted security violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    CapabilityViolation,
    DynamicCode,
    ExecutionTimeout,
    MemoryLimitExceeded,
}

/// One intercepted violation, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityViolation {
    pub kind: ViolationKind,
    pub message: String,
}

impl SecurityViolation {
    pub fn new(kind: ViolationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout() -> Self {
        Self::new(ViolationKind::ExecutionTimeout, TIMEOUT_VIOLATION)
    }
}

/// Terminal failure of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionFailure {
    pub kind: FailureKind,
    pub message: String,
}

/// What an isolation unit hands back to the service.
///
/// Exactly one of `output` / `failure` is set.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawExecutionOutcome {
    pub output: Option<String>,
    pub failure: Option<ExecutionFailure>,
    pub memory_used_bytes: u64,
    pub violations: Vec<SecurityViolation>,
    pub logs: Vec<String>,
}

impl RawExecutionOutcome {
    pub fn completed(output: impl Into<String>) -> Self {
        Self {
            output: Some(output.into()),
            ..Self::default()
        }
    }

    pub fn failed(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            failure: Some(ExecutionFailure {
                kind,
                message: message.into(),
            }),
            ..Self::default()
        }
    }

    /// Deadline elapsed before the unit reported back.
    pub fn timed_out(limit: Duration) -> Self {
        let mut outcome = Self::failed(FailureKind::ExecutionTimeout, timeout_message(limit));
        outcome.violations.push(SecurityViolation::timeout());
        outcome
    }

    pub fn cancelled() -> Self {
        Self::failed(FailureKind::Cancelled, "execution cancelled")
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.failure.as_ref().map(|f| f.kind)
    }
}

/// Result of one `execute_code` call, owned by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub execution_id: Uuid,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
    /// Wall clock around the whole service call.
    pub execution_time_ms: u64,
    pub memory_used_bytes: u64,
    pub security_violations: Vec<SecurityViolation>,
    #[serde(default)]
    pub logs: Vec<String>,
}

impl ExecutionResult {
    pub fn from_outcome(execution_id: Uuid, outcome: RawExecutionOutcome, elapsed: Duration) -> Self {
        let (error, failure_kind) = match outcome.failure {
            Some(f) => (Some(f.message), Some(f.kind)),
            None => (None, None),
        };
        Self {
            execution_id,
            success: failure_kind.is_none(),
            output: if failure_kind.is_none() {
                outcome.output
            } else {
                None
            },
            error,
            failure_kind,
            execution_time_ms: elapsed.as_millis() as u64,
            memory_used_bytes: outcome.memory_used_bytes,
            security_violations: outcome.violations,
            logs: outcome.logs,
        }
    }

    pub fn has_violation(&self, kind: ViolationKind) -> bool {
        self.security_violations.iter().any(|v| v.kind == kind)
    }
}
