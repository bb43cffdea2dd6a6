//! Sandbox: policy-driven isolated execution with accounting and escalation.
//!
//! Untrusted snippets run inside isolation units under a named
//! [`SecurityPolicy`]. Every outcome is counted per environment, and the
//! [`EnvironmentMonitor`] quarantines environments whose error rate crosses
//! a threshold.
//!
//! # Modules
//!
//! - [`capability`]  - `Capability` names a policy can grant
//! - [`policy`]      - `SecurityPolicy`, `PolicyRegistry` with the built-in table
//! - [`execution`]   - `RawExecutionOutcome`, `ExecutionResult`, violation kinds
//! - [`runtime`]     - `IsolationRuntime` trait, `ScriptRuntime`, `CancelToken`
//! - [`accountant`]  - `ExecutionAccountant` per-environment counters
//! - [`environment`] - environment snapshots, `SecurityMetrics`
//! - [`service`]     - `SandboxService` orchestration and lifecycle
//! - [`monitor`]     - `EnvironmentMonitor` periodic escalation
//! - [`error`]       - `SandboxError` / `SandboxResult`

pub mod accountant;
pub mod capability;
pub mod environment;
pub mod error;
pub mod execution;
pub mod monitor;
pub mod policy;
pub mod runtime;
pub mod service;

pub use accountant::{ExecutionAccountant, ExecutionStats};
pub use capability::Capability;
pub use environment::{
    EnvironmentSpec, EnvironmentStatus, ExecutionEnvironment, SecurityMetrics, ThreatLevel,
};
pub use error::{SandboxError, SandboxResult};
pub use execution::{
    ExecutionFailure, ExecutionResult, FailureKind, RawExecutionOutcome, SecurityViolation,
    ViolationKind, SUCCESS_MARKER, TIMEOUT_VIOLATION,
};
pub use monitor::{Assessment, EnvironmentMonitor, MonitorConfig, MonitorHandle, MonitorReport, ScoreAdjustment};
pub use policy::{PolicyRegistry, SecurityPolicy};
pub use runtime::{CancelToken, IsolationRuntime, ScriptRuntime};
pub use service::SandboxService;
