//! Warden Core Library
//!
//! Policy-driven execution sandbox: runs untrusted snippets inside isolation
//! units, accounts every outcome per environment and quarantines
//! environments whose error rate crosses a threshold.

pub mod config;
pub mod error;
pub mod metrics;
pub mod obs;
pub mod rpc;
pub mod sandbox;
pub mod script;
pub mod telemetry;

pub use config::{WardenConfig, CONFIG_ENV_VAR};
pub use error::{Result, WardenError};
pub use metrics::{MetricsSnapshot, METRICS};
pub use rpc::{dispatch, handle_line, serve, RpcReply, RpcRequest, RpcResponse};
pub use sandbox::{
    Capability, CancelToken, EnvironmentMonitor, EnvironmentSpec, EnvironmentStatus,
    ExecutionEnvironment, ExecutionResult, ExecutionStats, FailureKind, IsolationRuntime,
    MonitorConfig, MonitorHandle, MonitorReport, PolicyRegistry, RawExecutionOutcome,
    SandboxError, SandboxService, ScriptRuntime, SecurityMetrics, SecurityPolicy,
    SecurityViolation, ThreatLevel, ViolationKind,
};
pub use telemetry::init_tracing;

/// Crate version, reported by the binaries.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
