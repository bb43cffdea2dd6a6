//! Structured observability hooks for Warden execution lifecycle events.
//!
//! This module provides:
//! - Execution-scoped tracing spans via [`execution_span`]
//! - Emission functions for key lifecycle events: start, finish, violation,
//!   rejection, quarantine, restore, score changes and monitor ticks
//!
//! Events are emitted with an `event = "..."` field so they can be filtered
//! downstream. Submitted code is never logged; [`code_digest`] stands in.

use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use crate::sandbox::{FailureKind, SecurityViolation, ThreatLevel};

/// Hex characters of the SHA-256 kept in log lines.
const DIGEST_PREFIX_LEN: usize = 16;

/// Short SHA-256 digest identifying a submission in logs.
pub fn code_digest(code: &str) -> String {
    let digest = hex::encode(Sha256::digest(code.as_bytes()));
    digest[..DIGEST_PREFIX_LEN].to_string()
}

/// Span tagging everything logged for one execution.
///
/// Attach it to the execution future with `tracing::Instrument`.
pub fn execution_span(execution_id: &Uuid, environment_id: &str, policy: &str) -> tracing::Span {
    tracing::info_span!(
        "warden.execution",
        execution_id = %execution_id,
        environment_id = %environment_id,
        policy = %policy,
    )
}

/// Emit event: execution submitted to the isolation runtime.
pub fn emit_execution_started(environment_id: &str, runtime: &str, digest: &str, code_len: usize) {
    info!(
        event = "execution.started",
        environment_id = %environment_id,
        runtime = runtime,
        code_digest = %digest,
        code_len = code_len,
    );
}

/// Emit event: execution finished, successfully or not.
pub fn emit_execution_finished(
    environment_id: &str,
    success: bool,
    duration_ms: u64,
    memory_used_bytes: u64,
    failure_kind: Option<FailureKind>,
) {
    match failure_kind {
        None => info!(
            event = "execution.finished",
            environment_id = %environment_id,
            success = success,
            duration_ms = duration_ms,
            memory_used_bytes = memory_used_bytes,
        ),
        Some(kind) => info!(
            event = "execution.finished",
            environment_id = %environment_id,
            success = success,
            duration_ms = duration_ms,
            memory_used_bytes = memory_used_bytes,
            failure_kind = %kind,
        ),
    }
}

/// Emit event: a security violation intercepted during an execution.
pub fn emit_violation(environment_id: &str, violation: &SecurityViolation) {
    warn!(
        event = "execution.violation",
        environment_id = %environment_id,
        kind = ?violation.kind,
        message = %violation.message,
    );
}

/// Emit event: an execution refused before reaching the runtime.
pub fn emit_execution_rejected(environment_id: &str, reason: &dyn std::fmt::Display) {
    warn!(event = "execution.rejected", environment_id = %environment_id, reason = %reason);
}

/// Emit event: the isolation unit could not be started.
pub fn emit_environment_faulted(environment_id: &str, error: &str) {
    tracing::error!(event = "environment.faulted", environment_id = %environment_id, error = %error);
}

/// Emit event: environment moved to quarantine.
pub fn emit_quarantined(environment_id: &str, reason: &str, cancelled: usize) {
    warn!(
        event = "environment.quarantined",
        environment_id = %environment_id,
        reason = reason,
        cancelled_units = cancelled,
    );
}

/// Emit event: environment restored to service.
pub fn emit_restored(environment_id: &str, security_score: f64) {
    info!(
        event = "environment.restored",
        environment_id = %environment_id,
        security_score = security_score,
    );
}

/// Emit event: the monitor lowered an environment's security score.
pub fn emit_score_lowered(environment_id: &str, from: f64, to: f64, error_rate: f64) {
    warn!(
        event = "environment.score_lowered",
        environment_id = %environment_id,
        from = from,
        to = to,
        error_rate = error_rate,
    );
}

/// Emit event: one monitor pass completed.
pub fn emit_monitor_tick(escalations: usize, penalties: usize, threat_level: ThreatLevel, security_score: f64) {
    info!(
        event = "monitor.tick",
        escalations = escalations,
        penalties = penalties,
        threat_level = %threat_level,
        security_score = security_score,
    );
}
