//! Sandbox service: environment lifecycle plus execution orchestration.
//!
//! Environment state sits behind a `tokio::sync::RwLock`. The lock is never
//! held while code runs; `execute_code` takes it once to admit the
//! submission and once to record the outcome. When both locks are needed
//! the environment lock is taken before the accountant's.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, Instrument};
use uuid::Uuid;

use super::accountant::{ExecutionAccountant, ExecutionStats};
use super::environment::{
    lower_score, EnvironmentSpec, EnvironmentStatus, ExecutionEnvironment, SecurityMetrics,
};
use super::error::{SandboxError, SandboxResult};
use super::execution::{ExecutionResult, FailureKind};
use super::policy::{PolicyRegistry, SecurityPolicy};
use super::runtime::{CancelToken, IsolationRuntime, ScriptRuntime};
use crate::config::WardenConfig;
use crate::metrics::METRICS;
use crate::obs;

/// Mutable per-environment state.
#[derive(Debug)]
struct EnvironmentSlot {
    spec: EnvironmentSpec,
    policy: Arc<SecurityPolicy>,
    status: EnvironmentStatus,
    memory_usage_pct: f64,
    cpu_usage_pct: f64,
    security_score: f64,
    last_activity: Option<DateTime<Utc>>,
    in_flight: HashMap<Uuid, CancelToken>,
    // Bumped by restore; runs started under an older generation are not
    // counted.
    generation: u64,
}

impl EnvironmentSlot {
    fn new(spec: EnvironmentSpec, policy: Arc<SecurityPolicy>) -> Self {
        Self {
            security_score: policy.baseline_score,
            spec,
            policy,
            status: EnvironmentStatus::Idle,
            memory_usage_pct: 0.0,
            cpu_usage_pct: 0.0,
            last_activity: None,
            in_flight: HashMap::new(),
            generation: 0,
        }
    }

    fn snapshot(&self, stats: ExecutionStats) -> ExecutionEnvironment {
        ExecutionEnvironment {
            id: self.spec.id.clone(),
            name: self.spec.name.clone(),
            policy: self.spec.policy.clone(),
            status: self.status,
            memory_usage_pct: self.memory_usage_pct,
            cpu_usage_pct: self.cpu_usage_pct,
            security_score: self.security_score,
            execution_count: stats.executions,
            error_count: stats.errors,
            last_activity: self.last_activity,
        }
    }

    /// Signal every in-flight unit; returns how many were signalled.
    fn cancel_in_flight(&self) -> usize {
        for token in self.in_flight.values() {
            token.cancel();
        }
        self.in_flight.len()
    }

    fn rejection(&self) -> Option<SandboxError> {
        match self.status {
            EnvironmentStatus::Quarantined => {
                Some(SandboxError::EnvironmentQuarantined(self.spec.id.clone()))
            }
            EnvironmentStatus::Error => Some(SandboxError::EnvironmentFaulted(self.spec.id.clone())),
            EnvironmentStatus::Active | EnvironmentStatus::Idle => None,
        }
    }
}

fn percent(used: u64, limit: u64) -> f64 {
    if limit == 0 {
        return 0.0;
    }
    (used as f64 / limit as f64 * 100.0).min(100.0)
}

/// Score movement applied by the monitor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ScoreChange {
    pub from: f64,
    pub to: f64,
}

/// Orchestrates policy resolution, isolated execution, accounting and the
/// environment lifecycle.
pub struct SandboxService {
    registry: Arc<PolicyRegistry>,
    runtime: Arc<dyn IsolationRuntime>,
    accountant: ExecutionAccountant,
    environments: RwLock<BTreeMap<String, EnvironmentSlot>>,
    metrics: RwLock<SecurityMetrics>,
}

impl std::fmt::Debug for SandboxService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxService")
            .field("runtime", &self.runtime.name())
            .field("policies", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl SandboxService {
    /// Build a service over `environments`.
    ///
    /// Fails with `UnknownPolicy` when an environment names a policy the
    /// registry cannot resolve, and with `InvalidConfig` on empty or
    /// duplicate environment ids.
    pub fn new(
        registry: PolicyRegistry,
        runtime: Arc<dyn IsolationRuntime>,
        environments: Vec<EnvironmentSpec>,
    ) -> SandboxResult<Self> {
        let mut slots = BTreeMap::new();
        for spec in environments {
            if spec.id.trim().is_empty() {
                return Err(SandboxError::InvalidConfig(
                    "environment id must not be empty".into(),
                ));
            }
            if slots.contains_key(&spec.id) {
                return Err(SandboxError::InvalidConfig(format!(
                    "duplicate environment id: {}",
                    spec.id
                )));
            }
            let policy = registry.resolve(&spec.policy)?;
            slots.insert(spec.id.clone(), EnvironmentSlot::new(spec, policy));
        }

        let initial: Vec<_> = slots
            .values()
            .map(|slot| slot.snapshot(ExecutionStats::default()))
            .collect();

        Ok(Self {
            registry: Arc::new(registry),
            runtime,
            accountant: ExecutionAccountant::new(),
            environments: RwLock::new(slots),
            metrics: RwLock::new(SecurityMetrics::compute(&initial)),
        })
    }

    /// Built-in policies and the default environment set on the script
    /// runtime.
    pub fn with_defaults() -> SandboxResult<Self> {
        Self::new(
            PolicyRegistry::builtin(),
            Arc::new(ScriptRuntime::new()),
            EnvironmentSpec::defaults(),
        )
    }

    /// Build from a loaded configuration on the script runtime.
    pub fn from_config(config: &WardenConfig) -> crate::Result<Self> {
        Self::from_config_with_runtime(config, Arc::new(ScriptRuntime::new()))
    }

    pub fn from_config_with_runtime(
        config: &WardenConfig,
        runtime: Arc<dyn IsolationRuntime>,
    ) -> crate::Result<Self> {
        let registry = config.registry()?;
        Ok(Self::new(registry, runtime, config.environment_specs())?)
    }

    pub fn policies(&self) -> &PolicyRegistry {
        &self.registry
    }

    pub fn runtime_name(&self) -> &'static str {
        self.runtime.name()
    }

    /// Run `code` in `environment_id` under its policy.
    ///
    /// In-sandbox failures come back as `success: false`; only contract
    /// violations (unknown, quarantined or faulted environment) are errors,
    /// and those are never counted.
    pub async fn execute_code(
        &self,
        code: &str,
        environment_id: &str,
    ) -> SandboxResult<ExecutionResult> {
        let started = Instant::now();
        let execution_id = Uuid::new_v4();
        let cancel = CancelToken::new();

        let (policy, generation) = {
            let mut envs = self.environments.write().await;
            let slot = envs
                .get_mut(environment_id)
                .ok_or_else(|| SandboxError::EnvironmentNotFound(environment_id.to_string()))?;
            if let Some(err) = slot.rejection() {
                obs::emit_execution_rejected(environment_id, &err);
                return Err(err);
            }
            slot.in_flight.insert(execution_id, cancel.clone());
            slot.status = EnvironmentStatus::Active;
            (Arc::clone(&slot.policy), slot.generation)
        };

        let span = obs::execution_span(&execution_id, environment_id, &policy.name);
        let outcome = async {
            obs::emit_execution_started(
                environment_id,
                self.runtime.name(),
                &obs::code_digest(code),
                code.len(),
            );
            self.runtime
                .run(code, &policy, policy.execution_timeout(), cancel)
                .await
        }
        .instrument(span.clone())
        .await;

        let success = outcome.is_success();
        METRICS.record_execution(success);
        METRICS.add_violations(outcome.violations.len() as u64);

        let init_failure = outcome.failure_kind() == Some(FailureKind::InitFailure);
        let elapsed = started.elapsed();
        let mut faulted = false;
        {
            let mut envs = self.environments.write().await;
            if let Some(slot) = envs.get_mut(environment_id) {
                slot.in_flight.remove(&execution_id);
                if slot.generation == generation {
                    if success {
                        self.accountant.record_success(environment_id).await;
                    } else {
                        self.accountant.record_failure(environment_id).await;
                    }
                    slot.last_activity = Some(Utc::now());
                    slot.memory_usage_pct =
                        percent(outcome.memory_used_bytes, policy.memory_limit_bytes);
                    slot.cpu_usage_pct =
                        percent(elapsed.as_millis() as u64, policy.execution_timeout_ms);
                    match slot.status {
                        EnvironmentStatus::Quarantined => {}
                        _ if init_failure => {
                            slot.status = EnvironmentStatus::Error;
                            faulted = true;
                        }
                        EnvironmentStatus::Active if slot.in_flight.is_empty() => {
                            slot.status = EnvironmentStatus::Idle;
                        }
                        _ => {}
                    }
                } else {
                    debug!(
                        environment_id,
                        %execution_id,
                        "run finished after restore; not counted"
                    );
                }
            }
        }

        let result = ExecutionResult::from_outcome(execution_id, outcome, started.elapsed());
        span.in_scope(|| {
            for violation in &result.security_violations {
                obs::emit_violation(environment_id, violation);
            }
            if faulted {
                obs::emit_environment_faulted(
                    environment_id,
                    result.error.as_deref().unwrap_or_default(),
                );
            }
            obs::emit_execution_finished(
                environment_id,
                result.success,
                result.execution_time_ms,
                result.memory_used_bytes,
                result.failure_kind,
            );
        });
        Ok(result)
    }

    /// Quarantine an environment on operator request.
    ///
    /// Idempotent. In-flight units are cancelled; counters are kept.
    pub async fn quarantine(&self, environment_id: &str) -> SandboxResult<ExecutionEnvironment> {
        self.escalate(environment_id, "operator", None).await?;
        self.environment(environment_id).await
    }

    /// Return an environment to service: status Idle, counters zeroed,
    /// score back to the policy baseline.
    ///
    /// Units still in flight are cancelled and their results are left out
    /// of the fresh counters.
    pub async fn restore(&self, environment_id: &str) -> SandboxResult<ExecutionEnvironment> {
        let score = {
            let mut envs = self.environments.write().await;
            let slot = envs
                .get_mut(environment_id)
                .ok_or_else(|| SandboxError::EnvironmentNotFound(environment_id.to_string()))?;
            let cancelled = slot.cancel_in_flight();
            if cancelled > 0 {
                debug!(environment_id, cancelled, "cancelled in-flight units on restore");
            }
            slot.in_flight.clear();
            slot.generation += 1;
            slot.status = EnvironmentStatus::Idle;
            slot.security_score = slot.policy.baseline_score;
            slot.memory_usage_pct = 0.0;
            slot.cpu_usage_pct = 0.0;
            self.accountant.reset(environment_id).await;
            slot.security_score
        };
        obs::emit_restored(environment_id, score);
        self.publish_metrics().await;
        self.environment(environment_id).await
    }

    pub async fn stats(&self, environment_id: &str) -> SandboxResult<ExecutionStats> {
        if !self.environments.read().await.contains_key(environment_id) {
            return Err(SandboxError::EnvironmentNotFound(environment_id.to_string()));
        }
        Ok(self.accountant.stats(environment_id).await)
    }

    /// Snapshot of one environment.
    pub async fn environment(&self, environment_id: &str) -> SandboxResult<ExecutionEnvironment> {
        let envs = self.environments.read().await;
        let slot = envs
            .get(environment_id)
            .ok_or_else(|| SandboxError::EnvironmentNotFound(environment_id.to_string()))?;
        Ok(slot.snapshot(self.accountant.stats(environment_id).await))
    }

    /// Snapshot of every environment, ordered by id.
    pub async fn list_environments(&self) -> Vec<ExecutionEnvironment> {
        let envs = self.environments.read().await;
        let stats = self.accountant.snapshot().await;
        envs.values()
            .map(|slot| slot.snapshot(stats.get(&slot.spec.id).copied().unwrap_or_default()))
            .collect()
    }

    /// The metrics last published by the monitor or a lifecycle change.
    pub async fn global_metrics(&self) -> SecurityMetrics {
        self.metrics.read().await.clone()
    }

    /// Quarantine `environment_id`, cancelling its in-flight units and
    /// optionally applying a `(penalty, floor)` score change.
    ///
    /// Returns `None` when the environment was already quarantined.
    pub(crate) async fn escalate(
        &self,
        environment_id: &str,
        reason: &str,
        penalty: Option<(f64, f64)>,
    ) -> SandboxResult<Option<ScoreChange>> {
        let (change, cancelled) = {
            let mut envs = self.environments.write().await;
            let slot = envs
                .get_mut(environment_id)
                .ok_or_else(|| SandboxError::EnvironmentNotFound(environment_id.to_string()))?;
            if slot.status == EnvironmentStatus::Quarantined {
                return Ok(None);
            }
            slot.status = EnvironmentStatus::Quarantined;
            let from = slot.security_score;
            if let Some((penalty, floor)) = penalty {
                slot.security_score = lower_score(from, penalty, floor);
            }
            let change = ScoreChange {
                from,
                to: slot.security_score,
            };
            (change, slot.cancel_in_flight())
        };
        METRICS.inc_quarantines();
        obs::emit_quarantined(environment_id, reason, cancelled);
        self.publish_metrics().await;
        Ok(Some(change))
    }

    /// Lower the score of an environment that is still in service.
    ///
    /// Returns `None` when the environment is quarantined or faulted.
    pub(crate) async fn penalize(
        &self,
        environment_id: &str,
        penalty: f64,
        floor: f64,
    ) -> SandboxResult<Option<ScoreChange>> {
        let mut envs = self.environments.write().await;
        let slot = envs
            .get_mut(environment_id)
            .ok_or_else(|| SandboxError::EnvironmentNotFound(environment_id.to_string()))?;
        if slot.status.is_blocked() {
            return Ok(None);
        }
        let from = slot.security_score;
        slot.security_score = lower_score(from, penalty, floor);
        Ok(Some(ScoreChange {
            from,
            to: slot.security_score,
        }))
    }

    /// Recompute the global metrics from current state and store them.
    pub(crate) async fn publish_metrics(&self) -> SecurityMetrics {
        let metrics = SecurityMetrics::compute(&self.list_environments().await);
        *self.metrics.write().await = metrics.clone();
        metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::environment::ThreatLevel;

    fn service() -> SandboxService {
        SandboxService::with_defaults().unwrap()
    }

    #[tokio::test]
    async fn test_new_rejects_unknown_policy() {
        let err = SandboxService::new(
            PolicyRegistry::builtin(),
            Arc::new(ScriptRuntime::new()),
            vec![EnvironmentSpec::new("x", "X", "lenient")],
        )
        .unwrap_err();
        assert_eq!(err, SandboxError::UnknownPolicy("lenient".into()));
    }

    #[tokio::test]
    async fn test_new_rejects_duplicate_ids() {
        let err = SandboxService::new(
            PolicyRegistry::builtin(),
            Arc::new(ScriptRuntime::new()),
            vec![
                EnvironmentSpec::new("x", "X", "sandbox"),
                EnvironmentSpec::new("x", "Y", "isolated"),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, SandboxError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_initial_state() {
        let svc = service();
        let envs = svc.list_environments().await;
        assert_eq!(envs.len(), 3);
        for env in &envs {
            assert_eq!(env.status, EnvironmentStatus::Idle);
            assert_eq!(env.execution_count, 0);
            assert!(env.last_activity.is_none());
        }
        let secure = svc.environment("secure-isolate").await.unwrap();
        assert_eq!(secure.security_score, 98.0);
        assert_eq!(svc.global_metrics().await.threat_level, ThreatLevel::Low);
    }

    #[tokio::test]
    async fn test_execute_records_activity() {
        let svc = service();
        let result = svc.execute_code("return 6 * 7", "js-sandbox").await.unwrap();
        assert!(result.success);
        assert_eq!(result.output.as_deref(), Some("42"));

        let env = svc.environment("js-sandbox").await.unwrap();
        assert_eq!(env.status, EnvironmentStatus::Idle);
        assert_eq!(env.execution_count, 1);
        assert_eq!(env.error_count, 0);
        assert!(env.last_activity.is_some());
    }

    #[tokio::test]
    async fn test_unknown_environment() {
        let svc = service();
        let err = svc.execute_code("return 1", "nope").await.unwrap_err();
        assert_eq!(err, SandboxError::EnvironmentNotFound("nope".into()));
        assert!(svc.stats("nope").await.is_err());
        assert!(svc.quarantine("nope").await.is_err());
        assert!(svc.restore("nope").await.is_err());
    }

    #[tokio::test]
    async fn test_quarantine_is_idempotent() {
        let svc = service();
        svc.quarantine("js-sandbox").await.unwrap();
        let env = svc.quarantine("js-sandbox").await.unwrap();
        assert_eq!(env.status, EnvironmentStatus::Quarantined);
        let metrics = svc.global_metrics().await;
        assert_eq!(metrics.quarantined_processes, 1);
        assert_eq!(metrics.threat_level, ThreatLevel::Medium);
    }

    #[tokio::test]
    async fn test_penalize_skips_blocked_environment() {
        let svc = service();
        let change = svc.penalize("js-sandbox", 5.0, 70.0).await.unwrap();
        assert_eq!(change, Some(ScoreChange { from: 95.0, to: 90.0 }));
        svc.quarantine("js-sandbox").await.unwrap();
        assert_eq!(svc.penalize("js-sandbox", 5.0, 70.0).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_escalate_applies_penalty_once() {
        let svc = service();
        let change = svc
            .escalate("debug-monitor", "error rate", Some((20.0, 50.0)))
            .await
            .unwrap();
        assert_eq!(change, Some(ScoreChange { from: 90.0, to: 70.0 }));
        let again = svc
            .escalate("debug-monitor", "error rate", Some((20.0, 50.0)))
            .await
            .unwrap();
        assert_eq!(again, None);
        assert_eq!(svc.environment("debug-monitor").await.unwrap().security_score, 70.0);
    }

    #[test]
    fn test_percent() {
        assert_eq!(percent(0, 100), 0.0);
        assert_eq!(percent(50, 200), 25.0);
        assert_eq!(percent(500, 100), 100.0);
        assert_eq!(percent(1, 0), 0.0);
    }
}
