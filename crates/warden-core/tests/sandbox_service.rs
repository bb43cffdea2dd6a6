//! End-to-end execution and lifecycle tests for the sandbox service.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use warden_core::sandbox::{
    CancelToken, EnvironmentSpec, EnvironmentStatus, FailureKind, IsolationRuntime,
    PolicyRegistry, RawExecutionOutcome, SandboxError, SandboxService, ScriptRuntime,
    SecurityPolicy, ViolationKind, SUCCESS_MARKER, TIMEOUT_VIOLATION,
};

fn service() -> Arc<SandboxService> {
    Arc::new(SandboxService::with_defaults().unwrap())
}

/// Runtime whose isolation unit never starts.
struct BrokenRuntime;

#[async_trait]
impl IsolationRuntime for BrokenRuntime {
    fn name(&self) -> &'static str {
        "broken"
    }

    async fn run(
        &self,
        _code: &str,
        _policy: &SecurityPolicy,
        _deadline: Duration,
        _cancel: CancelToken,
    ) -> RawExecutionOutcome {
        RawExecutionOutcome::failed(FailureKind::InitFailure, "no threads left")
    }
}

/// Runtime whose unit fails to initialise only after it has been cancelled.
struct CancelThenFailRuntime;

#[async_trait]
impl IsolationRuntime for CancelThenFailRuntime {
    fn name(&self) -> &'static str {
        "cancel-then-fail"
    }

    async fn run(
        &self,
        _code: &str,
        _policy: &SecurityPolicy,
        _deadline: Duration,
        cancel: CancelToken,
    ) -> RawExecutionOutcome {
        cancel.cancelled().await;
        RawExecutionOutcome::failed(FailureKind::InitFailure, "worker lost during cancellation")
    }
}

async fn wait_for_status(svc: &SandboxService, id: &str, status: EnvironmentStatus) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while svc.environment(id).await.unwrap().status != status {
        assert!(Instant::now() < deadline, "{id} never became {status}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// -------------------------------------------------------------------------
// execute_code
// -------------------------------------------------------------------------

#[tokio::test]
async fn test_isolated_simple_return() {
    let svc = service();
    let result = svc.execute_code("return 1+1", "secure-isolate").await.unwrap();
    assert!(result.success);
    assert_eq!(result.output.as_deref(), Some("2"));
    assert!(result.error.is_none());
    assert!(result.security_violations.is_empty());
    assert!(result.execution_time_ms < 3000);
}

#[tokio::test]
async fn test_no_return_value_reports_marker() {
    let svc = service();
    let result = svc
        .execute_code("console.log('side effect')", "js-sandbox")
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(result.output.as_deref(), Some(SUCCESS_MARKER));
    assert_eq!(result.logs, vec!["side effect"]);
}

#[tokio::test]
async fn test_disallowed_capability_is_data_not_error() {
    let svc = service();
    let result = svc
        .execute_code("return JSON.stringify({a: 1})", "secure-isolate")
        .await
        .unwrap();
    assert!(!result.success);
    assert_eq!(result.failure_kind, Some(FailureKind::CapabilityViolation));
    assert!(result.has_violation(ViolationKind::CapabilityViolation));
    assert!(result.output.is_none());

    let stats = svc.stats("secure-isolate").await.unwrap();
    assert_eq!((stats.executions, stats.errors), (1, 1));
}

#[tokio::test]
async fn test_network_capability_needs_network_policy() {
    let svc = service();
    let denied = svc.execute_code("fetch('http://example.com')", "js-sandbox").await.unwrap();
    assert!(denied.has_violation(ViolationKind::CapabilityViolation));

    let granted = svc.execute_code("fetch('http://example.com')", "debug-monitor").await.unwrap();
    assert!(!granted.success);
    assert_eq!(granted.failure_kind, Some(FailureKind::RuntimeError));
    assert!(granted.security_violations.is_empty());
}

#[tokio::test]
async fn test_dynamic_code_is_blocked() {
    let svc = service();
    let result = svc
        .execute_code("try { return eval('2') } catch (e) { return 'escaped' }", "debug-monitor")
        .await
        .unwrap();
    assert!(!result.success);
    assert_eq!(result.failure_kind, Some(FailureKind::DynamicCode));
    assert!(result.has_violation(ViolationKind::DynamicCode));
}

#[tokio::test]
async fn test_garbage_does_not_count_against_memory_limit() {
    let svc = service();
    let code = "let base = '';
        for (let i = 0; i < 1000; i++) { base = base + 'x'; }
        for (let i = 0; i < 60000; i++) { let t = base + i; }
        return 'done'";
    let result = svc.execute_code(code, "js-sandbox").await.unwrap();
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.output.as_deref(), Some("done"));
    assert!(!result.has_violation(ViolationKind::MemoryLimitExceeded));

    let env = svc.environment("js-sandbox").await.unwrap();
    assert!(env.memory_usage_pct < 10.0, "{}", env.memory_usage_pct);
}

#[tokio::test]
async fn test_retained_data_hits_memory_limit() {
    let svc = service();
    let code = "let base = '';
        for (let i = 0; i < 1000; i++) { base = base + 'x'; }
        let kept = [];
        while (true) { kept.push(base + kept.length); }";
    let result = svc.execute_code(code, "js-sandbox").await.unwrap();
    assert!(!result.success);
    assert_eq!(result.failure_kind, Some(FailureKind::MemoryLimitExceeded));
    assert!(result.has_violation(ViolationKind::MemoryLimitExceeded));
}

#[tokio::test]
async fn test_timeout_within_bounded_overhead() {
    let mut strict = SecurityPolicy::isolated();
    strict.name = "strict".into();
    strict.execution_timeout_ms = 200;
    let svc = SandboxService::new(
        PolicyRegistry::with_overrides(vec![strict]).unwrap(),
        Arc::new(ScriptRuntime::new()),
        vec![EnvironmentSpec::new("fast", "Fast", "strict")],
    )
    .unwrap();

    let result = svc.execute_code("while (true) {}", "fast").await.unwrap();
    assert!(!result.success);
    assert_eq!(result.failure_kind, Some(FailureKind::ExecutionTimeout));
    assert!(result
        .security_violations
        .iter()
        .any(|v| v.kind == ViolationKind::ExecutionTimeout && v.message == TIMEOUT_VIOLATION));
    assert!(result.execution_time_ms < 1_200);

    let env = svc.environment("fast").await.unwrap();
    assert_eq!(env.status, EnvironmentStatus::Idle);
    assert!(env.cpu_usage_pct > 90.0);
}

#[tokio::test]
async fn test_errors_never_exceed_executions() {
    let svc = service();
    let snippets = [
        "return 1",
        "throw new Error('x')",
        "return missing",
        "let a = [1, 2]; return a.length",
        "return (",
    ];
    for (i, code) in snippets.iter().cycle().take(25).enumerate() {
        svc.execute_code(code, "js-sandbox").await.unwrap();
        let stats = svc.stats("js-sandbox").await.unwrap();
        assert!(stats.errors <= stats.executions);
        assert_eq!(stats.executions, i as u64 + 1);
    }
    let stats = svc.stats("js-sandbox").await.unwrap();
    assert_eq!(stats.errors, 15);
    assert!((stats.error_rate - 0.6).abs() < 1e-9);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submissions_are_all_counted() {
    let svc = service();
    let mut tasks = Vec::new();
    for i in 0..16 {
        let svc = Arc::clone(&svc);
        tasks.push(tokio::spawn(async move {
            let code = if i % 2 == 0 { "return 1" } else { "throw 1" };
            svc.execute_code(code, "js-sandbox").await.unwrap()
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    let env = svc.environment("js-sandbox").await.unwrap();
    assert_eq!(env.execution_count, 16);
    assert_eq!(env.error_count, 8);
    assert_eq!(env.status, EnvironmentStatus::Idle);
}

// -------------------------------------------------------------------------
// Lifecycle
// -------------------------------------------------------------------------

#[tokio::test]
async fn test_quarantined_environment_rejects_without_counting() {
    let svc = service();
    svc.execute_code("return 1", "js-sandbox").await.unwrap();
    svc.quarantine("js-sandbox").await.unwrap();

    let err = svc.execute_code("return 1", "js-sandbox").await.unwrap_err();
    assert_eq!(err, SandboxError::EnvironmentQuarantined("js-sandbox".into()));
    let stats = svc.stats("js-sandbox").await.unwrap();
    assert_eq!((stats.executions, stats.errors), (1, 0));
}

#[tokio::test]
async fn test_restore_resets_counters_and_score() {
    let svc = service();
    svc.execute_code("throw 1", "debug-monitor").await.unwrap();
    svc.quarantine("debug-monitor").await.unwrap();

    let env = svc.restore("debug-monitor").await.unwrap();
    assert_eq!(env.status, EnvironmentStatus::Idle);
    assert_eq!(env.execution_count, 0);
    assert_eq!(env.error_count, 0);
    assert_eq!(env.security_score, 90.0);
    assert_eq!(env.memory_usage_pct, 0.0);

    let result = svc.execute_code("return 'back'", "debug-monitor").await.unwrap();
    assert_eq!(result.output.as_deref(), Some("back"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_quarantine_cancels_in_flight_units() {
    let svc = service();
    let running = {
        let svc = Arc::clone(&svc);
        tokio::spawn(async move { svc.execute_code("while (true) {}", "js-sandbox").await })
    };
    wait_for_status(&svc, "js-sandbox", EnvironmentStatus::Active).await;

    let started = Instant::now();
    svc.quarantine("js-sandbox").await.unwrap();
    let result = running.await.unwrap().unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(result.failure_kind, Some(FailureKind::Cancelled));

    let env = svc.environment("js-sandbox").await.unwrap();
    assert_eq!(env.status, EnvironmentStatus::Quarantined);
    assert_eq!((env.execution_count, env.error_count), (1, 1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_restore_cancels_and_ignores_in_flight_units() {
    let svc = service();
    let running = {
        let svc = Arc::clone(&svc);
        tokio::spawn(async move { svc.execute_code("while (true) {}", "debug-monitor").await })
    };
    wait_for_status(&svc, "debug-monitor", EnvironmentStatus::Active).await;

    let started = Instant::now();
    let env = svc.restore("debug-monitor").await.unwrap();
    assert_eq!(env.status, EnvironmentStatus::Idle);
    let result = running.await.unwrap().unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(result.failure_kind, Some(FailureKind::Cancelled));

    let env = svc.environment("debug-monitor").await.unwrap();
    assert_eq!(env.status, EnvironmentStatus::Idle);
    assert_eq!((env.execution_count, env.error_count), (0, 0));
    assert_eq!(env.security_score, 90.0);

    svc.execute_code("return 1", "debug-monitor").await.unwrap();
    let stats = svc.stats("debug-monitor").await.unwrap();
    assert_eq!((stats.executions, stats.errors), (1, 0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_quarantine_survives_init_failure_of_cancelled_unit() {
    let svc = Arc::new(
        SandboxService::new(
            PolicyRegistry::builtin(),
            Arc::new(CancelThenFailRuntime),
            EnvironmentSpec::defaults(),
        )
        .unwrap(),
    );
    let running = {
        let svc = Arc::clone(&svc);
        tokio::spawn(async move { svc.execute_code("return 1", "js-sandbox").await })
    };
    wait_for_status(&svc, "js-sandbox", EnvironmentStatus::Active).await;

    svc.quarantine("js-sandbox").await.unwrap();
    let result = running.await.unwrap().unwrap();
    assert_eq!(result.failure_kind, Some(FailureKind::InitFailure));

    let env = svc.environment("js-sandbox").await.unwrap();
    assert_eq!(env.status, EnvironmentStatus::Quarantined);
    assert_eq!((env.execution_count, env.error_count), (1, 1));
    let err = svc.execute_code("return 1", "js-sandbox").await.unwrap_err();
    assert_eq!(err, SandboxError::EnvironmentQuarantined("js-sandbox".into()));
}

#[tokio::test]
async fn test_init_failure_faults_environment() {
    let svc = SandboxService::new(
        PolicyRegistry::builtin(),
        Arc::new(BrokenRuntime),
        EnvironmentSpec::defaults(),
    )
    .unwrap();

    let result = svc.execute_code("return 1", "js-sandbox").await.unwrap();
    assert!(!result.success);
    assert_eq!(result.failure_kind, Some(FailureKind::InitFailure));
    assert_eq!(
        svc.environment("js-sandbox").await.unwrap().status,
        EnvironmentStatus::Error
    );

    let err = svc.execute_code("return 1", "js-sandbox").await.unwrap_err();
    assert_eq!(err, SandboxError::EnvironmentFaulted("js-sandbox".into()));
    assert_eq!(svc.stats("js-sandbox").await.unwrap().executions, 1);

    let env = svc.restore("js-sandbox").await.unwrap();
    assert_eq!(env.status, EnvironmentStatus::Idle);
}

#[tokio::test]
async fn test_unknown_environment_everywhere() {
    let svc = service();
    let missing = SandboxError::EnvironmentNotFound("ghost".into());
    assert_eq!(svc.execute_code("return 1", "ghost").await.unwrap_err(), missing);
    assert_eq!(svc.quarantine("ghost").await.unwrap_err(), missing);
    assert_eq!(svc.restore("ghost").await.unwrap_err(), missing);
    assert_eq!(svc.stats("ghost").await.unwrap_err(), missing);
}
