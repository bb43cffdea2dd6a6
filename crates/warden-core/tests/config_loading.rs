//! Configuration file loading and service construction from config.

use std::io::Write;

use tempfile::NamedTempFile;
use warden_core::sandbox::{EnvironmentStatus, FailureKind, SandboxService};
use warden_core::{WardenConfig, WardenError};

const TENANT_CONFIG: &str = r#"
[monitor]
interval_ms = 250
high_threshold = 0.5

[[policies]]
name = "tenant"
allowed_capabilities = ["console", "Math"]
memory_limit_bytes = 4194304
execution_timeout_ms = 300
network_access = false
file_access = false
baseline_score = 80.0

[[environments]]
id = "tenant-a"
name = "Tenant A"
policy = "tenant"

[[environments]]
id = "tenant-b"
name = "Tenant B"
policy = "sandbox"
"#;

fn write_config(text: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[tokio::test]
async fn test_load_builds_configured_environments() {
    let file = write_config(TENANT_CONFIG);
    let config = WardenConfig::load(file.path()).unwrap();
    assert_eq!(config.monitor.interval_ms, 250);
    assert_eq!(config.monitor.high_threshold, 0.5);
    assert_eq!(config.monitor.medium_threshold, 0.10);

    let svc = SandboxService::from_config(&config).unwrap();
    let envs = svc.list_environments().await;
    let ids: Vec<_> = envs.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, ["tenant-a", "tenant-b"]);
    assert_eq!(envs[0].security_score, 80.0);
    assert_eq!(envs[0].status, EnvironmentStatus::Idle);

    // Built-ins stay resolvable next to the custom policy.
    assert_eq!(svc.policies().len(), 4);
}

#[tokio::test]
async fn test_configured_policy_is_enforced() {
    let file = write_config(TENANT_CONFIG);
    let config = WardenConfig::load(file.path()).unwrap();
    let svc = SandboxService::from_config(&config).unwrap();

    let ok = svc.execute_code("return Math.max(3, 9)", "tenant-a").await.unwrap();
    assert_eq!(ok.output.as_deref(), Some("9"));

    let denied = svc.execute_code("return JSON.stringify(1)", "tenant-a").await.unwrap();
    assert_eq!(denied.failure_kind, Some(FailureKind::CapabilityViolation));

    let slow = svc.execute_code("while (true) {}", "tenant-a").await.unwrap();
    assert_eq!(slow.failure_kind, Some(FailureKind::ExecutionTimeout));
    assert!(slow.execution_time_ms < 1_300);
}

#[test]
fn test_builtin_policy_override_from_file() {
    let file = write_config(
        r#"
        [[policies]]
        name = "isolated"
        allowed_capabilities = ["console"]
        memory_limit_bytes = 1048576
        execution_timeout_ms = 1000
        network_access = false
        file_access = false
        "#,
    );
    let config = WardenConfig::load(file.path()).unwrap();
    let registry = config.registry().unwrap();
    assert_eq!(registry.len(), 3);
    assert_eq!(registry.resolve("isolated").unwrap().execution_timeout_ms, 1000);
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = WardenConfig::load(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, WardenError::Io(_)));
    assert_eq!(err.code(), "io");
}

#[test]
fn test_malformed_file_is_invalid_config() {
    let file = write_config("[monitor]\ninterval_ms = \"soon\"\n");
    let err = WardenConfig::load(file.path()).unwrap_err();
    assert!(matches!(err, WardenError::Toml(_)));
    assert_eq!(err.code(), "invalid_config");
}

#[test]
fn test_unknown_top_level_key_is_rejected() {
    let file = write_config("[storage]\npath = \"/tmp\"\n");
    assert!(WardenConfig::load(file.path()).is_err());
}

#[test]
fn test_invalid_monitor_settings_are_rejected() {
    let file = write_config("[monitor]\nmedium_threshold = 0.9\nhigh_threshold = 0.3\n");
    let err = WardenConfig::load(file.path()).unwrap_err();
    assert_eq!(err.code(), "invalid_config");
}

#[test]
fn test_resolve_prefers_explicit_path() {
    let file = write_config(TENANT_CONFIG);
    let config = WardenConfig::resolve(Some(file.path())).unwrap();
    assert_eq!(config.environments.len(), 2);
}
