//! Warden - policy-driven execution sandbox CLI
//!
//! The `warden` command runs snippets against a locally built
//! [`SandboxService`] and inspects its environments and policies.
//!
//! ## Commands
//!
//! - `run`: Execute one snippet and print the result
//! - `envs`: List environments with their counters and scores
//! - `policies`: List resolved security policies
//! - `soak`: Submit a snippet repeatedly, then run one monitor pass
//! - `check-config`: Load and validate a configuration file

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};

use warden_core::sandbox::{
    EnvironmentMonitor, ExecutionEnvironment, MonitorReport, SandboxService, SecurityMetrics,
};
use warden_core::WardenConfig;

#[derive(Parser)]
#[command(name = "warden")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Policy-driven execution sandbox", long_about = None)]
struct Cli {
    /// Configuration file (falls back to $WARDEN_CONFIG, then built-ins)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a snippet once and print the execution result as JSON
    Run {
        /// Environment to execute in
        #[arg(short, long, default_value = "js-sandbox")]
        env: String,

        /// Source code to execute
        #[arg(long, conflicts_with = "file", required_unless_present = "file")]
        code: Option<String>,

        /// Read the source code from a file
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// List environments
    Envs,

    /// List security policies
    Policies,

    /// Submit the same snippet repeatedly, then run one monitor pass
    Soak {
        /// Environment to execute in
        #[arg(short, long, default_value = "js-sandbox")]
        env: String,

        /// Source code to execute
        #[arg(long)]
        code: String,

        /// Number of submissions
        #[arg(short = 'n', long, default_value = "10")]
        count: u32,
    },

    /// Load and validate a configuration file
    CheckConfig {
        /// Path to the configuration file (default: --config)
        path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    warden_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run { env, code, file } => {
            let code = read_code(code, file.as_deref())?;
            let (_, service) = load_service(cli.config.as_deref())?;
            cmd_run(&service, &env, &code).await
        }
        Commands::Envs => {
            let (_, service) = load_service(cli.config.as_deref())?;
            cmd_envs(&service).await
        }
        Commands::Policies => {
            let (_, service) = load_service(cli.config.as_deref())?;
            cmd_policies(&service)
        }
        Commands::Soak { env, code, count } => {
            let (config, service) = load_service(cli.config.as_deref())?;
            let summary = cmd_soak(service, &config, &env, &code, count).await?;
            print_json(&summary)
        }
        Commands::CheckConfig { path } => {
            let path = path
                .or(cli.config)
                .context("No configuration file given (pass a path or --config)")?;
            cmd_check_config(&path)
        }
    }
}

/// Resolve configuration and build the service it describes.
fn load_service(config: Option<&Path>) -> Result<(WardenConfig, Arc<SandboxService>)> {
    let config =
        WardenConfig::resolve(config).context("Failed to load Warden configuration")?;
    let service =
        SandboxService::from_config(&config).context("Failed to build sandbox service")?;
    Ok((config, Arc::new(service)))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Source from `--code` or `--file`; clap guarantees exactly one is set.
fn read_code(code: Option<String>, file: Option<&Path>) -> Result<String> {
    match (code, file) {
        (Some(code), _) => Ok(code),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read source file: {:?}", path)),
        (None, None) => anyhow::bail!("Either --code or --file is required"),
    }
}

/// Execute once; exits with status 2 when the run itself failed.
async fn cmd_run(service: &SandboxService, env: &str, code: &str) -> Result<()> {
    let result = service
        .execute_code(code, env)
        .await
        .with_context(|| format!("Execution in '{}' was rejected", env))?;
    print_json(&result)?;
    if !result.success {
        std::process::exit(2);
    }
    Ok(())
}

async fn cmd_envs(service: &SandboxService) -> Result<()> {
    let envs = service.list_environments().await;
    println!(
        "{:<18} {:<12} {:<12} {:>6} {:>6} {:>6}",
        "ID", "POLICY", "STATUS", "RUNS", "ERRORS", "SCORE"
    );
    for env in &envs {
        println!(
            "{:<18} {:<12} {:<12} {:>6} {:>6} {:>6.1}",
            env.id, env.policy, env.status, env.execution_count, env.error_count, env.security_score
        );
    }
    Ok(())
}

fn cmd_policies(service: &SandboxService) -> Result<()> {
    for policy in service.policies().iter() {
        let capabilities: Vec<String> = policy
            .allowed_capabilities
            .iter()
            .map(ToString::to_string)
            .collect();
        println!("{}", policy.name);
        println!("    capabilities: {}", capabilities.join(", "));
        println!(
            "    memory: {} bytes, timeout: {} ms",
            policy.memory_limit_bytes, policy.execution_timeout_ms
        );
        println!(
            "    network: {}, files: {}, baseline score: {:.1}",
            policy.network_access, policy.file_access, policy.baseline_score
        );
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct SoakSummary {
    submitted: u32,
    succeeded: u32,
    failed: u32,
    monitor: MonitorReport,
    environment: ExecutionEnvironment,
    metrics: SecurityMetrics,
}

async fn cmd_soak(
    service: Arc<SandboxService>,
    config: &WardenConfig,
    env: &str,
    code: &str,
    count: u32,
) -> Result<SoakSummary> {
    let mut succeeded = 0;
    for i in 0..count {
        let result = service
            .execute_code(code, env)
            .await
            .with_context(|| format!("Submission {} to '{}' was rejected", i + 1, env))?;
        if result.success {
            succeeded += 1;
        }
    }
    info!(env, count, succeeded, "soak submissions finished");

    let monitor = EnvironmentMonitor::new(Arc::clone(&service), config.monitor.clone());
    let report = monitor.tick().await;
    Ok(SoakSummary {
        submitted: count,
        succeeded,
        failed: count - succeeded,
        monitor: report,
        environment: service.environment(env).await?,
        metrics: service.global_metrics().await,
    })
}

fn cmd_check_config(path: &Path) -> Result<()> {
    let config = WardenConfig::load(path)
        .with_context(|| format!("Invalid configuration: {:?}", path))?;
    let registry = config.registry()?;
    let envs = config.environment_specs();
    println!("Configuration OK: {:?}", path);
    println!(
        "  policies: {}",
        registry.names().collect::<Vec<_>>().join(", ")
    );
    println!(
        "  environments: {}",
        envs.iter()
            .map(|e| format!("{} ({})", e.id, e.policy))
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("  monitor interval: {} ms", config.monitor.interval_ms);
    Ok(())
}
