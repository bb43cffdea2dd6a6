//! Warden daemon.
//!
//! Answers newline-delimited JSON requests on stdin with one JSON line each
//! on stdout, while the environment monitor runs in the background. Requests
//! run concurrently; tag them with `id` to match answers. Exits once stdin
//! closes and every pending request has been answered.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufRead, AsyncWrite, BufReader};
use tracing::{info, Level};

use warden_core::sandbox::{EnvironmentMonitor, SandboxService};
use warden_core::{WardenConfig, METRICS};

#[derive(Parser)]
#[command(name = "wardend")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Warden sandbox daemon (JSON lines over stdio)", long_about = None)]
struct Args {
    /// Configuration file (falls back to $WARDEN_CONFIG, then built-ins)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    warden_core::init_tracing(args.json, level);

    let config = WardenConfig::resolve(args.config.as_deref())
        .context("Failed to load Warden configuration")?;
    let service = Arc::new(
        SandboxService::from_config(&config).context("Failed to build sandbox service")?,
    );
    info!(
        version = warden_core::VERSION,
        runtime = service.runtime_name(),
        policies = service.policies().len(),
        "wardend started"
    );

    let stdin = BufReader::new(tokio::io::stdin());
    let answered = run(service, config, stdin, tokio::io::stdout()).await?;
    let totals = METRICS.snapshot();
    info!(
        answered,
        executions = totals.executions,
        quarantines = totals.quarantines,
        "wardend stopped"
    );
    Ok(())
}

/// Serve requests with the monitor running until `reader` is exhausted.
async fn run<R, W>(
    service: Arc<SandboxService>,
    config: WardenConfig,
    reader: R,
    writer: W,
) -> Result<u64>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let monitor = EnvironmentMonitor::new(Arc::clone(&service), config.monitor).spawn();
    let served = warden_core::serve(Arc::clone(&service), reader, writer).await;
    monitor.shutdown().await;
    METRICS.flush();
    served.context("Request stream failed")
}
