//! Isolation runtimes: the seam where the isolation primitive is swapped.
//!
//! [`ScriptRuntime`] runs each submission on its own OS thread and races it
//! against the deadline and a [`CancelToken`]. Whatever finishes first wins;
//! a losing unit is told to stop through its cancellation flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{oneshot, watch};

use super::execution::{FailureKind, RawExecutionOutcome};
use super::policy::SecurityPolicy;
use crate::script::{self, Grants, Limits};

/// Stack reserved for each isolation thread.
pub const UNIT_STACK_BYTES: usize = 64 * 1024 * 1024;

/// Shared cancellation signal for one in-flight execution.
///
/// The atomic flag is polled synchronously by the unit; the watch channel
/// wakes async waiters.
#[derive(Debug, Clone)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    notify: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(tx),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.notify.subscribe();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Executes one code submission inside an isolated execution unit.
///
/// Implementations never return an error: every in-unit failure, including
/// failure to start the unit, is folded into the outcome.
#[async_trait]
pub trait IsolationRuntime: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    async fn run(
        &self,
        code: &str,
        policy: &SecurityPolicy,
        deadline: Duration,
        cancel: CancelToken,
    ) -> RawExecutionOutcome;
}

/// Thread-per-submission runtime backed by the restricted interpreter.
#[derive(Debug, Clone)]
pub struct ScriptRuntime {
    stack_size: usize,
}

impl ScriptRuntime {
    pub fn new() -> Self {
        Self {
            stack_size: UNIT_STACK_BYTES,
        }
    }

    pub fn with_stack_size(stack_size: usize) -> Self {
        Self { stack_size }
    }
}

impl Default for ScriptRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Raises the unit's flag when the awaiting future goes away, so an
/// abandoned thread stops at its next step.
struct StopOnDrop(Arc<AtomicBool>);

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl IsolationRuntime for ScriptRuntime {
    fn name(&self) -> &'static str {
        "script"
    }

    async fn run(
        &self,
        code: &str,
        policy: &SecurityPolicy,
        deadline: Duration,
        cancel: CancelToken,
    ) -> RawExecutionOutcome {
        let grants = Grants::from_policy(policy);
        let limits = Limits::new(policy.memory_limit_bytes, deadline, cancel.flag());
        let source = code.to_owned();
        let (tx, rx) = oneshot::channel();

        let spawned = std::thread::Builder::new()
            .name(format!("warden-unit-{}", policy.name))
            .stack_size(self.stack_size)
            .spawn(move || {
                let outcome = script::execute(&source, &grants, &limits);
                let _ = tx.send(outcome);
            });
        if let Err(e) = spawned {
            return RawExecutionOutcome::failed(
                FailureKind::InitFailure,
                format!("failed to start isolation unit: {e}"),
            );
        }
        let _stop = StopOnDrop(cancel.flag());

        tokio::select! {
            biased;
            received = rx => received.unwrap_or_else(|_| {
                RawExecutionOutcome::failed(
                    FailureKind::RuntimeError,
                    "isolation unit terminated abnormally",
                )
            }),
            _ = tokio::time::sleep(deadline) => {
                cancel.cancel();
                RawExecutionOutcome::timed_out(deadline)
            }
            _ = cancel.cancelled() => RawExecutionOutcome::cancelled(),
        }
    }
}
