//! Process-wide execution counters.
//!
//! The service bumps these on every finished run and every quarantine.
//! [`Metrics::flush`] reports them as one `info!` event; the monitor calls
//! it after each pass and `wardend` once more at shutdown.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Point-in-time copy of [`METRICS`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub executions: u64,
    pub failures: u64,
    pub violations: u64,
    pub quarantines: u64,
}

/// Relaxed atomic counters.
pub struct Metrics {
    executions: AtomicU64,
    failures: AtomicU64,
    violations: AtomicU64,
    quarantines: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            executions: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            violations: AtomicU64::new(0),
            quarantines: AtomicU64::new(0),
        }
    }

    /// Count one finished execution, and a failure when it did not succeed.
    pub fn record_execution(&self, success: bool) {
        self.executions.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        tracing::trace!(metric = "executions", "counter incremented");
    }

    pub fn add_violations(&self, count: u64) {
        if count > 0 {
            self.violations.fetch_add(count, Ordering::Relaxed);
            tracing::trace!(metric = "violations", "counter incremented");
        }
    }

    pub fn inc_quarantines(&self) {
        self.quarantines.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "quarantines", "counter incremented");
    }

    /// Current values, read counter by counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            executions: self.executions(),
            failures: self.failures(),
            violations: self.violations(),
            quarantines: self.quarantines(),
        }
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        let snapshot = self.snapshot();
        tracing::info!(
            metric = "flush",
            executions = snapshot.executions,
            failures = snapshot.failures,
            violations = snapshot.violations,
            quarantines = snapshot.quarantines,
        );
    }

    pub fn executions(&self) -> u64 {
        self.executions.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn violations(&self) -> u64 {
        self.violations.load(Ordering::Relaxed)
    }

    pub fn quarantines(&self) -> u64 {
        self.quarantines.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.executions.store(0, Ordering::Relaxed);
        self.failures.store(0, Ordering::Relaxed);
        self.violations.store(0, Ordering::Relaxed);
        self.quarantines.store(0, Ordering::Relaxed);
    }
}
