//! Per-environment execution counters.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// Counter snapshot for one environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub executions: u64,
    pub errors: u64,
    /// `errors / executions`, or 0 when nothing has run yet.
    pub error_rate: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct Counters {
    executions: u64,
    errors: u64,
}

impl Counters {
    fn snapshot(self) -> ExecutionStats {
        let error_rate = if self.executions == 0 {
            0.0
        } else {
            self.errors as f64 / self.executions as f64
        };
        ExecutionStats {
            executions: self.executions,
            errors: self.errors,
            error_rate,
        }
    }
}

/// Serialized counters keyed by environment id.
///
/// Every update and read takes the same lock, so increments are never lost
/// and a snapshot always satisfies `errors <= executions`.
#[derive(Debug, Default)]
pub struct ExecutionAccountant {
    counters: Mutex<HashMap<String, Counters>>,
}

impl ExecutionAccountant {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_success(&self, environment_id: &str) -> ExecutionStats {
        let mut counters = self.counters.lock().await;
        let entry = counters.entry(environment_id.to_string()).or_default();
        entry.executions += 1;
        entry.snapshot()
    }

    pub async fn record_failure(&self, environment_id: &str) -> ExecutionStats {
        let mut counters = self.counters.lock().await;
        let entry = counters.entry(environment_id.to_string()).or_default();
        entry.executions += 1;
        entry.errors += 1;
        entry.snapshot()
    }

    pub async fn stats(&self, environment_id: &str) -> ExecutionStats {
        self.counters
            .lock()
            .await
            .get(environment_id)
            .copied()
            .unwrap_or_default()
            .snapshot()
    }

    /// Zero the counters for one environment.
    pub async fn reset(&self, environment_id: &str) {
        self.counters.lock().await.remove(environment_id);
    }

    /// Stats for every environment that has recorded anything, taken under
    /// one lock acquisition.
    pub async fn snapshot(&self) -> HashMap<String, ExecutionStats> {
        self.counters
            .lock()
            .await
            .iter()
            .map(|(id, c)| (id.clone(), c.snapshot()))
            .collect()
    }
}
