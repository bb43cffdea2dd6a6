//! Periodic escalation of misbehaving environments.
//!
//! Each pass reads every in-service environment's error rate and either
//! quarantines it (above the high threshold), lowers its score (above the
//! medium threshold) or leaves it alone. The global [`SecurityMetrics`] are
//! recomputed at the end of every pass.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::warn;

use super::accountant::ExecutionStats;
use super::environment::SecurityMetrics;
use super::error::{SandboxError, SandboxResult};
use super::service::{SandboxService, ScoreChange};
use crate::metrics::METRICS;
use crate::obs;

/// Escalation thresholds and penalties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub interval_ms: u64,
    pub high_threshold: f64,
    pub high_penalty: f64,
    pub high_floor: f64,
    pub medium_threshold: f64,
    pub medium_penalty: f64,
    pub medium_floor: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5_000,
            high_threshold: 0.30,
            high_penalty: 20.0,
            high_floor: 50.0,
            medium_threshold: 0.10,
            medium_penalty: 5.0,
            medium_floor: 70.0,
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn validate(&self) -> SandboxResult<()> {
        let invalid = |msg: &str| Err(SandboxError::InvalidConfig(format!("monitor: {msg}")));
        if self.interval_ms == 0 {
            return invalid("interval_ms must be positive");
        }
        for threshold in [self.high_threshold, self.medium_threshold] {
            if !(0.0..=1.0).contains(&threshold) {
                return invalid("thresholds must be within 0..=1");
            }
        }
        if self.medium_threshold > self.high_threshold {
            return invalid("medium_threshold must not exceed high_threshold");
        }
        for penalty in [self.high_penalty, self.medium_penalty] {
            if !(0.0..=100.0).contains(&penalty) {
                return invalid("penalties must be within 0..=100");
            }
        }
        for floor in [self.high_floor, self.medium_floor] {
            if !(0.0..=100.0).contains(&floor) {
                return invalid("floors must be within 0..=100");
            }
        }
        Ok(())
    }
}

/// What a pass decides for one environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assessment {
    Quarantine,
    Penalize,
    Healthy,
}

/// One score change applied during a pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreAdjustment {
    pub environment_id: String,
    pub error_rate: f64,
    pub score_before: f64,
    pub score_after: f64,
}

/// Result of one monitor pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorReport {
    /// Environments quarantined by this pass.
    pub escalations: Vec<ScoreAdjustment>,
    /// Environments whose score was lowered without quarantine.
    pub penalties: Vec<ScoreAdjustment>,
    pub metrics: SecurityMetrics,
}

/// Reads accountant state and escalates environments.
#[derive(Debug, Clone)]
pub struct EnvironmentMonitor {
    service: Arc<SandboxService>,
    config: MonitorConfig,
}

impl EnvironmentMonitor {
    pub fn new(service: Arc<SandboxService>, config: MonitorConfig) -> Self {
        Self { service, config }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn assess(&self, stats: &ExecutionStats) -> Assessment {
        if stats.error_rate > self.config.high_threshold {
            Assessment::Quarantine
        } else if stats.error_rate > self.config.medium_threshold {
            Assessment::Penalize
        } else {
            Assessment::Healthy
        }
    }

    /// Run one pass over every environment not quarantined or faulted.
    pub async fn tick(&self) -> MonitorReport {
        let mut escalations = Vec::new();
        let mut penalties = Vec::new();

        for env in self.service.list_environments().await {
            if env.status.is_blocked() {
                continue;
            }
            let stats = match self.service.stats(&env.id).await {
                Ok(stats) => stats,
                Err(e) => {
                    warn!(event = "monitor.skipped", environment_id = %env.id, error = %e);
                    continue;
                }
            };
            match self.assess(&stats) {
                Assessment::Quarantine => {
                    let applied = self
                        .service
                        .escalate(
                            &env.id,
                            "error rate above high threshold",
                            Some((self.config.high_penalty, self.config.high_floor)),
                        )
                        .await;
                    record(&env.id, stats.error_rate, applied, &mut escalations);
                }
                Assessment::Penalize => {
                    let applied = self
                        .service
                        .penalize(&env.id, self.config.medium_penalty, self.config.medium_floor)
                        .await;
                    record(&env.id, stats.error_rate, applied, &mut penalties);
                }
                Assessment::Healthy => {}
            }
        }

        let metrics = self.service.publish_metrics().await;
        obs::emit_monitor_tick(
            escalations.len(),
            penalties.len(),
            metrics.threat_level,
            metrics.security_score,
        );
        METRICS.flush();
        MonitorReport {
            escalations,
            penalties,
            metrics,
        }
    }

    /// Run [`tick`](Self::tick) every configured interval on a tokio task.
    ///
    /// The first pass happens one interval after spawning.
    pub fn spawn(self) -> MonitorHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let period = self.config.interval();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.tick().await;
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });
        MonitorHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

fn record(
    environment_id: &str,
    error_rate: f64,
    applied: SandboxResult<Option<ScoreChange>>,
    into: &mut Vec<ScoreAdjustment>,
) {
    match applied {
        Ok(Some(change)) => {
            if change.to < change.from {
                obs::emit_score_lowered(environment_id, change.from, change.to, error_rate);
            }
            into.push(ScoreAdjustment {
                environment_id: environment_id.to_string(),
                error_rate,
                score_before: change.from,
                score_after: change.to,
            });
        }
        Ok(None) => {}
        Err(e) => warn!(event = "monitor.skipped", environment_id = %environment_id, error = %e),
    }
}

/// Handle to a spawned monitor task.
#[derive(Debug)]
pub struct MonitorHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Stop the task and wait for the current pass, if any, to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
