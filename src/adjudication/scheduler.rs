//! Background evaluation loop.
//!
//! ```text
//!   idle ──start()──▶ waiting(next) ──timer──▶ evaluating ──▶ idle ─┐
//!                        ▲                                          │
//!                        └──────────────────────────────────────────┘
//!   stop() cancels the timer immediately and is checked between agents.
//! ```

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::RngExt;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::adjudicator::Adjudicator;
use crate::config::SchedulerConfig;

const SECS_PER_HOUR: f64 = 3600.0;

/// Shortest wait between cycles, whatever the config says.
const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Where the loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum SchedulerPhase {
    Idle,
    Waiting { next: DateTime<Utc> },
    Evaluating,
}

/// Outcome of one evaluation cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Agents that were due.
    pub due: usize,
    pub evaluated: usize,
    pub failed: usize,
}

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct EvaluationScheduler {
    adjudicator: Arc<Adjudicator>,
    config: SchedulerConfig,
    phase: Mutex<SchedulerPhase>,
    running: Mutex<Option<Running>>,
}

impl EvaluationScheduler {
    pub fn new(adjudicator: Arc<Adjudicator>, config: SchedulerConfig) -> Self {
        Self {
            adjudicator,
            config,
            phase: Mutex::new(SchedulerPhase::Idle),
            running: Mutex::new(None),
        }
    }

    /// Spawn the loop onto the current tokio runtime. Returns `false` when a
    /// loop is already running.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            tracing::debug!("Evaluation scheduler already running");
            return false;
        }

        let cancel = CancellationToken::new();
        let scheduler = Arc::clone(self);
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            scheduler.run_loop(token).await;
        });
        *running = Some(Running { cancel, handle });
        tracing::info!(
            min_hours = self.config.min_interval_hours,
            max_hours = self.config.max_interval_hours,
            "Evaluation scheduler started"
        );
        true
    }

    /// Cancel the loop and wait for it to wind down. An evaluation already
    /// in flight finishes first; no further agents are started.
    pub async fn stop(&self) {
        let Some(Running { cancel, handle }) = self.running.lock().take() else {
            return;
        };
        cancel.cancel();
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "Evaluation scheduler task ended abnormally");
        }
        *self.phase.lock() = SchedulerPhase::Idle;
        tracing::info!("Evaluation scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    pub fn phase(&self) -> SchedulerPhase {
        *self.phase.lock()
    }

    /// Scheduled wake time, when the loop is waiting.
    pub fn get_next_evaluation_time(&self) -> Option<DateTime<Utc>> {
        match self.phase() {
            SchedulerPhase::Waiting { next } => Some(next),
            _ => None,
        }
    }

    /// Time left until the scheduled wake, clamped at zero.
    pub fn get_time_until_evaluation(&self) -> Option<Duration> {
        self.get_next_evaluation_time()
            .map(|next| (next - Utc::now()).to_std().unwrap_or(Duration::ZERO))
    }

    /// Uniform random wait in `[min_interval_hours, max_interval_hours]`.
    pub fn draw_interval(&self) -> Duration {
        let min = self.config.min_interval_hours.max(0.0);
        let max = self.config.max_interval_hours;
        let hours = if max > min {
            rand::rng().random_range(min..=max)
        } else {
            min
        };
        Duration::try_from_secs_f64(hours * SECS_PER_HOUR)
            .unwrap_or(MIN_INTERVAL)
            .max(MIN_INTERVAL)
    }

    async fn run_loop(self: Arc<Self>, cancel: CancellationToken) {
        while !cancel.is_cancelled() {
            let interval = self.draw_interval();
            let now = Utc::now();
            let next = chrono::Duration::from_std(interval)
                .ok()
                .and_then(|d| now.checked_add_signed(d))
                .unwrap_or(now);
            *self.phase.lock() = SchedulerPhase::Waiting { next };
            tracing::debug!(next = %next, "Next evaluation scheduled");

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = cancel.cancelled() => {
                    tracing::debug!("Evaluation wait cancelled");
                    break;
                }
            }

            *self.phase.lock() = SchedulerPhase::Evaluating;
            self.evaluate_due(Some(&cancel)).await;
            *self.phase.lock() = SchedulerPhase::Idle;
        }
        *self.phase.lock() = SchedulerPhase::Idle;
    }

    /// Evaluate every due agent once, immediately.
    pub async fn run_cycle(&self) -> CycleReport {
        self.evaluate_due(None).await
    }

    async fn evaluate_due(&self, cancel: Option<&CancellationToken>) -> CycleReport {
        let due = self.adjudicator.ledger().get_agents_for_evaluation();
        let mut report = CycleReport {
            due: due.len(),
            ..CycleReport::default()
        };
        tracing::info!(agents = due.len(), "Starting evaluation cycle");

        for agent_id in &due {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                tracing::debug!("Evaluation cycle interrupted by stop");
                break;
            }
            match self.adjudicator.evaluate_agent(agent_id).await {
                Ok(judgment) => {
                    report.evaluated += 1;
                    tracing::debug!(
                        agent_id = %agent_id,
                        score = judgment.score,
                        awarded = judgment.tokens_awarded,
                        "Agent judged"
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        agent_id = %agent_id,
                        error = %e,
                        "Agent evaluation failed, skipping"
                    );
                }
            }
        }

        tracing::info!(
            evaluated = report.evaluated,
            failed = report.failed,
            "Evaluation cycle finished"
        );
        report
    }
}
