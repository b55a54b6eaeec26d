//! Worker lifecycle: `Booting -> Ready -> {Idle, Busy} -> Stopped`.
//!
//! 1. Register the fleet row as `booting`.
//! 2. Probe the render backend until it answers or the startup window
//!    closes. A closed window is fatal and the main loop never starts.
//! 3. Mark the row `ready`, start the heartbeat task.
//! 4. Run scheduler cycles until cancelled. A cycle error is logged and
//!    followed by a cooldown.
//!
//! Cancellation is checked between cycles and interrupts sleeps; a batch
//! in progress always drains.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use looks_core::polling::{poll_until, PollOutcome, PollSchedule};
use looks_core::render::RenderBackend;
use looks_pipeline::store::WorkerStateStore;
use looks_pipeline::{BatchScheduler, CycleReport};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;

/// Interval between "still waiting" log lines during startup.
const READINESS_LOG_EVERY: Duration = Duration::from_secs(60);

/// Timing and identity the supervisor needs.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub worker_id: String,
    pub backend_tag: String,
    pub startup: PollSchedule,
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
    pub error_cooldown: Duration,
}

impl SupervisorSettings {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            worker_id: config.worker_id.clone(),
            backend_tag: config.backend_affinity.clone(),
            startup: PollSchedule::new(config.startup_poll_interval, config.startup_timeout),
            poll_interval: config.poll_interval,
            heartbeat_interval: config.heartbeat_interval,
            error_cooldown: config.error_cooldown,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("Render backend not ready after {waited_secs} seconds ({attempts} probes)")]
    StartupTimeout { waited_secs: u64, attempts: u32 },
}

/// Totals reported when the worker stops.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Whether the main loop was entered.
    pub entered_main_loop: bool,
    pub cycles: u64,
    pub cycle_errors: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub jobs_skipped: u64,
    pub bookkeeping_errors: u64,
}

impl RunSummary {
    fn absorb(&mut self, report: &CycleReport) {
        self.cycles += 1;
        self.jobs_completed += report.completed as u64;
        self.jobs_failed += report.failed as u64;
        self.jobs_skipped += report.skipped as u64;
        self.bookkeeping_errors += report.bookkeeping.len() as u64;
    }
}

/// Process exit code for a finished run: 0 graceful, 1 startup timeout.
pub fn exit_code(result: &Result<RunSummary, SupervisorError>) -> ExitCode {
    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(SupervisorError::StartupTimeout { .. }) => ExitCode::from(1),
    }
}

pub struct Supervisor {
    settings: SupervisorSettings,
    backend: Arc<dyn RenderBackend>,
    worker_state: Arc<dyn WorkerStateStore>,
    scheduler: BatchScheduler,
}

impl Supervisor {
    pub fn new(
        settings: SupervisorSettings,
        backend: Arc<dyn RenderBackend>,
        worker_state: Arc<dyn WorkerStateStore>,
        scheduler: BatchScheduler,
    ) -> Self {
        Self {
            settings,
            backend,
            worker_state,
            scheduler,
        }
    }

    /// Run until `cancel` fires (Ok) or the backend never becomes ready (Err).
    pub async fn run(&self, cancel: CancellationToken) -> Result<RunSummary, SupervisorError> {
        let worker_id = self.settings.worker_id.as_str();
        let mut summary = RunSummary::default();

        if let Err(e) = self
            .worker_state
            .register(worker_id, &self.settings.backend_tag)
            .await
        {
            tracing::error!(worker_id, error = %e, "Failed to register worker instance");
        }

        tracing::info!(
            worker_id,
            backend = self.backend.name(),
            timeout_secs = self.settings.startup.timeout.as_secs(),
            "Waiting for render backend",
        );
        let outcome = tokio::select! {
            outcome = self.wait_for_backend() => outcome,
            _ = cancel.cancelled() => {
                tracing::info!(worker_id, "Shutdown requested during startup");
                return Ok(summary);
            }
        };
        match outcome {
            PollOutcome::Satisfied { attempts, elapsed } => {
                tracing::info!(
                    worker_id,
                    attempts,
                    waited_secs = elapsed.as_secs(),
                    "Render backend ready",
                );
            }
            PollOutcome::TimedOut { attempts } => {
                let waited_secs = self.settings.startup.timeout.as_secs();
                tracing::error!(
                    worker_id,
                    attempts,
                    waited_secs,
                    "Render backend never became ready",
                );
                return Err(SupervisorError::StartupTimeout {
                    waited_secs,
                    attempts,
                });
            }
        }

        if let Err(e) = self.worker_state.mark_ready(worker_id).await {
            tracing::error!(worker_id, error = %e, "Failed to mark worker ready");
        }

        let heartbeat_cancel = cancel.child_token();
        let heartbeat = self.spawn_heartbeat(heartbeat_cancel.clone());

        summary.entered_main_loop = true;
        tracing::info!(
            worker_id,
            max_batch = self.scheduler.bounds().max(),
            "Worker active, waiting for jobs",
        );

        while !cancel.is_cancelled() {
            let pause = match self.scheduler.run_cycle().await {
                Ok(report) => {
                    summary.absorb(&report);
                    report.is_empty().then_some(self.settings.poll_interval)
                }
                Err(e) => {
                    summary.cycle_errors += 1;
                    tracing::error!(
                        worker_id,
                        error = %e,
                        cooldown_secs = self.settings.error_cooldown.as_secs(),
                        "Scheduler cycle failed",
                    );
                    Some(self.settings.error_cooldown)
                }
            };

            if let Some(pause) = pause {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(pause) => {}
                }
            }
        }

        heartbeat_cancel.cancel();
        if let Err(e) = heartbeat.await {
            tracing::warn!(error = %e, "Heartbeat task ended abnormally");
        }

        tracing::info!(
            worker_id,
            cycles = summary.cycles,
            jobs_completed = summary.jobs_completed,
            jobs_failed = summary.jobs_failed,
            jobs_skipped = summary.jobs_skipped,
            cycle_errors = summary.cycle_errors,
            bookkeeping_errors = summary.bookkeeping_errors,
            "Worker stopped",
        );
        Ok(summary)
    }

    async fn wait_for_backend(&self) -> PollOutcome {
        let mut next_log = READINESS_LOG_EVERY;
        let timeout = self.settings.startup.timeout;
        poll_until(self.settings.startup, |_attempt, elapsed| {
            if elapsed >= next_log {
                tracing::info!(
                    waited_mins = elapsed.as_secs() / 60,
                    timeout_mins = timeout.as_secs() / 60,
                    "Still waiting for render backend",
                );
                next_log += READINESS_LOG_EVERY;
            }
            let backend = Arc::clone(&self.backend);
            async move { backend.is_ready().await }
        })
        .await
    }

    fn spawn_heartbeat(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let worker_state = Arc::clone(&self.worker_state);
        let worker_id = self.settings.worker_id.clone();
        let period = self.settings.heartbeat_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately; `mark_ready` just
            // refreshed the row.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = worker_state.heartbeat(&worker_id).await {
                            tracing::warn!(worker_id = %worker_id, error = %e, "Heartbeat failed");
                        }
                    }
                }
            }
        })
    }
}
