//! Drives one job from claim to its single terminal write.
//!
//! Steps, in order:
//! 1. Conditional claim (`pending -> processing`); losing the race skips
//!    the job without touching it.
//! 2. Fetch and stage input assets.
//! 3. Build the kind's graph and submit it.
//! 4. Poll progress and result on a fixed interval until a result, a hard
//!    failure, or the render deadline.
//! 5. Download the artifact, upload it, persist it through the kind's sink.
//! 6. Finalize as `completed` or `failed`, then bump the worker counters.
//!
//! Every error after the claim becomes a `failed` finalize. Progress and
//! counter writes are best-effort and collected as [`BookkeepingError`]s.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use looks_core::job_lifecycle::{
    map_step_progress, round_seconds, JobOutcome, JobStatus, ProgressGate, PROGRESS_CLAIMED,
    PROGRESS_PUBLISHING, PROGRESS_RENDER_START,
};
use looks_core::polling::Deadline;
use looks_core::render::{ArtifactLocation, PollResult, RenderBackend, RenderTask};
use looks_core::types::DbId;
use looks_db::models::job::{ClaimMetadata, Job};
use tokio::time::Instant;

use crate::error::{BookkeepingError, JobError, StoreError};
use crate::input::RenderInput;
use crate::kinds::{BuildContext, KindRegistry, StagedAssets};
use crate::storage::{result_key, AssetStore, RESULT_CONTENT_TYPE};
use crate::store::{JobStore, WorkerStateStore};

/// Interval between "still processing" log lines while polling.
const STILL_PROCESSING_LOG_EVERY: Duration = Duration::from_secs(10);

/// Backoff before retrying a failed terminal write.
const FINALIZE_RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];

/// Executor tunables.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub worker_id: String,
    /// Backend tag written into `result_metadata` (e.g. `vast`).
    pub backend_tag: String,
    pub render_timeout: Duration,
    pub render_poll_interval: Duration,
    pub cost_per_job_usd: f64,
}

/// What happened to a job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobDisposition {
    /// Another worker claimed it first.
    Skipped,
    Completed { result_url: String },
    Failed { error_message: String },
}

/// Result of [`JobExecutor::execute`].
#[derive(Debug)]
pub struct ExecutionReport {
    pub job_id: DbId,
    pub disposition: JobDisposition,
    /// `false` when the terminal write could not be made (job left in
    /// `processing`) or found the job already terminal.
    pub finalized: bool,
    pub bookkeeping: Vec<BookkeepingError>,
}

/// Per-job mutable state threaded through the steps.
struct JobRun {
    gate: ProgressGate,
    bookkeeping: Vec<BookkeepingError>,
}

pub struct JobExecutor {
    store: Arc<dyn JobStore>,
    worker_state: Arc<dyn WorkerStateStore>,
    backend: Arc<dyn RenderBackend>,
    assets: Arc<dyn AssetStore>,
    kinds: KindRegistry,
    config: ExecutorConfig,
}

impl JobExecutor {
    pub fn new(
        store: Arc<dyn JobStore>,
        worker_state: Arc<dyn WorkerStateStore>,
        backend: Arc<dyn RenderBackend>,
        assets: Arc<dyn AssetStore>,
        kinds: KindRegistry,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            store,
            worker_state,
            backend,
            assets,
            kinds,
            config,
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Claim and run one job.
    ///
    /// Returns `Err` only when the claim itself could not be attempted;
    /// the job is untouched in that case.
    pub async fn execute(&self, job: &Job) -> Result<ExecutionReport, StoreError> {
        if let Err(e) = job
            .status()
            .and_then(|status| status.ensure_transition(JobStatus::Processing))
        {
            tracing::warn!(job_id = %job.id, error = %e, "Job is not claimable, skipping");
            return Ok(ExecutionReport {
                job_id: job.id,
                disposition: JobDisposition::Skipped,
                finalized: false,
                bookkeeping: Vec::new(),
            });
        }

        let metadata = ClaimMetadata {
            worker_id: self.config.worker_id.clone(),
            backend: self.config.backend_tag.clone(),
            started_at: Utc::now(),
        };

        if !self.store.claim(job.id, &metadata).await? {
            tracing::info!(job_id = %job.id, "Job claimed by another worker, skipping");
            return Ok(ExecutionReport {
                job_id: job.id,
                disposition: JobDisposition::Skipped,
                finalized: false,
                bookkeeping: Vec::new(),
            });
        }

        let started = Instant::now();
        tracing::info!(
            job_id = %job.id,
            user_id = %job.user_id,
            job_type = %job.job_type,
            priority = job.priority,
            "Job claimed",
        );

        let mut run = JobRun {
            gate: ProgressGate::new(PROGRESS_CLAIMED),
            bookkeeping: Vec::new(),
        };

        let result = self.run_claimed(job, &mut run).await;
        let processing_time_seconds = round_seconds(started.elapsed().as_secs_f64());

        let (outcome, disposition) = match result {
            Ok(result_url) => (
                JobOutcome::Completed {
                    result_url: result_url.clone(),
                    processing_time_seconds,
                    cost_usd: self.config.cost_per_job_usd,
                },
                JobDisposition::Completed { result_url },
            ),
            Err(e) => {
                let error_message = e.to_string();
                tracing::error!(job_id = %job.id, error = %error_message, "Job failed");
                (
                    JobOutcome::Failed {
                        error_message: error_message.clone(),
                        processing_time_seconds,
                    },
                    JobDisposition::Failed { error_message },
                )
            }
        };

        let finalized = self.finalize(job.id, &outcome).await;
        if finalized {
            self.bump_counters(&outcome, &mut run).await;
            if let JobOutcome::Completed { .. } = outcome {
                tracing::info!(
                    job_id = %job.id,
                    processing_time_seconds,
                    "Job completed",
                );
            }
        }

        Ok(ExecutionReport {
            job_id: job.id,
            disposition,
            finalized,
            bookkeeping: run.bookkeeping,
        })
    }

    // ---- steps ----

    async fn run_claimed(&self, job: &Job, run: &mut JobRun) -> Result<String, JobError> {
        let strategy = self.kinds.get(&job.job_type)?;
        let input = RenderInput::parse(&job.input_data)?;
        if strategy.requires_avatar && input.avatar_url.is_none() {
            return Err(JobError::InvalidInput("avatar_url is required".into()));
        }

        let staged = self.stage_inputs(job.id, &input).await?;

        let ctx = BuildContext {
            job_id: job.id,
            input: &input,
            staged: &staged,
            seed: Utc::now().timestamp().unsigned_abs(),
        };
        let graph = strategy.builder.build(&ctx)?;

        let task_handle = self.backend.submit(&graph).await.map_err(JobError::Dispatch)?;
        let task = RenderTask {
            task_handle,
            owner_job_id: job.id,
            output_selector: graph.output_selector.clone(),
            submitted_at: Utc::now(),
        };
        tracing::info!(
            job_id = %job.id,
            prompt_id = %task.task_handle,
            backend = self.backend.name(),
            "Workflow submitted",
        );
        self.report_progress(job.id, run, PROGRESS_RENDER_START, Some("Rendering"))
            .await;

        let location = self.await_render(&task, run).await?;

        self.report_progress(job.id, run, PROGRESS_PUBLISHING, Some("Publishing result"))
            .await;
        let bytes = self
            .backend
            .fetch_artifact(&location)
            .await
            .map_err(JobError::publish)?;
        let key = result_key(job.user_id, job.id, Utc::now().timestamp());
        let size = bytes.len();
        let result_url = self.assets.upload(&key, bytes, RESULT_CONTENT_TYPE).await?;
        tracing::info!(job_id = %job.id, key = %key, size, "Result published");

        strategy
            .sink
            .persist(self.store.as_ref(), job.user_id, job.id, &input, &result_url)
            .await?;

        Ok(result_url)
    }

    /// Download each input and stage it on the backend.
    async fn stage_inputs(
        &self,
        job_id: DbId,
        input: &RenderInput,
    ) -> Result<StagedAssets, JobError> {
        let mut staged = StagedAssets::default();

        if let Some(url) = input.avatar_url.as_deref() {
            let name = format!("job_{job_id}_avatar.jpg");
            staged.avatar = Some(self.stage_one(url, &name).await?);
        }
        for (idx, garment) in input.garments().iter().enumerate() {
            let name = format!("job_{job_id}_garment_{idx}.jpg");
            staged.garments.push(self.stage_one(&garment.url, &name).await?);
        }

        tracing::debug!(
            job_id = %job_id,
            avatar = staged.avatar.is_some(),
            garments = staged.garments.len(),
            "Inputs staged",
        );
        Ok(staged)
    }

    async fn stage_one(&self, url: &str, filename: &str) -> Result<String, JobError> {
        let bytes = self.assets.download(url).await.map_err(JobError::asset)?;
        self.backend
            .stage_input(filename, bytes)
            .await
            .map_err(JobError::asset)
    }

    /// Poll until the task yields an artifact, fails, or the deadline passes.
    async fn await_render(
        &self,
        task: &RenderTask,
        run: &mut JobRun,
    ) -> Result<ArtifactLocation, JobError> {
        let job_id = task.owner_job_id;
        let deadline = Deadline::after(self.config.render_timeout);
        let mut next_log = STILL_PROCESSING_LOG_EVERY;

        loop {
            if let Some(step) = self.backend.poll_progress(&task.task_handle).await {
                if let Some(progress) = map_step_progress(step.step, step.total_steps) {
                    let message = format!("Rendering step {}/{}", step.step, step.total_steps);
                    self.report_progress(job_id, run, progress, Some(&message)).await;
                }
            }

            match self
                .backend
                .poll_result(&task.task_handle, &task.output_selector)
                .await
            {
                Ok(PollResult::Ready(location)) => {
                    tracing::info!(
                        job_id = %job_id,
                        prompt_id = %task.task_handle,
                        filename = %location.filename,
                        elapsed_secs = deadline.elapsed().as_secs(),
                        "Render finished",
                    );
                    return Ok(location);
                }
                Ok(PollResult::Failed(reason)) => return Err(JobError::BackendFailure(reason)),
                Ok(PollResult::Pending) => {}
                Err(e) => {
                    tracing::warn!(
                        job_id = %job_id,
                        prompt_id = %task.task_handle,
                        error = %e,
                        "Poll failed, will retry",
                    );
                }
            }

            if deadline.is_expired() {
                self.backend.release(&task.task_handle).await;
                return Err(JobError::Timeout(self.config.render_timeout.as_secs()));
            }

            let elapsed = deadline.elapsed();
            if elapsed >= next_log {
                tracing::info!(
                    job_id = %job_id,
                    prompt_id = %task.task_handle,
                    elapsed_secs = elapsed.as_secs(),
                    "Still processing",
                );
                next_log = elapsed + STILL_PROCESSING_LOG_EVERY;
            }

            deadline.sleep_within(self.config.render_poll_interval).await;
        }
    }

    // ---- best-effort writes ----

    async fn report_progress(
        &self,
        job_id: DbId,
        run: &mut JobRun,
        candidate: i16,
        message: Option<&str>,
    ) {
        let Some(progress) = run.gate.advance(candidate) else {
            return;
        };
        if let Err(e) = self.store.update_progress(job_id, progress, message).await {
            tracing::warn!(job_id = %job_id, progress, error = %e, "Progress update failed");
            run.bookkeeping
                .push(BookkeepingError::new("update_progress", e));
        }
    }

    /// Terminal write with retries. Returns whether this call wrote it.
    async fn finalize(&self, job_id: DbId, outcome: &JobOutcome) -> bool {
        if let Err(e) = JobStatus::Processing.ensure_transition(outcome.status()) {
            tracing::error!(job_id = %job_id, error = %e, "Refusing terminal write");
            return false;
        }
        let mut attempt = 0usize;
        loop {
            match self.store.finalize(job_id, outcome).await {
                Ok(true) => return true,
                Ok(false) => {
                    tracing::warn!(
                        job_id = %job_id,
                        status = %outcome.status(),
                        "Job was no longer processing, terminal write skipped",
                    );
                    return false;
                }
                Err(e) => match FINALIZE_RETRY_DELAYS.get(attempt) {
                    Some(delay) => {
                        tracing::warn!(
                            job_id = %job_id,
                            attempt = attempt + 1,
                            error = %e,
                            "Terminal write failed, retrying",
                        );
                        tokio::time::sleep(*delay).await;
                        attempt += 1;
                    }
                    None => {
                        tracing::error!(
                            job_id = %job_id,
                            status = %outcome.status(),
                            error = %e,
                            "Terminal write failed after all retries, job left processing",
                        );
                        return false;
                    }
                },
            }
        }
    }

    async fn bump_counters(&self, outcome: &JobOutcome, run: &mut JobRun) {
        let worker_id = &self.config.worker_id;
        let (operation, result) = match outcome {
            JobOutcome::Completed { .. } => (
                "record_job_completed",
                self.worker_state.record_job_completed(worker_id).await,
            ),
            JobOutcome::Failed { .. } => (
                "record_job_failed",
                self.worker_state.record_job_failed(worker_id).await,
            ),
        };
        if let Err(e) = result {
            tracing::warn!(worker_id = %worker_id, operation, error = %e, "Counter update failed");
            run.bookkeeping.push(BookkeepingError::new(operation, e));
        }
    }
}
