//! In-memory fakes for the store, render backend and asset storage.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use looks_core::job_lifecycle::{clamp_in_flight, JobOutcome, JobStatus, PROGRESS_CLAIMED, PROGRESS_DONE};
use looks_core::render::{
    ArtifactLocation, PollResult, RenderBackend, RenderBackendError, RenderGraph, StepProgress,
    TaskHandle,
};
use looks_core::types::DbId;
use looks_core::worker_state::InstanceStatus;
use looks_db::models::job::{ClaimMetadata, Job};
use looks_db::models::tryon_result::CreateTryOnResult;
use looks_pipeline::executor::{ExecutorConfig, JobExecutor};
use looks_pipeline::kinds::KindRegistry;
use looks_pipeline::storage::{AssetStore, StorageError};
use looks_pipeline::store::{JobStore, WorkerStateStore};
use looks_pipeline::StoreError;
use uuid::Uuid;

pub const WORKER_ID: &str = "vast-worker-test";

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

/// A pending job. `created_secs` orders creation within a priority.
pub fn pending_job(job_type: &str, priority: i32, created_secs: i64) -> Job {
    let created_at = Utc
        .timestamp_opt(1_760_000_000 + created_secs, 0)
        .single()
        .unwrap();
    Job {
        id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        job_type: job_type.to_string(),
        status: JobStatus::Pending.as_str().to_string(),
        priority,
        preferred_backend: "vast".to_string(),
        input_data: serde_json::json!({
            "avatar_url": "https://cdn.example.com/avatar.jpg",
            "garment_images": [{ "url": "https://cdn.example.com/g0.jpg" }],
            "products_metadata": [{ "name": "Linen Shirt", "category": "top" }]
        }),
        progress: 0,
        progress_message: None,
        result_url: None,
        result_metadata: None,
        error_message: None,
        started_at: None,
        completed_at: None,
        processing_time_seconds: None,
        cost_usd: None,
        created_at,
        updated_at: created_at,
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct StoreState {
    /// Insertion order; `fetch_batch` returns rows in this order, unsorted.
    pub order: Vec<DbId>,
    pub jobs: HashMap<DbId, Job>,
    pub claims: Vec<DbId>,
    pub progress_log: Vec<(DbId, i16)>,
    pub finalize_calls: usize,
    pub tryon_rows: Vec<CreateTryOnResult>,
    pub status_log: Vec<(InstanceStatus, i32)>,
    pub jobs_processed: i32,
    pub jobs_failed: i32,
    pub heartbeats: usize,
    pub registered: bool,
    pub ready: bool,
    pub fail_counters: bool,
    pub fail_progress: bool,
    pub fail_status: bool,
    pub fail_fetch: bool,
    /// Number of upcoming `finalize` calls that error.
    pub fail_finalize: usize,
}

/// Both stores, mimicking the guarded SQL writes.
#[derive(Default)]
pub struct FakeStore {
    pub state: Mutex<StoreState>,
}

impl FakeStore {
    pub fn with_jobs(jobs: Vec<Job>) -> Arc<Self> {
        let store = Self::default();
        {
            let mut state = store.state.lock().unwrap();
            for job in jobs {
                state.order.push(job.id);
                state.jobs.insert(job.id, job);
            }
        }
        Arc::new(store)
    }

    pub fn job(&self, id: DbId) -> Job {
        self.state.lock().unwrap().jobs[&id].clone()
    }

    pub fn progress_for(&self, id: DbId) -> Vec<i16> {
        self.state
            .lock()
            .unwrap()
            .progress_log
            .iter()
            .filter(|(job_id, _)| *job_id == id)
            .map(|(_, p)| *p)
            .collect()
    }

    pub fn update(&self, f: impl FnOnce(&mut StoreState)) {
        f(&mut self.state.lock().unwrap());
    }

    fn unavailable(what: &str) -> StoreError {
        StoreError::Unavailable(format!("{what} injected failure"))
    }
}

#[async_trait]
impl JobStore for FakeStore {
    async fn fetch_batch(&self, affinity: &str, limit: i64) -> Result<Vec<Job>, StoreError> {
        let state = self.state.lock().unwrap();
        if state.fail_fetch {
            return Err(Self::unavailable("fetch_batch"));
        }
        // Unsorted on purpose: ordering is the scheduler's job. The limit is
        // only applied as a loose upper bound on what a query could return.
        let _ = limit;
        Ok(state
            .order
            .iter()
            .map(|id| &state.jobs[id])
            .filter(|j| j.status == "pending" && j.preferred_backend == affinity)
            .cloned()
            .collect())
    }

    async fn claim(&self, job_id: DbId, metadata: &ClaimMetadata) -> Result<bool, StoreError> {
        let mut state = self.state.lock().unwrap();
        let Some(job) = state.jobs.get_mut(&job_id) else {
            return Ok(false);
        };
        if job.status != "pending" {
            return Ok(false);
        }
        job.status = "processing".into();
        job.progress = PROGRESS_CLAIMED;
        job.started_at = Some(metadata.started_at);
        job.result_metadata = Some(serde_json::to_value(metadata).unwrap());
        state.claims.push(job_id);
        Ok(true)
    }

    async fn update_progress(
        &self,
        job_id: DbId,
        progress: i16,
        message: Option<&str>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_progress {
            return Err(Self::unavailable("update_progress"));
        }
        let progress = clamp_in_flight(progress);
        let job = state.jobs.get_mut(&job_id).unwrap();
        if job.status != "processing" || job.progress >= progress {
            return Ok(false);
        }
        job.progress = progress;
        job.progress_message = message.map(str::to_string);
        state.progress_log.push((job_id, progress));
        Ok(true)
    }

    async fn finalize(&self, job_id: DbId, outcome: &JobOutcome) -> Result<bool, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.finalize_calls += 1;
        if state.fail_finalize > 0 {
            state.fail_finalize -= 1;
            return Err(Self::unavailable("finalize"));
        }
        let job = state.jobs.get_mut(&job_id).unwrap();
        if job.status != "processing" {
            return Ok(false);
        }
        job.status = outcome.status().as_str().to_string();
        job.completed_at = Some(Utc::now());
        job.processing_time_seconds = Some(outcome.processing_time_seconds());
        match outcome {
            JobOutcome::Completed {
                result_url,
                cost_usd,
                ..
            } => {
                job.progress = PROGRESS_DONE;
                job.result_url = Some(result_url.clone());
                job.cost_usd = Some(*cost_usd);
            }
            JobOutcome::Failed { error_message, .. } => {
                job.error_message = Some(error_message.clone());
            }
        }
        Ok(true)
    }

    async fn record_tryon_result(&self, input: &CreateTryOnResult) -> Result<(), StoreError> {
        self.state.lock().unwrap().tryon_rows.push(input.clone());
        Ok(())
    }
}

#[async_trait]
impl WorkerStateStore for FakeStore {
    async fn register(&self, _worker_id: &str, _backend: &str) -> Result<(), StoreError> {
        self.state.lock().unwrap().registered = true;
        Ok(())
    }

    async fn mark_ready(&self, _worker_id: &str) -> Result<(), StoreError> {
        self.state.lock().unwrap().ready = true;
        Ok(())
    }

    async fn set_status(
        &self,
        _worker_id: &str,
        status: InstanceStatus,
        current_batch_size: i32,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_status {
            return Err(Self::unavailable("set_status"));
        }
        state.status_log.push((status, current_batch_size));
        Ok(())
    }

    async fn heartbeat(&self, _worker_id: &str) -> Result<(), StoreError> {
        self.state.lock().unwrap().heartbeats += 1;
        Ok(())
    }

    async fn record_job_completed(&self, _worker_id: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_counters {
            return Err(Self::unavailable("record_job_completed"));
        }
        state.jobs_processed += 1;
        Ok(())
    }

    async fn record_job_failed(&self, _worker_id: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_counters {
            return Err(Self::unavailable("record_job_failed"));
        }
        state.jobs_failed += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Render backend
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct BackendState {
    pub ready: bool,
    pub submit_error: Option<RenderBackendError>,
    pub submitted: Vec<RenderGraph>,
    pub staged: Vec<String>,
    /// Popped once per poll; empty means no progress report.
    pub progress: VecDeque<StepProgress>,
    /// Popped once per poll; empty means `Pending`.
    pub results: VecDeque<Result<PollResult, RenderBackendError>>,
    pub polls: usize,
    pub artifact: Vec<u8>,
    pub fail_artifact: bool,
    pub released: Vec<String>,
}

#[derive(Default)]
pub struct FakeBackend {
    pub state: Mutex<BackendState>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        let backend = Self::default();
        backend.state.lock().unwrap().ready = true;
        backend.state.lock().unwrap().artifact = vec![0xFF, 0xD8, 0xFF];
        Arc::new(backend)
    }

    pub fn script(
        &self,
        progress: Vec<StepProgress>,
        results: Vec<Result<PollResult, RenderBackendError>>,
    ) {
        let mut state = self.state.lock().unwrap();
        state.progress = progress.into();
        state.results = results.into();
    }

    pub fn submitted(&self) -> usize {
        self.state.lock().unwrap().submitted.len()
    }
}

pub fn ready(filename: &str) -> Result<PollResult, RenderBackendError> {
    Ok(PollResult::Ready(ArtifactLocation {
        filename: filename.to_string(),
        subfolder: String::new(),
        folder_type: "output".to_string(),
    }))
}

pub fn pending() -> Result<PollResult, RenderBackendError> {
    Ok(PollResult::Pending)
}

#[async_trait]
impl RenderBackend for FakeBackend {
    fn name(&self) -> &str {
        "fake"
    }

    async fn is_ready(&self) -> bool {
        self.state.lock().unwrap().ready
    }

    async fn stage_input(
        &self,
        filename: &str,
        _bytes: Vec<u8>,
    ) -> Result<String, RenderBackendError> {
        self.state.lock().unwrap().staged.push(filename.to_string());
        Ok(filename.to_string())
    }

    async fn submit(&self, graph: &RenderGraph) -> Result<TaskHandle, RenderBackendError> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.submit_error.clone() {
            return Err(err);
        }
        state.submitted.push(graph.clone());
        Ok(TaskHandle(format!("prompt-{}", state.submitted.len())))
    }

    async fn poll_progress(&self, _handle: &TaskHandle) -> Option<StepProgress> {
        self.state.lock().unwrap().progress.pop_front()
    }

    async fn poll_result(
        &self,
        _handle: &TaskHandle,
        _output_selector: &str,
    ) -> Result<PollResult, RenderBackendError> {
        let mut state = self.state.lock().unwrap();
        state.polls += 1;
        state.results.pop_front().unwrap_or(Ok(PollResult::Pending))
    }

    async fn fetch_artifact(
        &self,
        location: &ArtifactLocation,
    ) -> Result<Vec<u8>, RenderBackendError> {
        let state = self.state.lock().unwrap();
        if state.fail_artifact {
            return Err(RenderBackendError::Protocol(format!(
                "Artifact {} is empty",
                location.filename
            )));
        }
        Ok(state.artifact.clone())
    }

    async fn release(&self, handle: &TaskHandle) {
        self.state
            .lock()
            .unwrap()
            .released
            .push(handle.as_str().to_string());
    }
}

// ---------------------------------------------------------------------------
// Asset storage
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct AssetState {
    pub downloads: Vec<String>,
    pub uploads: Vec<(String, String)>,
    pub fail_download: bool,
    pub fail_upload: bool,
}

#[derive(Default)]
pub struct FakeAssets {
    pub state: Mutex<AssetState>,
}

impl FakeAssets {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl AssetStore for FakeAssets {
    async fn download(&self, url: &str) -> Result<Vec<u8>, StorageError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_download {
            return Err(StorageError::DownloadStatus {
                url: url.to_string(),
                status: 404,
            });
        }
        state.downloads.push(url.to_string());
        Ok(vec![1, 2, 3])
    }

    async fn upload(
        &self,
        key: &str,
        _bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StorageError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_upload {
            return Err(StorageError::Upload {
                key: key.to_string(),
                message: "bucket not found".to_string(),
            });
        }
        state
            .uploads
            .push((key.to_string(), content_type.to_string()));
        Ok(format!("https://cdn.example.com/avatars/{key}"))
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

pub fn executor_config() -> ExecutorConfig {
    ExecutorConfig {
        worker_id: WORKER_ID.to_string(),
        backend_tag: "vast".to_string(),
        render_timeout: Duration::from_secs(300),
        render_poll_interval: Duration::from_secs(3),
        cost_per_job_usd: 0.005,
    }
}

pub fn executor(
    store: &Arc<FakeStore>,
    backend: &Arc<FakeBackend>,
    assets: &Arc<FakeAssets>,
) -> JobExecutor {
    JobExecutor::new(
        store.clone(),
        store.clone(),
        backend.clone(),
        assets.clone(),
        KindRegistry::with_defaults(),
        executor_config(),
    )
}
