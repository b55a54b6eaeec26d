//! Store seam between the orchestration loop and the database.
//!
//! [`JobStore`] covers the job queue and result destinations;
//! [`WorkerStateStore`] covers this process's fleet row. [`PgStore`]
//! implements both over the `looks-db` repositories. Tests substitute
//! in-memory fakes.

use async_trait::async_trait;
use looks_core::job_lifecycle::JobOutcome;
use looks_core::types::DbId;
use looks_core::worker_state::InstanceStatus;
use looks_db::models::job::{ClaimMetadata, Job};
use looks_db::models::tryon_result::CreateTryOnResult;
use looks_db::repositories::{JobRepo, TryOnResultRepo, WorkerInstanceRepo};
use looks_db::DbPool;

use crate::error::StoreError;

/// Job queue operations.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Pending jobs for `affinity`, priority desc then created_at asc.
    async fn fetch_batch(&self, affinity: &str, limit: i64) -> Result<Vec<Job>, StoreError>;

    /// `pending -> processing`. `false` means another worker won.
    async fn claim(&self, job_id: DbId, metadata: &ClaimMetadata) -> Result<bool, StoreError>;

    /// Raise progress (clamped to 99). `false` when nothing changed.
    async fn update_progress(
        &self,
        job_id: DbId,
        progress: i16,
        message: Option<&str>,
    ) -> Result<bool, StoreError>;

    /// Single terminal write. `false` when the job was not `processing`.
    async fn finalize(&self, job_id: DbId, outcome: &JobOutcome) -> Result<bool, StoreError>;

    /// Insert a `tryon_results` row.
    async fn record_tryon_result(&self, input: &CreateTryOnResult) -> Result<(), StoreError>;
}

/// Writes to this worker's fleet row.
#[async_trait]
pub trait WorkerStateStore: Send + Sync {
    async fn register(&self, worker_id: &str, backend: &str) -> Result<(), StoreError>;
    async fn mark_ready(&self, worker_id: &str) -> Result<(), StoreError>;
    async fn set_status(
        &self,
        worker_id: &str,
        status: InstanceStatus,
        current_batch_size: i32,
    ) -> Result<(), StoreError>;
    async fn heartbeat(&self, worker_id: &str) -> Result<(), StoreError>;
    async fn record_job_completed(&self, worker_id: &str) -> Result<(), StoreError>;
    async fn record_job_failed(&self, worker_id: &str) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// PostgreSQL
// ---------------------------------------------------------------------------

/// Both stores over a shared connection pool.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgStore {
    async fn fetch_batch(&self, affinity: &str, limit: i64) -> Result<Vec<Job>, StoreError> {
        Ok(JobRepo::fetch_pending_batch(&self.pool, affinity, limit).await?)
    }

    async fn claim(&self, job_id: DbId, metadata: &ClaimMetadata) -> Result<bool, StoreError> {
        Ok(JobRepo::claim(&self.pool, job_id, metadata).await?)
    }

    async fn update_progress(
        &self,
        job_id: DbId,
        progress: i16,
        message: Option<&str>,
    ) -> Result<bool, StoreError> {
        Ok(JobRepo::update_progress(&self.pool, job_id, progress, message).await?)
    }

    async fn finalize(&self, job_id: DbId, outcome: &JobOutcome) -> Result<bool, StoreError> {
        Ok(JobRepo::finalize(&self.pool, job_id, outcome).await?)
    }

    async fn record_tryon_result(&self, input: &CreateTryOnResult) -> Result<(), StoreError> {
        TryOnResultRepo::create(&self.pool, input).await?;
        Ok(())
    }
}

#[async_trait]
impl WorkerStateStore for PgStore {
    async fn register(&self, worker_id: &str, backend: &str) -> Result<(), StoreError> {
        WorkerInstanceRepo::register(&self.pool, worker_id, backend).await?;
        Ok(())
    }

    async fn mark_ready(&self, worker_id: &str) -> Result<(), StoreError> {
        Ok(WorkerInstanceRepo::mark_ready(&self.pool, worker_id).await?)
    }

    async fn set_status(
        &self,
        worker_id: &str,
        status: InstanceStatus,
        current_batch_size: i32,
    ) -> Result<(), StoreError> {
        Ok(WorkerInstanceRepo::set_status(&self.pool, worker_id, status, current_batch_size).await?)
    }

    async fn heartbeat(&self, worker_id: &str) -> Result<(), StoreError> {
        Ok(WorkerInstanceRepo::heartbeat(&self.pool, worker_id).await?)
    }

    async fn record_job_completed(&self, worker_id: &str) -> Result<(), StoreError> {
        Ok(WorkerInstanceRepo::record_job_completed(&self.pool, worker_id).await?)
    }

    async fn record_job_failed(&self, worker_id: &str) -> Result<(), StoreError> {
        Ok(WorkerInstanceRepo::record_job_failed(&self.pool, worker_id).await?)
    }
}
