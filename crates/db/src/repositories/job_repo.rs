//! Repository for the `ai_generation_jobs` queue table.
//!
//! Every status write is guarded by the expected current status in the
//! `WHERE` clause, so the database itself rejects illegal transitions:
//! only one worker can move a row out of `pending`, and nothing can move
//! a row out of `completed` or `failed`.

use looks_core::job_lifecycle::{
    clamp_in_flight, JobOutcome, JobStatus, PROGRESS_CLAIMED, PROGRESS_DONE,
};
use looks_core::types::DbId;
use sqlx::PgPool;

use crate::models::job::{ClaimMetadata, CreateJob, Job};

/// Column list for `ai_generation_jobs` queries.
const COLUMNS: &str = "\
    id, user_id, job_type, status, priority, preferred_backend, input_data, \
    progress, progress_message, result_url, result_metadata, error_message, \
    started_at, completed_at, processing_time_seconds, cost_usd, \
    created_at, updated_at";

/// Provides queue operations for render jobs.
pub struct JobRepo;

impl JobRepo {
    /// Enqueue a new pending job.
    pub async fn create(pool: &PgPool, input: &CreateJob) -> Result<Job, sqlx::Error> {
        let query = format!(
            "INSERT INTO ai_generation_jobs \
                 (user_id, job_type, status, priority, preferred_backend, input_data) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(input.user_id)
            .bind(&input.job_type)
            .bind(JobStatus::Pending.as_str())
            .bind(input.priority.unwrap_or(0))
            .bind(&input.preferred_backend)
            .bind(&input.input_data)
            .fetch_one(pool)
            .await
    }

    /// Find a job by its ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Job>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM ai_generation_jobs WHERE id = $1");
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Read up to `limit` pending jobs for a backend, highest priority
    /// first and oldest first within a priority.
    ///
    /// This is a plain read. Two workers may both see the same row; only
    /// [`claim`](Self::claim) decides who gets it.
    pub async fn fetch_pending_batch(
        pool: &PgPool,
        preferred_backend: &str,
        limit: i64,
    ) -> Result<Vec<Job>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM ai_generation_jobs \
             WHERE status = $1 AND preferred_backend = $2 \
             ORDER BY priority DESC, created_at ASC \
             LIMIT $3"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(JobStatus::Pending.as_str())
            .bind(preferred_backend)
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// Conditionally move a job from `pending` to `processing`.
    ///
    /// Sets `started_at`, the initial progress and the claim metadata in
    /// the same statement. Returns `false` when the row was no longer
    /// pending, i.e. another worker won the race.
    pub async fn claim(
        pool: &PgPool,
        job_id: DbId,
        metadata: &ClaimMetadata,
    ) -> Result<bool, sqlx::Error> {
        let metadata = serde_json::to_value(metadata)
            .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
        let result = sqlx::query(
            "UPDATE ai_generation_jobs \
             SET status = $2, started_at = NOW(), progress = $3, \
                 result_metadata = $4, updated_at = NOW() \
             WHERE id = $1 AND status = $5",
        )
        .bind(job_id)
        .bind(JobStatus::Processing.as_str())
        .bind(PROGRESS_CLAIMED)
        .bind(&metadata)
        .bind(JobStatus::Pending.as_str())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Raise the progress of a processing job.
    ///
    /// The value is clamped to `0..=99` and only written when it is larger
    /// than the stored value. Returns whether a row changed.
    pub async fn update_progress(
        pool: &PgPool,
        job_id: DbId,
        progress: i16,
        message: Option<&str>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE ai_generation_jobs \
             SET progress = $2, progress_message = COALESCE($3, progress_message), \
                 updated_at = NOW() \
             WHERE id = $1 AND status = $4 AND progress < $2",
        )
        .bind(job_id)
        .bind(clamp_in_flight(progress))
        .bind(message)
        .bind(JobStatus::Processing.as_str())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Write the terminal status of a processing job.
    ///
    /// Guarded by `status = 'processing'`: a second call for the same job
    /// matches no row and returns `false` without touching anything.
    pub async fn finalize(
        pool: &PgPool,
        job_id: DbId,
        outcome: &JobOutcome,
    ) -> Result<bool, sqlx::Error> {
        let result = match outcome {
            JobOutcome::Completed {
                result_url,
                processing_time_seconds,
                cost_usd,
            } => {
                sqlx::query(
                    "UPDATE ai_generation_jobs \
                     SET status = $2, progress = $3, result_url = $4, \
                         completed_at = NOW(), processing_time_seconds = $5, \
                         cost_usd = $6, updated_at = NOW() \
                     WHERE id = $1 AND status = $7",
                )
                .bind(job_id)
                .bind(JobStatus::Completed.as_str())
                .bind(PROGRESS_DONE)
                .bind(result_url)
                .bind(processing_time_seconds)
                .bind(cost_usd)
                .bind(JobStatus::Processing.as_str())
                .execute(pool)
                .await?
            }
            JobOutcome::Failed {
                error_message,
                processing_time_seconds,
            } => {
                sqlx::query(
                    "UPDATE ai_generation_jobs \
                     SET status = $2, error_message = $3, completed_at = NOW(), \
                         processing_time_seconds = $4, updated_at = NOW() \
                     WHERE id = $1 AND status = $5",
                )
                .bind(job_id)
                .bind(JobStatus::Failed.as_str())
                .bind(error_message)
                .bind(processing_time_seconds)
                .bind(JobStatus::Processing.as_str())
                .execute(pool)
                .await?
            }
        };
        Ok(result.rows_affected() > 0)
    }
}
