//! Repository for the `vast_instances` fleet table.
//!
//! Each worker process only ever touches its own row. Updates that match
//! no row (the fleet manager removed it) surface as
//! [`sqlx::Error::RowNotFound`] so callers can log them.

use looks_core::worker_state::{HealthStatus, InstanceStatus};
use sqlx::postgres::PgQueryResult;
use sqlx::PgPool;

use crate::models::worker_instance::WorkerInstance;

/// Column list for `vast_instances` queries.
const COLUMNS: &str = "\
    worker_id, backend, status, health_status, current_batch_size, \
    jobs_processed, jobs_failed, last_heartbeat_at, last_job_at, ready_at, \
    created_at, updated_at";

/// Provides upserts and counter bumps for a worker's own fleet row.
pub struct WorkerInstanceRepo;

impl WorkerInstanceRepo {
    /// Create the row for this process, or reset it to `booting` if a row
    /// with the same worker id survives from an earlier run. Counters are
    /// preserved across restarts.
    pub async fn register(
        pool: &PgPool,
        worker_id: &str,
        backend: &str,
    ) -> Result<WorkerInstance, sqlx::Error> {
        let query = format!(
            "INSERT INTO vast_instances (worker_id, backend, status, health_status) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (worker_id) DO UPDATE SET \
                backend = EXCLUDED.backend, \
                status = EXCLUDED.status, \
                health_status = EXCLUDED.health_status, \
                current_batch_size = 0, \
                updated_at = NOW() \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, WorkerInstance>(&query)
            .bind(worker_id)
            .bind(backend)
            .bind(InstanceStatus::Booting.as_str())
            .bind(HealthStatus::Unknown.as_str())
            .fetch_one(pool)
            .await
    }

    /// Find a worker row by id.
    pub async fn find(pool: &PgPool, worker_id: &str) -> Result<Option<WorkerInstance>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM vast_instances WHERE worker_id = $1");
        sqlx::query_as::<_, WorkerInstance>(&query)
            .bind(worker_id)
            .fetch_optional(pool)
            .await
    }

    /// Record that the render backend answered its readiness probe.
    pub async fn mark_ready(pool: &PgPool, worker_id: &str) -> Result<(), sqlx::Error> {
        let result = sqlx::query(
            "UPDATE vast_instances \
             SET status = $2, ready_at = NOW(), health_status = $3, updated_at = NOW() \
             WHERE worker_id = $1",
        )
        .bind(worker_id)
        .bind(InstanceStatus::Ready.as_str())
        .bind(HealthStatus::Healthy.as_str())
        .execute(pool)
        .await?;
        expect_row(result)
    }

    /// Set the availability status and the size of the batch in hand.
    pub async fn set_status(
        pool: &PgPool,
        worker_id: &str,
        status: InstanceStatus,
        current_batch_size: i32,
    ) -> Result<(), sqlx::Error> {
        let result = sqlx::query(
            "UPDATE vast_instances \
             SET status = $2, current_batch_size = $3, updated_at = NOW() \
             WHERE worker_id = $1",
        )
        .bind(worker_id)
        .bind(status.as_str())
        .bind(current_batch_size)
        .execute(pool)
        .await?;
        expect_row(result)
    }

    /// Touch the heartbeat timestamp and mark the instance healthy.
    pub async fn heartbeat(pool: &PgPool, worker_id: &str) -> Result<(), sqlx::Error> {
        let result = sqlx::query(
            "UPDATE vast_instances \
             SET last_heartbeat_at = NOW(), health_status = $2, updated_at = NOW() \
             WHERE worker_id = $1",
        )
        .bind(worker_id)
        .bind(HealthStatus::Healthy.as_str())
        .execute(pool)
        .await?;
        expect_row(result)
    }

    /// Bump `jobs_processed` and `last_job_at` after a completed job.
    pub async fn record_job_completed(pool: &PgPool, worker_id: &str) -> Result<(), sqlx::Error> {
        let result = sqlx::query(
            "UPDATE vast_instances \
             SET jobs_processed = jobs_processed + 1, last_job_at = NOW(), updated_at = NOW() \
             WHERE worker_id = $1",
        )
        .bind(worker_id)
        .execute(pool)
        .await?;
        expect_row(result)
    }

    /// Bump `jobs_failed` after a failed job.
    pub async fn record_job_failed(pool: &PgPool, worker_id: &str) -> Result<(), sqlx::Error> {
        let result = sqlx::query(
            "UPDATE vast_instances \
             SET jobs_failed = jobs_failed + 1, last_job_at = NOW(), updated_at = NOW() \
             WHERE worker_id = $1",
        )
        .bind(worker_id)
        .execute(pool)
        .await?;
        expect_row(result)
    }
}

fn expect_row(result: PgQueryResult) -> Result<(), sqlx::Error> {
    if result.rows_affected() == 0 {
        Err(sqlx::Error::RowNotFound)
    } else {
        Ok(())
    }
}
