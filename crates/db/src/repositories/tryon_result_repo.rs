//! Repository for the `tryon_results` destination table.

use looks_core::types::DbId;
use sqlx::PgPool;

use crate::models::tryon_result::{CreateTryOnResult, TryOnResult};

/// Column list for `tryon_results` queries.
const COLUMNS: &str = "id, user_id, job_id, result_url, products_used, created_at";

pub struct TryOnResultRepo;

impl TryOnResultRepo {
    /// Insert a result row for a finished job.
    pub async fn create(
        pool: &PgPool,
        input: &CreateTryOnResult,
    ) -> Result<TryOnResult, sqlx::Error> {
        let query = format!(
            "INSERT INTO tryon_results (user_id, job_id, result_url, products_used) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, TryOnResult>(&query)
            .bind(input.user_id)
            .bind(input.job_id)
            .bind(&input.result_url)
            .bind(&input.products_used)
            .fetch_one(pool)
            .await
    }

    /// List results for a job (normally zero or one).
    pub async fn list_by_job(pool: &PgPool, job_id: DbId) -> Result<Vec<TryOnResult>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM tryon_results WHERE job_id = $1 ORDER BY created_at ASC"
        );
        sqlx::query_as::<_, TryOnResult>(&query)
            .bind(job_id)
            .fetch_all(pool)
            .await
    }
}
