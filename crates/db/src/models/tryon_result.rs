use looks_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `tryon_results` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TryOnResult {
    pub id: DbId,
    pub user_id: DbId,
    pub job_id: DbId,
    pub result_url: String,
    pub products_used: serde_json::Value,
    pub created_at: Timestamp,
}

/// DTO for inserting a try-on result.
#[derive(Debug, Clone)]
pub struct CreateTryOnResult {
    pub user_id: DbId,
    pub job_id: DbId,
    pub result_url: String,
    pub products_used: serde_json::Value,
}
