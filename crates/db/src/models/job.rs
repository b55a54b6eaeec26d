//! Job entity models for the `ai_generation_jobs` queue table.

use std::str::FromStr;

use looks_core::error::CoreError;
use looks_core::job_lifecycle::JobStatus;
use looks_core::scheduling::QueueOrdered;
use looks_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `ai_generation_jobs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Job {
    pub id: DbId,
    pub user_id: DbId,
    pub job_type: String,
    pub status: String,
    pub priority: i32,
    pub preferred_backend: String,
    pub input_data: serde_json::Value,
    pub progress: i16,
    pub progress_message: Option<String>,
    pub result_url: Option<String>,
    pub result_metadata: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub processing_time_seconds: Option<f64>,
    pub cost_usd: Option<f64>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Job {
    /// Parse the `status` column.
    pub fn status(&self) -> Result<JobStatus, CoreError> {
        JobStatus::from_str(&self.status)
    }
}

impl QueueOrdered for Job {
    fn priority(&self) -> i32 {
        self.priority
    }

    fn created_at(&self) -> Timestamp {
        self.created_at
    }
}

/// DTO for enqueuing a job. The worker never calls this in production;
/// producers and tests do.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateJob {
    pub user_id: DbId,
    pub job_type: String,
    pub priority: Option<i32>,
    pub preferred_backend: String,
    pub input_data: serde_json::Value,
}

/// Metadata written into `result_metadata` when a worker claims a job.
#[derive(Debug, Clone, Serialize)]
pub struct ClaimMetadata {
    pub worker_id: String,
    pub backend: String,
    pub started_at: Timestamp,
}
