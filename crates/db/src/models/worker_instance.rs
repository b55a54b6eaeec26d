//! Worker fleet row in `vast_instances`.

use std::str::FromStr;

use looks_core::error::CoreError;
use looks_core::types::Timestamp;
use looks_core::worker_state::{HealthStatus, InstanceStatus};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `vast_instances` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct WorkerInstance {
    pub worker_id: String,
    pub backend: String,
    pub status: String,
    pub health_status: String,
    pub current_batch_size: i32,
    pub jobs_processed: i32,
    pub jobs_failed: i32,
    pub last_heartbeat_at: Option<Timestamp>,
    pub last_job_at: Option<Timestamp>,
    pub ready_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl WorkerInstance {
    pub fn status(&self) -> Result<InstanceStatus, CoreError> {
        InstanceStatus::from_str(&self.status)
    }

    pub fn health_status(&self) -> Result<HealthStatus, CoreError> {
        HealthStatus::from_str(&self.health_status)
    }
}
