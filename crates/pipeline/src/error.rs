//! Error types for job execution and worker bookkeeping.

use looks_core::render::RenderBackendError;

use crate::storage::StorageError;

/// Failure of a store call.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Non-database stores (in-memory fakes) report failures here.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Anything that terminates a claimed job as `failed`.
///
/// The display string is what lands in `error_message`.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// `input_data` is missing a required field or has the wrong shape.
    #[error("Invalid input data: {0}")]
    InvalidInput(String),

    /// An input asset could not be downloaded or staged on the backend.
    #[error("Failed to fetch input asset: {0}")]
    AssetFetch(String),

    /// No workflow is registered for the job's kind.
    #[error("Unsupported job kind: {0}")]
    UnsupportedKind(String),

    /// The backend refused the graph or answered without a task handle.
    #[error("Failed to dispatch workflow: {0}")]
    Dispatch(#[source] RenderBackendError),

    /// The backend finished the task with an error or without output.
    #[error("Render failed: {0}")]
    BackendFailure(String),

    /// No result within the render timeout.
    #[error("Render timed out after {0} seconds waiting for the backend")]
    Timeout(u64),

    /// Artifact download, upload or result persistence failed.
    #[error("Failed to publish result: {0}")]
    Publish(String),

    /// A required store write (not bookkeeping) failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl JobError {
    pub(crate) fn asset(err: impl std::fmt::Display) -> Self {
        JobError::AssetFetch(err.to_string())
    }

    pub(crate) fn publish(err: impl std::fmt::Display) -> Self {
        JobError::Publish(err.to_string())
    }
}

impl From<StorageError> for JobError {
    fn from(err: StorageError) -> Self {
        JobError::Publish(err.to_string())
    }
}

/// A best-effort write that failed. Logged and reported, never changes a
/// job's status.
#[derive(Debug, thiserror::Error)]
#[error("Bookkeeping write `{operation}` failed: {source}")]
pub struct BookkeepingError {
    pub operation: &'static str,
    #[source]
    pub source: StoreError,
}

impl BookkeepingError {
    pub fn new(operation: &'static str, source: StoreError) -> Self {
        Self { operation, source }
    }
}
