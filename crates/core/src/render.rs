//! Contract between the orchestration core and the render backend.
//!
//! The backend accepts a declarative computation graph, returns an opaque
//! task handle, and produces artifacts asynchronously. The core only ever
//! sees the types in this module; the ComfyUI implementation lives in
//! `looks-comfyui`.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{DbId, Timestamp};

/// Opaque identifier returned by the backend for a submitted graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskHandle(pub String);

impl TaskHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A graph ready for submission plus the node whose output is the final
/// artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderGraph {
    pub nodes: serde_json::Value,
    pub output_selector: String,
}

/// Step-level progress reported by a long-running node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepProgress {
    pub step: u32,
    pub total_steps: u32,
}

/// Where the backend put a finished artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactLocation {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    /// Backend folder type, usually `output`.
    #[serde(default = "default_folder_type", rename = "type")]
    pub folder_type: String,
}

fn default_folder_type() -> String {
    "output".to_string()
}

/// One observation of a submitted task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollResult {
    /// The backend has not finished the task yet.
    Pending,
    /// The task finished and the expected output is present.
    Ready(ArtifactLocation),
    /// The task finished with an error, or without the expected output.
    /// This is a hard failure, not a reason to keep polling.
    Failed(String),
}

/// An in-flight submission, discarded once its job is terminal.
#[derive(Debug, Clone)]
pub struct RenderTask {
    pub task_handle: TaskHandle,
    pub owner_job_id: DbId,
    pub output_selector: String,
    pub submitted_at: Timestamp,
}

/// Errors surfaced by a render backend call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RenderBackendError {
    /// Network, DNS, TLS or timeout failure.
    #[error("Render backend unreachable: {0}")]
    Unreachable(String),

    /// The backend answered with a non-2xx status.
    #[error("Render backend rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },

    /// The backend answered 2xx with a body that breaks the protocol.
    #[error("Render backend protocol violation: {0}")]
    Protocol(String),
}

/// Operations the job executor and supervisor need from a render backend.
#[async_trait]
pub trait RenderBackend: Send + Sync {
    /// Short name recorded in job metadata (e.g. `comfyui`).
    fn name(&self) -> &str;

    /// Health probe. Never errors; unreachable means not ready.
    async fn is_ready(&self) -> bool;

    /// Make an input asset available to graphs. Returns the name graphs
    /// should reference.
    async fn stage_input(
        &self,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<String, RenderBackendError>;

    /// Queue a graph for execution.
    async fn submit(&self, graph: &RenderGraph) -> Result<TaskHandle, RenderBackendError>;

    /// Latest step progress, if the backend has reported any.
    async fn poll_progress(&self, handle: &TaskHandle) -> Option<StepProgress>;

    /// Check whether the task has finished and produced `output_selector`.
    async fn poll_result(
        &self,
        handle: &TaskHandle,
        output_selector: &str,
    ) -> Result<PollResult, RenderBackendError>;

    /// Download a finished artifact.
    async fn fetch_artifact(
        &self,
        location: &ArtifactLocation,
    ) -> Result<Vec<u8>, RenderBackendError>;

    /// Drop any state held for a task the caller stopped polling before it
    /// reached a terminal result.
    async fn release(&self, _handle: &TaskHandle) {}
}
