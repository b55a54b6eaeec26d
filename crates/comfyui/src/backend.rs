//! [`RenderBackend`] implementation for a local ComfyUI server.

use async_trait::async_trait;
use looks_core::render::{
    ArtifactLocation, PollResult, RenderBackend, RenderBackendError, RenderGraph, StepProgress,
    TaskHandle,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::{ComfyUIApi, ComfyUIApiError};
use crate::client::ComfyUIClient;
use crate::history::interpret_history;
use crate::reconnect::Backoff;
use crate::tracker::ProgressTracker;

/// ComfyUI over REST, with step progress from the WebSocket.
pub struct ComfyUIBackend {
    api: ComfyUIApi,
    client: ComfyUIClient,
    tracker: ProgressTracker,
}

impl ComfyUIBackend {
    /// * `api_url`   - e.g. `http://127.0.0.1:8188`.
    /// * `client_id` - stable id for this worker; progress frames are
    ///   routed by it.
    pub fn new(api_url: &str, client_id: impl Into<String>) -> Self {
        let api = ComfyUIApi::new(api_url);
        let client = ComfyUIClient::from_api_url(api.api_url(), client_id);
        Self {
            api,
            client,
            tracker: ProgressTracker::new(),
        }
    }

    pub fn api_url(&self) -> &str {
        self.api.api_url()
    }

    /// Start the background progress listener.
    pub fn start_progress_listener(&self, cancel: CancellationToken) -> JoinHandle<()> {
        self.tracker
            .spawn_listener(self.client.clone(), Backoff::default(), cancel)
    }
}

impl From<ComfyUIApiError> for RenderBackendError {
    fn from(err: ComfyUIApiError) -> Self {
        match err {
            ComfyUIApiError::Request(e) => RenderBackendError::Unreachable(e.to_string()),
            ComfyUIApiError::ApiError { status, body } => {
                RenderBackendError::Rejected { status, body }
            }
        }
    }
}

#[async_trait]
impl RenderBackend for ComfyUIBackend {
    fn name(&self) -> &str {
        "comfyui"
    }

    async fn is_ready(&self) -> bool {
        match self.api.system_stats().await {
            Ok(()) => true,
            Err(e) => {
                tracing::trace!(error = %e, "ComfyUI readiness probe failed");
                false
            }
        }
    }

    async fn stage_input(
        &self,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<String, RenderBackendError> {
        let uploaded = self.api.upload_image(filename, bytes).await?;
        // Graphs reference inputs as `subfolder/name` when a subfolder is used.
        if uploaded.subfolder.is_empty() {
            Ok(uploaded.name)
        } else {
            Ok(format!("{}/{}", uploaded.subfolder, uploaded.name))
        }
    }

    async fn submit(&self, graph: &RenderGraph) -> Result<TaskHandle, RenderBackendError> {
        let response = self
            .api
            .submit_workflow(&graph.nodes, self.client.client_id())
            .await?;

        match response.prompt_id {
            Some(prompt_id) if !prompt_id.is_empty() => {
                tracing::debug!(
                    prompt_id = %prompt_id,
                    queue_position = response.number,
                    "Workflow queued",
                );
                Ok(TaskHandle(prompt_id))
            }
            _ => Err(RenderBackendError::Protocol(format!(
                "Submission response has no prompt_id (node_errors: {})",
                response.node_errors
            ))),
        }
    }

    async fn poll_progress(&self, handle: &TaskHandle) -> Option<StepProgress> {
        self.tracker.get(handle.as_str()).await
    }

    async fn poll_result(
        &self,
        handle: &TaskHandle,
        output_selector: &str,
    ) -> Result<PollResult, RenderBackendError> {
        let body = self.api.get_history(handle.as_str()).await?;
        let result = interpret_history(&body, handle.as_str(), output_selector);
        if !matches!(result, PollResult::Pending) {
            self.tracker.forget(handle.as_str()).await;
        }
        Ok(result)
    }

    async fn fetch_artifact(
        &self,
        location: &ArtifactLocation,
    ) -> Result<Vec<u8>, RenderBackendError> {
        let bytes = self
            .api
            .view(&location.filename, &location.subfolder, &location.folder_type)
            .await?;
        if bytes.is_empty() {
            return Err(RenderBackendError::Protocol(format!(
                "Artifact {} is empty",
                location.filename
            )));
        }
        Ok(bytes)
    }

    async fn release(&self, handle: &TaskHandle) {
        self.tracker.forget(handle.as_str()).await;
    }
}
