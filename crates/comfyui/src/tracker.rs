//! Step progress per prompt, fed by the ComfyUI WebSocket.
//!
//! A background task holds the socket open (reconnecting with backoff)
//! and records the latest `progress` frame for each prompt. The render
//! backend reads from the shared map; nothing here ever fails a job.

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use looks_core::render::StepProgress;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::client::{ComfyUIClient, ComfyUIStream};
use crate::messages::{parse_message, ComfyUIMessage};
use crate::reconnect::{connect_with_backoff, Backoff};

#[derive(Debug, Default)]
struct TrackerState {
    /// Prompt that most recently started executing. Used for servers
    /// that send `progress` without a `prompt_id`.
    executing: Option<String>,
    progress: HashMap<String, StepProgress>,
}

/// Shared, cloneable view of step progress keyed by prompt id.
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    state: Arc<RwLock<TrackerState>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest step progress for a prompt.
    pub async fn get(&self, prompt_id: &str) -> Option<StepProgress> {
        self.state.read().await.progress.get(prompt_id).copied()
    }

    /// Drop state for a prompt whose job is terminal.
    pub async fn forget(&self, prompt_id: &str) {
        let mut state = self.state.write().await;
        state.progress.remove(prompt_id);
        if state.executing.as_deref() == Some(prompt_id) {
            state.executing = None;
        }
    }

    /// Fold one parsed frame into the map.
    pub async fn apply(&self, message: &ComfyUIMessage) {
        let mut state = self.state.write().await;
        match message {
            ComfyUIMessage::ExecutionStart(data) => {
                state.executing = Some(data.prompt_id.clone());
            }
            ComfyUIMessage::Executing(data) => {
                if data.node.is_none() {
                    state.executing = None;
                } else if let Some(prompt_id) = &data.prompt_id {
                    state.executing = Some(prompt_id.clone());
                }
            }
            ComfyUIMessage::Progress(data) => {
                let prompt_id = data.prompt_id.clone().or_else(|| state.executing.clone());
                match prompt_id {
                    Some(prompt_id) if data.max > 0 => {
                        state.progress.insert(
                            prompt_id,
                            StepProgress {
                                step: data.value.min(data.max),
                                total_steps: data.max,
                            },
                        );
                    }
                    _ => {
                        tracing::trace!(value = data.value, max = data.max, "Unattributed progress frame");
                    }
                }
            }
            ComfyUIMessage::ExecutionError(data) => {
                tracing::debug!(
                    prompt_id = %data.prompt_id,
                    node_id = data.node_id.as_deref().unwrap_or("-"),
                    error = %data.exception_message,
                    "ComfyUI execution error frame",
                );
                if state.executing.as_deref() == Some(data.prompt_id.as_str()) {
                    state.executing = None;
                }
            }
            ComfyUIMessage::ExecutionInterrupted(data) => {
                if state.executing.as_deref() == Some(data.prompt_id.as_str()) {
                    state.executing = None;
                }
            }
            ComfyUIMessage::Other => {}
        }
    }

    /// Spawn the socket listener. Runs until `cancel` fires.
    pub fn spawn_listener(
        &self,
        client: ComfyUIClient,
        backoff: Backoff,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let tracker = self.clone();
        tokio::spawn(async move {
            while let Some(mut stream) = connect_with_backoff(&client, &backoff, &cancel).await {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tracker.drain(&mut stream) => {
                        tracing::warn!(ws_url = %client.ws_url(), "Progress socket dropped, reconnecting");
                    }
                }
            }
            tracing::debug!("Progress listener stopped");
        })
    }

    /// Read frames until the socket closes or errors.
    async fn drain(&self, stream: &mut ComfyUIStream) {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => match parse_message(&text) {
                    Ok(message) => self.apply(&message).await,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to parse ComfyUI frame");
                    }
                },
                // Preview images.
                Ok(Message::Binary(_)) => {}
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                Ok(Message::Close(frame)) => {
                    tracing::info!(?frame, "ComfyUI WebSocket closed");
                    return;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "WebSocket receive error");
                    return;
                }
            }
        }
    }
}
