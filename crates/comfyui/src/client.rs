//! WebSocket client for a ComfyUI instance.
//!
//! The `client_id` is fixed for the life of the worker. ComfyUI routes
//! progress frames for a prompt only to the socket whose `clientId`
//! matches the `client_id` the prompt was submitted with, so the same id
//! is used for both.

use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

pub type ComfyUIStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Connection settings for one ComfyUI server.
#[derive(Debug, Clone)]
pub struct ComfyUIClient {
    ws_url: String,
    client_id: String,
}

impl ComfyUIClient {
    /// * `ws_url`    - WebSocket base URL, e.g. `ws://127.0.0.1:8188`.
    /// * `client_id` - id sent on the handshake and with every submission.
    pub fn new(ws_url: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into().trim_end_matches('/').to_string(),
            client_id: client_id.into(),
        }
    }

    /// Derive the client from an HTTP API base URL.
    pub fn from_api_url(api_url: &str, client_id: impl Into<String>) -> Self {
        Self::new(ws_url_from_api(api_url), client_id)
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Open `GET {ws_url}/ws?clientId={client_id}`.
    pub async fn connect(&self) -> Result<ComfyUIStream, ComfyUIClientError> {
        let url = format!("{}/ws?clientId={}", self.ws_url, self.client_id);

        let (ws_stream, _response) = connect_async(url.as_str()).await.map_err(|e| {
            ComfyUIClientError::Connection(format!(
                "Failed to connect to ComfyUI at {}: {e}",
                self.ws_url
            ))
        })?;

        tracing::info!(
            client_id = %self.client_id,
            ws_url = %self.ws_url,
            "Connected to ComfyUI WebSocket",
        );

        Ok(ws_stream)
    }
}

/// Map `http(s)://` to `ws(s)://`. Other schemes pass through unchanged.
pub fn ws_url_from_api(api_url: &str) -> String {
    let trimmed = api_url.trim_end_matches('/');
    if let Some(rest) = trimmed.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = trimmed.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        trimmed.to_string()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ComfyUIClientError {
    /// Failed to establish the WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),
}
