//! ComfyUI WebSocket frames.
//!
//! ComfyUI sends JSON text frames shaped `{"type": "<kind>", "data": {...}}`.
//! Only the kinds that move a prompt's progress are modelled; anything
//! else parses to [`ComfyUIMessage::Other`] so the listener can skip it
//! without logging a parse failure for every status broadcast.

use serde::Deserialize;

/// Frames the progress listener cares about.
#[derive(Debug, Clone)]
pub enum ComfyUIMessage {
    /// A prompt has started executing.
    ExecutionStart(PromptRef),
    /// A node is executing, or the prompt finished when `node` is `None`.
    Executing(ExecutingData),
    /// Step progress from a sampler-style node.
    Progress(ProgressData),
    /// The prompt failed inside a node.
    ExecutionError(ErrorData),
    /// The prompt was interrupted on the server.
    ExecutionInterrupted(PromptRef),
    /// Any other frame type (`status`, `executed`, `execution_cached`, ...).
    Other,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PromptRef {
    pub prompt_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutingData {
    pub node: Option<String>,
    /// Older servers omit the prompt id on the final `executing` frame.
    #[serde(default)]
    pub prompt_id: Option<String>,
}

/// Payload for `progress` frames.
///
/// Newer ComfyUI builds tag progress with `prompt_id`; older ones do not,
/// in which case the listener attributes it to the prompt that last
/// started executing.
#[derive(Debug, Clone, Deserialize)]
pub struct ProgressData {
    pub value: u32,
    pub max: u32,
    #[serde(default)]
    pub prompt_id: Option<String>,
    #[serde(default)]
    pub node: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorData {
    pub prompt_id: String,
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub exception_message: String,
}

/// Parse a text frame. Malformed JSON is an error; unknown types are not.
pub fn parse_message(text: &str) -> Result<ComfyUIMessage, serde_json::Error> {
    let Envelope { kind, data } = serde_json::from_str(text)?;
    let message = match kind.as_str() {
        "execution_start" => ComfyUIMessage::ExecutionStart(serde_json::from_value(data)?),
        "executing" => ComfyUIMessage::Executing(serde_json::from_value(data)?),
        "progress" => ComfyUIMessage::Progress(serde_json::from_value(data)?),
        "execution_error" => ComfyUIMessage::ExecutionError(serde_json::from_value(data)?),
        "execution_interrupted" => {
            ComfyUIMessage::ExecutionInterrupted(serde_json::from_value(data)?)
        }
        _ => ComfyUIMessage::Other,
    };
    Ok(message)
}
