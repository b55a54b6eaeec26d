//! Interpretation of `/history/{prompt_id}` bodies.
//!
//! The body is an object keyed by prompt id. The key is absent while the
//! prompt is queued or running; once present, the prompt has finished,
//! either with outputs or with an error in `status`.

use looks_core::render::{ArtifactLocation, PollResult};
use serde_json::Value;

/// Turn a history body into a poll observation for one prompt.
pub fn interpret_history(body: &Value, prompt_id: &str, output_selector: &str) -> PollResult {
    let Some(entry) = body.get(prompt_id) else {
        return PollResult::Pending;
    };

    let status = entry.get("status");
    let status_str = status
        .and_then(|s| s.get("status_str"))
        .and_then(Value::as_str);

    if status_str == Some("error") {
        return PollResult::Failed(error_reason(status));
    }

    let first_image = entry
        .get("outputs")
        .and_then(|o| o.get(output_selector))
        .and_then(|node| node.get("images"))
        .and_then(Value::as_array)
        .and_then(|images| images.first());

    if let Some(image) = first_image {
        return match serde_json::from_value::<ArtifactLocation>(image.clone()) {
            Ok(location) => PollResult::Ready(location),
            Err(e) => PollResult::Failed(format!(
                "Malformed image entry in node {output_selector}: {e}"
            )),
        };
    }

    // A present entry with `completed: false` and no error is still being
    // written by the server.
    let completed = status
        .and_then(|s| s.get("completed"))
        .and_then(Value::as_bool);
    if completed == Some(false) && status_str.is_none() {
        return PollResult::Pending;
    }

    PollResult::Failed(format!(
        "Workflow finished without image in node {output_selector}"
    ))
}

/// Pull the exception message out of an `execution_error` status entry.
fn error_reason(status: Option<&Value>) -> String {
    status
        .and_then(|s| s.get("messages"))
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_array)
        .find(|pair| pair.first().and_then(Value::as_str) == Some("execution_error"))
        .and_then(|pair| pair.get(1))
        .and_then(|data| {
            let message = data.get("exception_message").and_then(Value::as_str)?;
            let node = data.get("node_id").and_then(Value::as_str);
            Some(match node {
                Some(node) => format!("ComfyUI error in node {node}: {}", message.trim()),
                None => format!("ComfyUI error: {}", message.trim()),
            })
        })
        .unwrap_or_else(|| "ComfyUI reported an execution error".to_string())
}
