//! Exponential backoff for re-establishing the progress WebSocket.
//!
//! The socket only feeds progress; losing it never fails a job. The
//! listener keeps retrying until the socket is back or the worker is
//! shutting down.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::client::{ComfyUIClient, ComfyUIStream};

/// Backoff parameters.
#[derive(Debug, Clone)]
pub struct Backoff {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl Backoff {
    /// Delay after `current`, clamped to `max_delay`.
    pub fn next_delay(&self, current: Duration) -> Duration {
        let next_ms = (current.as_millis() as f64 * self.multiplier) as u64;
        Duration::from_millis(next_ms).min(self.max_delay)
    }
}

/// Connect, retrying with backoff. `None` means the token was cancelled.
pub async fn connect_with_backoff(
    client: &ComfyUIClient,
    backoff: &Backoff,
    cancel: &CancellationToken,
) -> Option<ComfyUIStream> {
    let mut delay = backoff.initial_delay;
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        tokio::select! {
            _ = cancel.cancelled() => return None,
            result = client.connect() => match result {
                Ok(stream) => {
                    if attempt > 1 {
                        tracing::info!(attempt, "Progress socket reconnected");
                    }
                    return Some(stream);
                }
                Err(e) => {
                    tracing::warn!(
                        attempt,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Progress socket connect failed",
                    );
                }
            },
        }

        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(delay) => {}
        }

        delay = backoff.next_delay(delay);
    }
}
