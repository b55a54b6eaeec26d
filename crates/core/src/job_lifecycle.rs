//! Job state machine and progress rules.
//!
//! A job moves `pending -> processing -> {completed, failed}` and never
//! leaves a terminal state. Progress is an integer percentage that only
//! ever goes up while the job is processing and stays at or below
//! [`PROGRESS_MAX_IN_FLIGHT`] until the terminal write sets it to 100.

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Progress written immediately after a successful claim.
pub const PROGRESS_CLAIMED: i16 = 10;

/// Lower edge of the band that backend step counts are mapped into.
pub const PROGRESS_RENDER_START: i16 = 20;

/// Width of the render band (20..=85).
pub const PROGRESS_RENDER_SPAN: i16 = 65;

/// Progress written before the artifact is published.
pub const PROGRESS_PUBLISHING: i16 = 90;

/// Highest value an in-flight job may report.
pub const PROGRESS_MAX_IN_FLIGHT: i16 = 99;

/// Progress written with the `completed` terminal status.
pub const PROGRESS_DONE: i16 = 100;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

define_text_status! {
    /// Lifecycle status of a row in `ai_generation_jobs`.
    JobStatus ("job status") {
        Pending = "pending",
        Processing = "processing",
        Completed = "completed",
        Failed = "failed",
    }
}

impl JobStatus {
    /// `completed` and `failed` have no outgoing edges.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether `self -> next` is an edge of the state machine.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }

    /// Like [`can_transition_to`](Self::can_transition_to) but returns a
    /// typed error naming both ends of the rejected edge.
    pub fn ensure_transition(self, next: JobStatus) -> Result<(), CoreError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(CoreError::IllegalTransition {
                from: self.as_str(),
                to: next.as_str(),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// The single terminal write for a job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed {
        result_url: String,
        processing_time_seconds: f64,
        cost_usd: f64,
    },
    Failed {
        error_message: String,
        processing_time_seconds: f64,
    },
}

impl JobOutcome {
    /// Terminal status this outcome writes.
    pub fn status(&self) -> JobStatus {
        match self {
            JobOutcome::Completed { .. } => JobStatus::Completed,
            JobOutcome::Failed { .. } => JobStatus::Failed,
        }
    }

    pub fn processing_time_seconds(&self) -> f64 {
        match self {
            JobOutcome::Completed {
                processing_time_seconds,
                ..
            }
            | JobOutcome::Failed {
                processing_time_seconds,
                ..
            } => *processing_time_seconds,
        }
    }
}

/// Round elapsed seconds to two decimals for the `processing_time_seconds`
/// column.
pub fn round_seconds(secs: f64) -> f64 {
    (secs * 100.0).round() / 100.0
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Map a backend step report into the render band.
///
/// `20 + floor(step / total_steps * 65)`. Returns `None` when the backend
/// reports zero total steps. Steps beyond the total are treated as done.
pub fn map_step_progress(step: u32, total_steps: u32) -> Option<i16> {
    if total_steps == 0 {
        return None;
    }
    let step = u64::from(step.min(total_steps));
    let scaled = step * PROGRESS_RENDER_SPAN as u64 / u64::from(total_steps);
    Some(PROGRESS_RENDER_START + scaled as i16)
}

/// Clamp a progress value into the in-flight range `0..=99`.
pub fn clamp_in_flight(progress: i16) -> i16 {
    progress.clamp(0, PROGRESS_MAX_IN_FLIGHT)
}

/// Tracks the last progress value written for one job and admits only
/// strictly larger values.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressGate {
    last_written: i16,
}

impl ProgressGate {
    pub fn new(initial: i16) -> Self {
        Self {
            last_written: clamp_in_flight(initial),
        }
    }

    /// The last value that passed the gate.
    pub fn last_written(&self) -> i16 {
        self.last_written
    }

    /// Clamp `candidate` and return it if it is an increase.
    pub fn advance(&mut self, candidate: i16) -> Option<i16> {
        let candidate = clamp_in_flight(candidate);
        if candidate > self.last_written {
            self.last_written = candidate;
            Some(candidate)
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
