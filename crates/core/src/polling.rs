//! Bounded waits.
//!
//! Every poll loop in the worker carries an `(interval, deadline)` pair and
//! fails closed when the deadline passes. [`Deadline`] does the clock
//! arithmetic on Tokio's clock so tests can run with paused time;
//! [`poll_until`] is the generic probe-sleep-probe loop used for the
//! startup readiness wait.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

/// A fixed point in time after which a wait gives up.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    timeout: Duration,
}

impl Deadline {
    /// Start counting `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Self {
            started: Instant::now(),
            timeout,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Time left before expiry, zero once expired.
    pub fn remaining(&self) -> Duration {
        self.timeout.saturating_sub(self.elapsed())
    }

    pub fn is_expired(&self) -> bool {
        self.elapsed() >= self.timeout
    }

    /// Sleep for `interval`, or less if the deadline is closer.
    pub async fn sleep_within(&self, interval: Duration) {
        tokio::time::sleep(interval.min(self.remaining())).await;
    }
}

/// Interval and overall timeout for a poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollSchedule {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

/// Result of [`poll_until`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The probe returned `true`.
    Satisfied { attempts: u32, elapsed: Duration },
    /// The deadline passed without a `true` probe.
    TimedOut { attempts: u32 },
}

/// Call `probe` until it returns `true` or `schedule.timeout` elapses.
///
/// The probe receives the attempt number (1-based) and the elapsed time.
/// It is always called once more when the deadline is reached so a
/// service that comes up during the last interval is not missed.
pub async fn poll_until<F, Fut>(schedule: PollSchedule, mut probe: F) -> PollOutcome
where
    F: FnMut(u32, Duration) -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Deadline::after(schedule.timeout);
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        if probe(attempts, deadline.elapsed()).await {
            return PollOutcome::Satisfied {
                attempts,
                elapsed: deadline.elapsed(),
            };
        }
        if deadline.is_expired() {
            return PollOutcome::TimedOut { attempts };
        }
        deadline.sleep_within(schedule.interval).await;
    }
}
