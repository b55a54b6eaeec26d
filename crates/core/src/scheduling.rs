//! Batch admission bounds and queue ordering.
//!
//! The queue is ordered by descending priority, then ascending creation
//! time: priority pre-empts first-come-first-served, and within one
//! priority the oldest job goes first. The batch bounds cap how many
//! jobs one scheduling cycle admits; they do not imply parallelism.

use std::cmp::Ordering;

use crate::error::CoreError;
use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Smallest batch a cycle will ever request.
pub const MIN_BATCH_SIZE: u32 = 1;

/// Default upper bound on jobs fetched per cycle.
pub const DEFAULT_MAX_BATCH_SIZE: u32 = 12;

// ---------------------------------------------------------------------------
// Bounds
// ---------------------------------------------------------------------------

/// Validated batch admission caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchBounds {
    min: u32,
    max: u32,
}

impl BatchBounds {
    /// Build bounds, rejecting `min < 1` and `max < min`.
    pub fn new(min: u32, max: u32) -> Result<Self, CoreError> {
        if min < MIN_BATCH_SIZE {
            return Err(CoreError::Validation(format!(
                "MIN_BATCH_SIZE must be at least {MIN_BATCH_SIZE}, got {min}"
            )));
        }
        if max < min {
            return Err(CoreError::Validation(format!(
                "MAX_BATCH_SIZE ({max}) must not be smaller than MIN_BATCH_SIZE ({min})"
            )));
        }
        Ok(Self { min, max })
    }

    pub fn min(&self) -> u32 {
        self.min
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    /// The `LIMIT` used when fetching a batch.
    pub fn fetch_limit(&self) -> i64 {
        i64::from(self.max)
    }
}

impl Default for BatchBounds {
    fn default() -> Self {
        Self {
            min: MIN_BATCH_SIZE,
            max: DEFAULT_MAX_BATCH_SIZE,
        }
    }
}

// ---------------------------------------------------------------------------
// Ordering
// ---------------------------------------------------------------------------

/// Anything that sits in the pending queue.
pub trait QueueOrdered {
    fn priority(&self) -> i32;
    fn created_at(&self) -> Timestamp;
}

/// Admission order: higher priority first, then older first.
pub fn admission_order<T: QueueOrdered>(a: &T, b: &T) -> Ordering {
    b.priority()
        .cmp(&a.priority())
        .then_with(|| a.created_at().cmp(&b.created_at()))
}

/// Sort in admission order and keep at most `bounds.max()` entries.
pub fn select_batch<T: QueueOrdered>(mut candidates: Vec<T>, bounds: &BatchBounds) -> Vec<T> {
    candidates.sort_by(admission_order);
    candidates.truncate(bounds.max() as usize);
    candidates
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;

    struct Queued {
        name: &'static str,
        priority: i32,
        created_at: Timestamp,
    }

    impl QueueOrdered for Queued {
        fn priority(&self) -> i32 {
            self.priority
        }
        fn created_at(&self) -> Timestamp {
            self.created_at
        }
    }

    fn names(batch: &[Queued]) -> Vec<&'static str> {
        batch.iter().map(|q| q.name).collect()
    }

    #[test]
    fn priority_then_fcfs() {
        let t0 = Utc::now();
        let jobs = vec![
            Queued { name: "C", priority: 1, created_at: t0 + Duration::seconds(2) },
            Queued { name: "B", priority: 5, created_at: t0 + Duration::seconds(1) },
            Queued { name: "A", priority: 5, created_at: t0 },
        ];
        let batch = select_batch(jobs, &BatchBounds::default());
        assert_eq!(names(&batch), vec!["A", "B", "C"]);
    }

    #[test]
    fn high_priority_newcomer_jumps_the_queue() {
        let t0 = Utc::now();
        let jobs = vec![
            Queued { name: "old", priority: 0, created_at: t0 },
            Queued { name: "urgent", priority: 9, created_at: t0 + Duration::hours(1) },
        ];
        let batch = select_batch(jobs, &BatchBounds::default());
        assert_eq!(names(&batch), vec!["urgent", "old"]);
    }

    #[test]
    fn batch_is_capped_at_max() {
        let t0 = Utc::now();
        let jobs = (0..20)
            .map(|i| Queued { name: "j", priority: 0, created_at: t0 + Duration::seconds(i) })
            .collect();
        let bounds = BatchBounds::new(1, 4).unwrap();
        assert_eq!(select_batch(jobs, &bounds).len(), 4);
    }

    #[test]
    fn bounds_validation() {
        assert!(BatchBounds::new(0, 12).is_err());
        assert!(BatchBounds::new(5, 4).is_err());
        let b = BatchBounds::new(1, 1).unwrap();
        assert_eq!(b.fetch_limit(), 1);
    }

    #[test]
    fn default_bounds() {
        let b = BatchBounds::default();
        assert_eq!(b.min(), 1);
        assert_eq!(b.max(), 12);
    }
}
