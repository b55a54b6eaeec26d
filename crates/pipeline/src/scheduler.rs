//! One scheduling cycle: fetch a batch, flag the worker busy or idle,
//! run the batch sequentially.

use std::sync::Arc;

use looks_core::scheduling::{select_batch, BatchBounds};
use looks_core::worker_state::InstanceStatus;

use crate::error::{BookkeepingError, StoreError};
use crate::executor::{JobDisposition, JobExecutor};
use crate::store::{JobStore, WorkerStateStore};

/// Tally of one cycle.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub fetched: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub bookkeeping: Vec<BookkeepingError>,
}

impl CycleReport {
    pub fn is_empty(&self) -> bool {
        self.fetched == 0
    }
}

pub struct BatchScheduler {
    store: Arc<dyn JobStore>,
    worker_state: Arc<dyn WorkerStateStore>,
    executor: JobExecutor,
    affinity: String,
    bounds: BatchBounds,
}

impl BatchScheduler {
    pub fn new(
        store: Arc<dyn JobStore>,
        worker_state: Arc<dyn WorkerStateStore>,
        executor: JobExecutor,
        affinity: impl Into<String>,
        bounds: BatchBounds,
    ) -> Self {
        Self {
            store,
            worker_state,
            executor,
            affinity: affinity.into(),
            bounds,
        }
    }

    pub fn bounds(&self) -> &BatchBounds {
        &self.bounds
    }

    /// Run one cycle. An empty report means the caller should sleep.
    ///
    /// `Err` means the queue could not be read or a claim could not be
    /// attempted; jobs already executed in this cycle keep their results.
    pub async fn run_cycle(&self) -> Result<CycleReport, StoreError> {
        let worker_id = self.executor.config().worker_id.as_str();
        let candidates = self
            .store
            .fetch_batch(&self.affinity, self.bounds.fetch_limit())
            .await?;
        let batch = select_batch(candidates, &self.bounds);

        let mut report = CycleReport {
            fetched: batch.len(),
            ..Default::default()
        };

        if batch.is_empty() {
            self.set_status(worker_id, InstanceStatus::Idle, 0, &mut report)
                .await;
            return Ok(report);
        }

        tracing::info!(batch_size = batch.len(), "Processing batch");
        let size = i32::try_from(batch.len()).unwrap_or(i32::MAX);
        self.set_status(worker_id, InstanceStatus::Busy, size, &mut report)
            .await;

        for job in &batch {
            let outcome = self.executor.execute(job).await?;
            match outcome.disposition {
                JobDisposition::Skipped => report.skipped += 1,
                JobDisposition::Completed { .. } => report.completed += 1,
                JobDisposition::Failed { .. } => report.failed += 1,
            }
            report.bookkeeping.extend(outcome.bookkeeping);
        }

        tracing::info!(
            completed = report.completed,
            failed = report.failed,
            skipped = report.skipped,
            "Batch finished",
        );
        Ok(report)
    }

    async fn set_status(
        &self,
        worker_id: &str,
        status: InstanceStatus,
        size: i32,
        report: &mut CycleReport,
    ) {
        if let Err(e) = self.worker_state.set_status(worker_id, status, size).await {
            tracing::warn!(worker_id, status = %status, error = %e, "Instance status update failed");
            report
                .bookkeeping
                .push(BookkeepingError::new("set_status", e));
        }
    }
}
