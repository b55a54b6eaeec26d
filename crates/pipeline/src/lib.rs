//! Job orchestration for the LOOKS render worker.
//!
//! The executor drives a claimed job through staging, dispatch, bounded
//! polling and publishing; the scheduler admits batches from the queue.
//! Both talk to the outside world only through the [`store`],
//! [`storage`] and [`looks_core::render`] seams.

pub mod error;
pub mod executor;
pub mod input;
pub mod kinds;
pub mod scheduler;
pub mod storage;
pub mod store;

pub use error::{BookkeepingError, JobError, StoreError};
pub use executor::{ExecutionReport, ExecutorConfig, JobDisposition, JobExecutor};
pub use scheduler::{BatchScheduler, CycleReport};
