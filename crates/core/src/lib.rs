//! Domain types and pure logic shared by every LOOKS worker crate.
//!
//! Nothing in here talks to the network or the database. Job lifecycle
//! rules, batch bounds, progress mapping and deadline bookkeeping live
//! here so they can be unit-tested in isolation and reused by both the
//! repositories and the orchestration core.

#[macro_use]
mod status;

pub mod error;
pub mod job_lifecycle;
pub mod polling;
pub mod render;
pub mod scheduling;
pub mod types;
pub mod worker_state;
