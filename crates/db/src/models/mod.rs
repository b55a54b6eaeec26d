pub mod job;
pub mod tryon_result;
pub mod worker_instance;
