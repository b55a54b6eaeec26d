pub mod job_repo;
pub mod tryon_result_repo;
pub mod worker_instance_repo;

pub use job_repo::JobRepo;
pub use tryon_result_repo::TryOnResultRepo;
pub use worker_instance_repo::WorkerInstanceRepo;
