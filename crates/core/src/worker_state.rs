//! Worker-instance status values for the fleet row.
//!
//! The row in `vast_instances` is owned by the process that created it.
//! The external fleet manager reads these values to decide which rented
//! machines are useful; it is also the only party that deletes rows.

define_text_status! {
    /// Availability of this worker process.
    InstanceStatus ("instance status") {
        /// Process started, render backend not yet confirmed ready.
        Booting = "booting",
        /// Backend confirmed ready, main loop not yet started a cycle.
        Ready = "ready",
        /// Last cycle found no pending jobs.
        Idle = "idle",
        /// A batch is being processed.
        Busy = "busy",
    }
}

define_text_status! {
    /// Health flag refreshed by each heartbeat.
    HealthStatus ("health status") {
        Healthy = "healthy",
        Unknown = "unknown",
    }
}
