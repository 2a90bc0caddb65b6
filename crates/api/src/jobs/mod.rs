//! Background job scheduler and job implementations.

mod pool_metrics;
mod scheduler;
mod state_cleanup;

pub use pool_metrics::PoolMetricsJob;
pub use scheduler::{Job, JobFrequency, JobScheduler};
pub use state_cleanup::StateCleanupJob;
