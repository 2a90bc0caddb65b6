//! HTTP middleware and process-wide telemetry setup.

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::{init_metrics, metrics_handler, metrics_middleware};
