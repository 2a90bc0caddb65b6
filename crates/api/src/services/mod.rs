//! In-process infrastructure behind the pipeline ports.

pub mod alert_throttle;
pub mod containment_cache;
pub mod event_stream;

pub use alert_throttle::GovernorAlertThrottle;
pub use containment_cache::InMemoryContainmentCache;
pub use event_stream::InMemoryEventStream;
