//! Evicts expired containment entries and idle throttle keys so transient
//! per-asset state does not grow with the number of assets ever seen.

use std::sync::Arc;

use metrics::gauge;
use tracing::debug;

use super::scheduler::{Job, JobFrequency};
use crate::services::{GovernorAlertThrottle, InMemoryContainmentCache};

pub struct StateCleanupJob {
    cache: Arc<InMemoryContainmentCache>,
    throttle: Arc<GovernorAlertThrottle>,
}

impl StateCleanupJob {
    pub fn new(cache: Arc<InMemoryContainmentCache>, throttle: Arc<GovernorAlertThrottle>) -> Self {
        Self { cache, throttle }
    }
}

#[async_trait::async_trait]
impl Job for StateCleanupJob {
    fn name(&self) -> &'static str {
        "state_cleanup"
    }

    fn frequency(&self) -> JobFrequency {
        JobFrequency::Minutes(1)
    }

    async fn execute(&self) -> anyhow::Result<()> {
        let purged = self.cache.purge_expired();
        self.throttle.retain_recent();

        gauge!("containment_cache_entries").set(self.cache.len() as f64);
        gauge!("alert_throttle_keys").set(self.throttle.tracked_keys() as f64);
        debug!(
            purged = purged,
            remaining = self.cache.len(),
            throttle_keys = self.throttle.tracked_keys(),
            "Transient state cleaned"
        );
        Ok(())
    }
}
