//! Geofence processor: evaluates every estimate against the organization's
//! active geofences.

use std::sync::Arc;
use std::time::Duration;

use domain::models::{AlertType, EstimatedLocation};
use domain::ports::{EventStream, ServiceError};
use domain::services::GeofenceEvaluator;

use super::runtime::{ItemOutcome, Processor};
use super::{positive_u64, ConfigPatch, ProcessorError, ProcessorKind};
use crate::middleware::metrics::{record_alert_created, record_geofence_event};

pub struct GeofenceProcessor {
    locations: Arc<dyn EventStream<EstimatedLocation>>,
    evaluator: Arc<GeofenceEvaluator>,
}

impl GeofenceProcessor {
    pub fn new(
        locations: Arc<dyn EventStream<EstimatedLocation>>,
        evaluator: Arc<GeofenceEvaluator>,
    ) -> Self {
        Self {
            locations,
            evaluator,
        }
    }
}

#[async_trait::async_trait]
impl Processor for GeofenceProcessor {
    type Item = EstimatedLocation;

    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Geofence
    }

    async fn pull(
        &self,
        max: usize,
        wait: Duration,
    ) -> Result<Vec<EstimatedLocation>, ServiceError> {
        self.locations.pull(max, wait).await
    }

    async fn process(&self, location: &EstimatedLocation) -> Result<ItemOutcome, ServiceError> {
        let outcome = self.evaluator.evaluate(location).await?;
        for event in &outcome.events {
            record_geofence_event(event.event_type.as_str());
        }
        for _ in &outcome.alerts {
            record_alert_created(AlertType::GeofenceViolation.as_str());
        }
        Ok(ItemOutcome::Processed {
            emitted: outcome.events.len() + outcome.alerts.len(),
        })
    }

    fn apply_settings(&self, patch: &ConfigPatch) -> Result<(), ProcessorError> {
        let mut ttl = None;
        for (key, value) in patch {
            match key.as_str() {
                "cache_ttl_secs" => ttl = Some(Duration::from_secs(positive_u64(key, value)?)),
                _ => {
                    return Err(ProcessorError::UnsupportedSetting {
                        kind: ProcessorKind::Geofence,
                        key: key.clone(),
                    })
                }
            }
        }
        if let Some(ttl) = ttl {
            self.evaluator.set_cache_ttl(ttl);
        }
        Ok(())
    }
}
