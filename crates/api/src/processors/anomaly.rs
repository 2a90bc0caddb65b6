//! Anomaly processor: scores each estimate against the asset's recent
//! history and raises an alert when the score reaches the threshold.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use domain::models::{AlertType, EstimatedLocation, NewAlert};
use domain::ports::{EventStream, ServiceError};
use domain::services::{anomaly::severity_for, AlertGenerator, AnomalyScorer};
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use super::runtime::{ItemOutcome, Processor};
use super::{ConfigPatch, ProcessorError, ProcessorKind};
use crate::middleware::metrics::record_alert_created;

pub struct AnomalyProcessor {
    locations: Arc<dyn EventStream<EstimatedLocation>>,
    scorer: Arc<dyn AnomalyScorer>,
    alerts: Arc<AlertGenerator>,
    history_len: usize,
    threshold_bits: AtomicU64,
    history: Mutex<HashMap<Uuid, VecDeque<EstimatedLocation>>>,
}

impl AnomalyProcessor {
    pub fn new(
        locations: Arc<dyn EventStream<EstimatedLocation>>,
        scorer: Arc<dyn AnomalyScorer>,
        alerts: Arc<AlertGenerator>,
        threshold: f64,
        history_len: usize,
    ) -> Self {
        Self {
            locations,
            scorer,
            alerts,
            history_len: history_len.max(1),
            threshold_bits: AtomicU64::new(threshold.to_bits()),
            history: Mutex::new(HashMap::new()),
        }
    }

    pub fn threshold(&self) -> f64 {
        f64::from_bits(self.threshold_bits.load(Ordering::Relaxed))
    }

    fn history(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, VecDeque<EstimatedLocation>>> {
        self.history.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn remember(&self, location: &EstimatedLocation) {
        let mut history = self.history();
        let entries = history.entry(location.asset_id).or_default();
        entries.push_back(location.clone());
        while entries.len() > self.history_len {
            entries.pop_front();
        }
    }
}

#[async_trait::async_trait]
impl Processor for AnomalyProcessor {
    type Item = EstimatedLocation;

    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Anomaly
    }

    async fn pull(
        &self,
        max: usize,
        wait: Duration,
    ) -> Result<Vec<EstimatedLocation>, ServiceError> {
        self.locations.pull(max, wait).await
    }

    async fn process(&self, location: &EstimatedLocation) -> Result<ItemOutcome, ServiceError> {
        let previous: Vec<EstimatedLocation> = self
            .history()
            .get(&location.asset_id)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default();

        let score = self.scorer.score(&previous, location);
        let threshold = self.threshold();
        let mut emitted = 0;

        if score.exceeds(threshold) {
            let reasons: Vec<&str> = score.reasons.iter().map(|r| r.as_str()).collect();
            info!(
                asset_id = %location.asset_id,
                score = score.score,
                reasons = ?reasons,
                "Anomalous location detected"
            );
            let request = NewAlert {
                asset_id: location.asset_id,
                organization_id: location.organization_id,
                geofence_id: None,
                alert_type: AlertType::AnomalyDetected,
                severity: severity_for(&score),
                message: format!(
                    "Unusual movement for asset {}: {}",
                    location.asset_tag_id,
                    reasons.join(", ")
                ),
                context: json!({
                    "location_id": location.id,
                    "score": score.score,
                    "threshold": threshold,
                    "reasons": reasons,
                    "latitude": location.latitude,
                    "longitude": location.longitude,
                    "speed_mps": location.speed_mps,
                    "distance_moved_m": location.distance_moved_m,
                }),
            };
            if self.alerts.create(request).await?.created().is_some() {
                record_alert_created(AlertType::AnomalyDetected.as_str());
                emitted = 1;
            }
        } else {
            debug!(asset_id = %location.asset_id, score = score.score, "Location scored");
        }

        // Only remembered once handled, so a retried item is not scored
        // against itself.
        self.remember(location);
        Ok(ItemOutcome::Processed { emitted })
    }

    fn apply_settings(&self, patch: &ConfigPatch) -> Result<(), ProcessorError> {
        let mut threshold = None;
        for (key, value) in patch {
            match key.as_str() {
                "anomaly_threshold" => match value.as_f64() {
                    Some(v) if (0.0..=1.0).contains(&v) => threshold = Some(v),
                    _ => return Err(ProcessorError::invalid(key, "must be between 0 and 1")),
                },
                _ => {
                    return Err(ProcessorError::UnsupportedSetting {
                        kind: ProcessorKind::Anomaly,
                        key: key.clone(),
                    })
                }
            }
        }
        if let Some(threshold) = threshold {
            self.threshold_bits
                .store(threshold.to_bits(), Ordering::Relaxed);
        }
        Ok(())
    }
}
