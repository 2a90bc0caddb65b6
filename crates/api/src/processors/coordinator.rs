//! Owns the three processors and exposes their lifecycle, health and
//! settings to the binary and the operator routes.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use domain::models::EstimatedLocation;
use domain::ports::{
    AlertStore, AlertThrottle, AssetDirectory, ContainmentCache, EventStream, GatewayDirectory,
    GeofenceDirectory, GeofenceEventStore, LocationStore, ServiceError,
};
use domain::services::{
    AlertGenerator, AnomalyScorer, EvaluationOutcome, GeofenceEvaluator, MovementAnalyzer,
    RetryPolicy,
};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use super::location::LocationSettings;
use super::runtime::{ManagedProcessor, ProcessorHandle, RuntimeOptions};
use super::{
    AnomalyProcessor, ConfigPatch, GeofenceProcessor, LocationProcessor, ProcessorError,
    ProcessorKind, ProcessorState, ProcessorStats,
};
use crate::config::Config;

/// Collaborators the pipeline is built from.
#[derive(Clone)]
pub struct PipelineDeps {
    pub assets: Arc<dyn AssetDirectory>,
    pub gateways: Arc<dyn GatewayDirectory>,
    pub geofences: Arc<dyn GeofenceDirectory>,
    pub locations: Arc<dyn LocationStore>,
    pub geofence_events: Arc<dyn GeofenceEventStore>,
    pub alerts: Arc<dyn AlertStore>,
    pub cache: Arc<dyn ContainmentCache>,
    pub throttle: Arc<dyn AlertThrottle>,
    pub scorer: Arc<dyn AnomalyScorer>,
    /// Raw inbound observation messages.
    pub observations: Arc<dyn EventStream<Value>>,
    /// Estimates consumed by the geofence processor.
    pub geofence_stream: Arc<dyn EventStream<EstimatedLocation>>,
    /// Estimates consumed by the anomaly processor.
    pub anomaly_stream: Arc<dyn EventStream<EstimatedLocation>>,
}

impl PipelineDeps {
    /// Uses one backend for every registry and output store.
    pub fn with_store<S>(
        store: Arc<S>,
        cache: Arc<dyn ContainmentCache>,
        throttle: Arc<dyn AlertThrottle>,
        scorer: Arc<dyn AnomalyScorer>,
        observations: Arc<dyn EventStream<Value>>,
        geofence_stream: Arc<dyn EventStream<EstimatedLocation>>,
        anomaly_stream: Arc<dyn EventStream<EstimatedLocation>>,
    ) -> Self
    where
        S: AssetDirectory
            + GatewayDirectory
            + GeofenceDirectory
            + LocationStore
            + GeofenceEventStore
            + AlertStore
            + 'static,
    {
        Self {
            assets: store.clone(),
            gateways: store.clone(),
            geofences: store.clone(),
            locations: store.clone(),
            geofence_events: store.clone(),
            alerts: store,
            cache,
            throttle,
            scorer,
            observations,
            geofence_stream,
            anomaly_stream,
        }
    }
}

/// Tunables for every stage.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub location: LocationSettings,
    pub movement_staleness: Duration,
    pub geofence_cache_ttl: Duration,
    pub anomaly_threshold: f64,
    pub anomaly_history_len: usize,
    pub runtime: RuntimeOptions,
    /// Retry policy for store, cache and stream calls.
    pub retry: RetryPolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            location: LocationSettings::default(),
            movement_staleness: Duration::from_secs(600),
            geofence_cache_ttl: Duration::from_secs(3600),
            anomaly_threshold: 0.7,
            anomaly_history_len: 10,
            runtime: RuntimeOptions::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        let processors = &config.processors;
        Self {
            location: LocationSettings {
                window: Duration::from_secs_f64(processors.estimation_window_secs.max(0.001)),
                model: config.signal.model(),
                trilateration: config.trilateration.engine_config(),
                low_battery_threshold: config.alerts.low_battery_threshold,
            },
            movement_staleness: Duration::from_secs(config.movement.staleness_secs),
            geofence_cache_ttl: Duration::from_secs(config.geofence.cache_ttl_secs),
            anomaly_threshold: config.anomaly.threshold,
            anomaly_history_len: config.anomaly.history_len,
            runtime: RuntimeOptions {
                batch_size: processors.batch_size,
                poll_wait: Duration::from_millis(processors.poll_wait_ms),
                stop_timeout: Duration::from_secs(processors.stop_timeout_secs),
                retry: processors.retry_policy(),
            },
            retry: processors.retry_policy(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LifecycleResult {
    pub processor: ProcessorKind,
    pub success: bool,
    pub state: ProcessorState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One result per processor; a failure never hides the others.
#[derive(Debug, Clone, Serialize)]
pub struct LifecycleReport {
    pub results: Vec<LifecycleResult>,
}

impl LifecycleReport {
    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(|r| r.success)
    }

    pub fn failures(&self) -> impl Iterator<Item = &LifecycleResult> {
        self.results.iter().filter(|r| !r.success)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessorHealth {
    pub name: ProcessorKind,
    pub state: ProcessorState,
    pub stats: ProcessorStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub overall_status: OverallStatus,
    pub processors: Vec<ProcessorHealth>,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.overall_status == OverallStatus::Healthy
    }
}

pub struct Coordinator {
    location: ProcessorHandle<LocationProcessor>,
    anomaly: ProcessorHandle<AnomalyProcessor>,
    geofence: ProcessorHandle<GeofenceProcessor>,
    evaluator: Arc<GeofenceEvaluator>,
    alerts: Arc<AlertGenerator>,
}

impl Coordinator {
    pub fn new(deps: PipelineDeps, settings: PipelineSettings) -> Result<Self, ProcessorError> {
        let alerts = Arc::new(AlertGenerator::new(
            deps.alerts.clone(),
            deps.throttle.clone(),
            settings.retry.clone(),
        ));
        let evaluator = Arc::new(
            GeofenceEvaluator::new(
                deps.geofences.clone(),
                deps.cache.clone(),
                deps.geofence_events.clone(),
                alerts.clone(),
                settings.retry.clone(),
            )
            .with_cache_ttl(settings.geofence_cache_ttl),
        );

        let location = LocationProcessor::new(
            deps.observations.clone(),
            deps.assets.clone(),
            deps.gateways.clone(),
            deps.locations.clone(),
            vec![deps.geofence_stream.clone(), deps.anomaly_stream.clone()],
            alerts.clone(),
            MovementAnalyzer::new(settings.movement_staleness),
            settings.retry.clone(),
            settings.location.clone(),
        )?;
        let anomaly = AnomalyProcessor::new(
            deps.anomaly_stream.clone(),
            deps.scorer.clone(),
            alerts.clone(),
            settings.anomaly_threshold,
            settings.anomaly_history_len,
        );
        let geofence = GeofenceProcessor::new(deps.geofence_stream.clone(), evaluator.clone());

        Ok(Self {
            location: ProcessorHandle::new(location, settings.runtime.clone()),
            anomaly: ProcessorHandle::new(anomaly, settings.runtime.clone()),
            geofence: ProcessorHandle::new(geofence, settings.runtime),
            evaluator,
            alerts,
        })
    }

    pub fn processor(&self, kind: ProcessorKind) -> &dyn ManagedProcessor {
        match kind {
            ProcessorKind::Location => &self.location,
            ProcessorKind::Anomaly => &self.anomaly,
            ProcessorKind::Geofence => &self.geofence,
        }
    }

    /// Alert lifecycle operations for request-driven callers.
    pub fn alerts(&self) -> &Arc<AlertGenerator> {
        &self.alerts
    }

    pub async fn start_all(&self) -> LifecycleReport {
        let (location, anomaly, geofence) = tokio::join!(
            self.location.start(),
            self.anomaly.start(),
            self.geofence.start()
        );
        let report = self.report([location, anomaly, geofence]);
        log_report("start", &report);
        report
    }

    pub async fn stop_all(&self) -> LifecycleReport {
        let (location, anomaly, geofence) = tokio::join!(
            self.location.stop(),
            self.anomaly.stop(),
            self.geofence.stop()
        );
        let report = self.report([location, anomaly, geofence]);
        log_report("stop", &report);
        report
    }

    fn report(&self, results: [Result<(), ProcessorError>; 3]) -> LifecycleReport {
        LifecycleReport {
            results: ProcessorKind::ALL
                .into_iter()
                .zip(results)
                .map(|(kind, result)| LifecycleResult {
                    processor: kind,
                    success: result.is_ok(),
                    state: self.processor(kind).state(),
                    error: result.err().map(|e| e.to_string()),
                })
                .collect(),
        }
    }

    pub async fn start(&self, kind: ProcessorKind) -> Result<(), ProcessorError> {
        self.processor(kind).start().await
    }

    pub async fn stop(&self, kind: ProcessorKind) -> Result<(), ProcessorError> {
        self.processor(kind).stop().await
    }

    pub async fn restart(&self, kind: ProcessorKind) -> Result<(), ProcessorError> {
        info!(processor = %kind, "Restarting processor");
        self.processor(kind).restart().await
    }

    pub fn health_check(&self) -> HealthReport {
        let processors: Vec<ProcessorHealth> = ProcessorKind::ALL
            .into_iter()
            .map(|kind| {
                let processor = self.processor(kind);
                ProcessorHealth {
                    name: kind,
                    state: processor.state(),
                    stats: processor.stats(),
                }
            })
            .collect();

        let overall_status = if processors
            .iter()
            .all(|p| p.state == ProcessorState::Running)
        {
            OverallStatus::Healthy
        } else {
            OverallStatus::Unhealthy
        };

        HealthReport {
            overall_status,
            processors,
            checked_at: Utc::now(),
        }
    }

    /// Applies a settings patch to one processor. Unsupported keys or
    /// invalid values reject the whole patch.
    pub fn update_config(
        &self,
        kind: ProcessorKind,
        patch: &ConfigPatch,
    ) -> Result<(), ProcessorError> {
        self.processor(kind).update_settings(patch)
    }

    /// Evaluates one estimate on the caller's task. Safe to run alongside
    /// the geofence processor.
    pub async fn force_evaluate(
        &self,
        location: &EstimatedLocation,
    ) -> Result<EvaluationOutcome, ServiceError> {
        self.evaluator.evaluate(location).await
    }
}

fn log_report(action: &'static str, report: &LifecycleReport) {
    if report.all_succeeded() {
        info!(action = action, "All processors completed lifecycle action");
        return;
    }
    for failure in report.failures() {
        warn!(
            action = action,
            processor = %failure.processor,
            state = %failure.state,
            error = failure.error.as_deref().unwrap_or_default(),
            "Processor lifecycle action failed"
        );
    }
}
