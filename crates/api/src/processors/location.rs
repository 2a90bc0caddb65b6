//! Location processor: observations in, estimated locations out.
//!
//! Validated observations are grouped into a window per asset. When the
//! window has been open for `estimation_window_secs` it is converted into
//! sightings, trilaterated, enriched with movement, stored, and fanned out
//! to the downstream streams.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::Utc;
use domain::models::{
    AlertSeverity, AlertType, AssetRef, EstimatedLocation, GatewayFix, NewAlert, Observation,
    ObservationRejection,
};
use domain::ports::{
    AssetDirectory, EventStream, GatewayDirectory, LocationStore, ServiceError,
};
use domain::services::{
    AlertGenerator, MovementAnalyzer, PathLossModel, RetryPolicy, Sighting, TrilaterationConfig,
    TrilaterationEngine,
};
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::runtime::{ItemOutcome, Processor};
use super::{finite_f64, positive_f64, positive_u64, ConfigPatch, ProcessorError, ProcessorKind};
use crate::middleware::metrics::{
    record_alert_created, record_location_estimated, record_observation_rejected,
};

/// Battery level at or below which a low-battery alert is high severity.
const CRITICAL_BATTERY_LEVEL: i32 = 5;

/// Hot-updatable settings of the location processor.
#[derive(Debug, Clone)]
pub struct LocationSettings {
    pub window: Duration,
    pub model: PathLossModel,
    pub trilateration: TrilaterationConfig,
    pub low_battery_threshold: i32,
}

impl Default for LocationSettings {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            model: PathLossModel::default(),
            trilateration: TrilaterationConfig::default(),
            low_battery_threshold: 15,
        }
    }
}

#[derive(Clone)]
struct Active {
    window: Duration,
    model: PathLossModel,
    engine: Arc<TrilaterationEngine>,
    low_battery_threshold: i32,
}

impl Active {
    fn build(settings: LocationSettings) -> Result<Self, ProcessorError> {
        settings
            .model
            .validate()
            .map_err(|e| ProcessorError::invalid("signal", e.to_string()))?;
        let engine = TrilaterationEngine::new(settings.trilateration)
            .map_err(|e| ProcessorError::invalid("trilateration", e.to_string()))?;
        Ok(Self {
            window: settings.window,
            model: settings.model,
            engine: Arc::new(engine),
            low_battery_threshold: settings.low_battery_threshold,
        })
    }

    fn settings(&self) -> LocationSettings {
        LocationSettings {
            window: self.window,
            model: self.model,
            trilateration: self.engine.config().clone(),
            low_battery_threshold: self.low_battery_threshold,
        }
    }
}

#[derive(Debug, Clone)]
struct SightingWindow {
    asset: AssetRef,
    opened_at: Instant,
    observations: Vec<Observation>,
    /// Set once the estimate is stored; a retry only publishes it.
    stored: Option<EstimatedLocation>,
    /// Outputs that already received `stored`.
    published: usize,
}

pub struct LocationProcessor {
    observations: Arc<dyn EventStream<Value>>,
    assets: Arc<dyn AssetDirectory>,
    gateways: Arc<dyn GatewayDirectory>,
    locations: Arc<dyn LocationStore>,
    outputs: Vec<Arc<dyn EventStream<EstimatedLocation>>>,
    alerts: Arc<AlertGenerator>,
    movement: MovementAnalyzer,
    retry: RetryPolicy,
    active: RwLock<Active>,
    windows: Mutex<HashMap<Uuid, SightingWindow>>,
}

impl LocationProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        observations: Arc<dyn EventStream<Value>>,
        assets: Arc<dyn AssetDirectory>,
        gateways: Arc<dyn GatewayDirectory>,
        locations: Arc<dyn LocationStore>,
        outputs: Vec<Arc<dyn EventStream<EstimatedLocation>>>,
        alerts: Arc<AlertGenerator>,
        movement: MovementAnalyzer,
        retry: RetryPolicy,
        settings: LocationSettings,
    ) -> Result<Self, ProcessorError> {
        Ok(Self {
            observations,
            assets,
            gateways,
            locations,
            outputs,
            alerts,
            movement,
            retry,
            active: RwLock::new(Active::build(settings)?),
            windows: Mutex::new(HashMap::new()),
        })
    }

    /// Current settings.
    pub fn settings(&self) -> LocationSettings {
        self.active().settings()
    }

    /// Assets with an open window.
    pub fn open_windows(&self) -> usize {
        self.windows().len()
    }

    fn active(&self) -> Active {
        self.active
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn windows(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, SightingWindow>> {
        self.windows.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn reject(&self, rejection: &ObservationRejection) -> ItemOutcome {
        warn!(reason = rejection.reason(), error = %rejection, "Observation rejected");
        record_observation_rejected(rejection.reason());
        ItemOutcome::Rejected
    }

    /// Windows open for at least the configured length, or every window when
    /// `all` is set.
    fn due_windows(&self, all: bool) -> Vec<SightingWindow> {
        let window = self.active().window;
        let mut due: Vec<SightingWindow> = self
            .windows()
            .values()
            .filter(|w| all || w.opened_at.elapsed() >= window)
            .cloned()
            .collect();
        due.sort_by_key(|w| w.opened_at);
        due
    }

    /// Estimates each window and drops it once its estimate is stored and
    /// published.
    async fn flush(&self, due: Vec<SightingWindow>) -> Result<usize, ServiceError> {
        let mut emitted = 0;
        for window in due {
            emitted += self.estimate(&window).await?;
            let mut windows = self.windows();
            if windows
                .get(&window.asset.asset_id)
                .is_some_and(|w| w.opened_at == window.opened_at)
            {
                windows.remove(&window.asset.asset_id);
            }
        }
        Ok(emitted)
    }

    /// Records progress on the live copy of `window`.
    fn update_window(&self, window: &SightingWindow, f: impl FnOnce(&mut SightingWindow)) {
        if let Some(live) = self
            .windows()
            .get_mut(&window.asset.asset_id)
            .filter(|w| w.opened_at == window.opened_at)
        {
            f(live);
        }
    }

    async fn estimate(&self, window: &SightingWindow) -> Result<usize, ServiceError> {
        let location = match &window.stored {
            Some(location) => location.clone(),
            None => match self.locate(window).await? {
                Some(location) => location,
                None => return Ok(0),
            },
        };

        for (index, output) in self.outputs.iter().enumerate().skip(window.published) {
            self.retry
                .run("publish_location", || output.publish(location.clone()))
                .await?;
            self.update_window(window, |w| w.published = index + 1);
        }

        record_location_estimated(location.algorithm.as_str(), location.confidence);
        info!(
            asset_id = %location.asset_id,
            algorithm = %location.algorithm,
            confidence = location.confidence,
            uncertainty_m = location.uncertainty_m,
            gateways = location.gateway_count,
            "Location estimated"
        );
        Ok(1)
    }

    /// Trilaterates the window and stores the estimate. `None` when the
    /// window cannot be located.
    async fn locate(
        &self,
        window: &SightingWindow,
    ) -> Result<Option<EstimatedLocation>, ServiceError> {
        let active = self.active();
        let asset = &window.asset;

        let gateway_ids: Vec<String> = window
            .observations
            .iter()
            .map(|o| o.gateway_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let known = self
            .retry
            .run("find_gateways", || {
                self.gateways
                    .find_gateways(asset.organization_id, &gateway_ids)
            })
            .await?;
        let by_id: HashMap<&str, &GatewayFix> =
            known.iter().map(|g| (g.gateway_id.as_str(), g)).collect();

        let sightings: Vec<Sighting> = window
            .observations
            .iter()
            .filter_map(|o| {
                by_id.get(o.gateway_id.as_str()).map(|gateway| {
                    Sighting::from_rssi((*gateway).clone(), o.rssi as f64, &active.model)
                })
            })
            .collect();

        if sightings.is_empty() {
            warn!(
                asset_id = %asset.asset_id,
                gateways = ?gateway_ids,
                "No registered gateways in window, skipping estimate"
            );
            return Ok(None);
        }

        let fix = match active.engine.estimate(&sightings) {
            Ok(fix) => fix,
            Err(e) => {
                warn!(asset_id = %asset.asset_id, error = %e, "Estimate failed");
                return Ok(None);
            }
        };

        let estimated_at = window
            .observations
            .iter()
            .map(|o| o.observed_at)
            .max()
            .unwrap_or_else(Utc::now);

        let previous = self
            .retry
            .run("latest_location", || {
                self.locations.latest_location(asset.asset_id)
            })
            .await?;
        let movement = self
            .movement
            .analyze(previous.as_ref(), &fix, estimated_at);
        let location = EstimatedLocation::assemble(asset, fix, movement, estimated_at);

        self.retry
            .run("insert_location", || self.locations.insert_location(&location))
            .await?;
        self.update_window(window, |w| w.stored = Some(location.clone()));
        Ok(Some(location))
    }

    async fn low_battery_alert(
        &self,
        asset: &AssetRef,
        observation: &Observation,
        level: i32,
    ) -> Result<usize, ServiceError> {
        let severity = if level <= CRITICAL_BATTERY_LEVEL {
            AlertSeverity::High
        } else {
            AlertSeverity::Medium
        };
        let request = NewAlert {
            asset_id: asset.asset_id,
            organization_id: asset.organization_id,
            geofence_id: None,
            alert_type: AlertType::LowBattery,
            severity,
            message: format!("Battery low on asset {}: {}%", asset.asset_tag_id, level),
            context: json!({
                "battery_level": level,
                "gateway_id": observation.gateway_id,
                "observed_at": observation.observed_at,
            }),
        };

        let created = self.alerts.create(request).await?.created();
        if created.is_some() {
            record_alert_created(AlertType::LowBattery.as_str());
        }
        Ok(created.map_or(0, |_| 1))
    }
}

#[async_trait::async_trait]
impl Processor for LocationProcessor {
    type Item = Value;

    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Location
    }

    async fn pull(&self, max: usize, wait: Duration) -> Result<Vec<Value>, ServiceError> {
        self.observations.pull(max, wait).await
    }

    async fn process(&self, message: &Value) -> Result<ItemOutcome, ServiceError> {
        let observation = match Observation::from_message(message, Utc::now()) {
            Ok(observation) => observation,
            Err(rejection) => return Ok(self.reject(&rejection)),
        };

        let tag = observation.asset_tag_id.clone();
        let Some(asset) = self
            .retry
            .run("find_asset", || self.assets.find_by_tag(&tag))
            .await?
        else {
            return Ok(self.reject(&ObservationRejection::UnknownAsset(tag)));
        };

        let mut emitted = 0;

        // Close this asset's window first if it has run its course.
        let window_len = self.active().window;
        let expired = self
            .windows()
            .get(&asset.asset_id)
            .filter(|w| w.opened_at.elapsed() >= window_len)
            .cloned();
        if let Some(expired) = expired {
            emitted += self.flush(vec![expired]).await?;
        }

        let threshold = self.active().low_battery_threshold;
        if let Some(level) = observation.battery_level.filter(|l| *l <= threshold) {
            emitted += self.low_battery_alert(&asset, &observation, level).await?;
        }

        debug!(
            asset_id = %asset.asset_id,
            gateway_id = %observation.gateway_id,
            rssi = observation.rssi,
            quality = %observation.signal_quality,
            "Observation buffered"
        );
        self.windows()
            .entry(asset.asset_id)
            .or_insert_with(|| SightingWindow {
                asset: asset.clone(),
                opened_at: Instant::now(),
                observations: Vec::new(),
                stored: None,
                published: 0,
            })
            .observations
            .push(observation);

        Ok(ItemOutcome::Processed { emitted })
    }

    async fn tick(&self) -> Result<usize, ServiceError> {
        let due = self.due_windows(false);
        if due.is_empty() {
            return Ok(0);
        }
        self.flush(due).await
    }

    async fn on_stop(&self) -> Result<usize, ServiceError> {
        let pending = self.due_windows(true);
        if !pending.is_empty() {
            info!(windows = pending.len(), "Flushing open windows on stop");
        }
        self.flush(pending).await
    }

    fn apply_settings(&self, patch: &ConfigPatch) -> Result<(), ProcessorError> {
        let mut settings = self.settings();
        for (key, value) in patch {
            match key.as_str() {
                "estimation_window_secs" => {
                    let secs = positive_f64(key, value)?;
                    settings.window = Duration::try_from_secs_f64(secs)
                        .map_err(|e| ProcessorError::invalid(key, e.to_string()))?;
                }
                "min_gateways" => {
                    settings.trilateration.min_gateways = positive_u64(key, value)? as usize;
                }
                "path_loss_exponent" => {
                    settings.model.path_loss_exponent = positive_f64(key, value)?;
                }
                "reference_power_dbm" => {
                    settings.model.reference_power_dbm = finite_f64(key, value)?;
                }
                "reference_distance_m" => {
                    settings.model.reference_distance_m = positive_f64(key, value)?;
                }
                _ => {
                    return Err(ProcessorError::UnsupportedSetting {
                        kind: ProcessorKind::Location,
                        key: key.clone(),
                    })
                }
            }
        }

        let active = Active::build(settings)?;
        *self.active.write().unwrap_or_else(|e| e.into_inner()) = active;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use crate::services::InMemoryEventStream;
    use domain::models::LocationAlgorithm;
    use domain::ports::NoThrottle;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        store: Arc<InMemoryStore>,
        output: Arc<InMemoryEventStream<EstimatedLocation>>,
        processor: LocationProcessor,
        asset: AssetRef,
    }

    fn fixture(window: Duration) -> Fixture {
        fixture_with(window, Vec::new())
    }

    /// `extra` outputs are fanned out to after the default one.
    fn fixture_with(
        window: Duration,
        extra: Vec<Arc<dyn EventStream<EstimatedLocation>>>,
    ) -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let asset = AssetRef {
            asset_id: Uuid::new_v4(),
            asset_tag_id: "TAG-7".to_string(),
            organization_id: Uuid::new_v4(),
            name: "Pallet".to_string(),
        };
        store.add_asset(asset.clone());
        for (id, lat, lng) in [
            ("GW-1", 52.5200, 13.4050),
            ("GW-2", 52.5200, 13.4065),
            ("GW-3", 52.5209, 13.4057),
        ] {
            store.add_gateway(GatewayFix {
                gateway_id: id.to_string(),
                organization_id: asset.organization_id,
                latitude: lat,
                longitude: lng,
                altitude: None,
            });
        }

        let output = Arc::new(InMemoryEventStream::new("locations"));
        let alerts = Arc::new(AlertGenerator::new(
            store.clone(),
            Arc::new(NoThrottle),
            RetryPolicy::none(),
        ));
        let processor = LocationProcessor::new(
            Arc::new(InMemoryEventStream::new("observations")),
            store.clone(),
            store.clone(),
            store.clone(),
            std::iter::once(output.clone() as Arc<dyn EventStream<EstimatedLocation>>)
                .chain(extra)
                .collect(),
            alerts,
            MovementAnalyzer::default(),
            RetryPolicy::none(),
            LocationSettings {
                window,
                ..LocationSettings::default()
            },
        )
        .unwrap();

        Fixture {
            store,
            output,
            processor,
            asset,
        }
    }

    fn message(gateway: &str, rssi: i32, battery: Option<i32>) -> Value {
        let mut value = json!({
            "asset_tag_id": "TAG-7",
            "gateway_id": gateway,
            "rssi": rssi,
            "timestamp": Utc::now().to_rfc3339(),
        });
        if let Some(level) = battery {
            value["battery_level"] = json!(level);
        }
        value
    }

    #[tokio::test]
    async fn test_out_of_range_rssi_is_rejected() {
        let f = fixture(Duration::from_secs(60));
        let outcome = f
            .processor
            .process(&message("GW-1", 10, None))
            .await
            .unwrap();
        assert_eq!(outcome, ItemOutcome::Rejected);
        assert_eq!(f.processor.open_windows(), 0);
    }

    #[tokio::test]
    async fn test_missing_field_is_rejected() {
        let f = fixture(Duration::from_secs(60));
        let outcome = f
            .processor
            .process(&json!({"asset_tag_id": "TAG-7", "rssi": -60}))
            .await
            .unwrap();
        assert_eq!(outcome, ItemOutcome::Rejected);
    }

    #[tokio::test]
    async fn test_unknown_asset_is_rejected() {
        let f = fixture(Duration::from_secs(60));
        let mut value = message("GW-1", -60, None);
        value["asset_tag_id"] = json!("NOPE");
        let outcome = f.processor.process(&value).await.unwrap();
        assert_eq!(outcome, ItemOutcome::Rejected);
    }

    #[tokio::test]
    async fn test_window_flush_produces_trilaterated_estimate() {
        let f = fixture(Duration::from_secs(60));
        for (gw, rssi) in [("GW-1", -55), ("GW-2", -70), ("GW-3", -85)] {
            f.processor.process(&message(gw, rssi, None)).await.unwrap();
        }
        assert_eq!(f.processor.open_windows(), 1);

        let emitted = f.processor.on_stop().await.unwrap();
        assert_eq!(emitted, 1);
        assert_eq!(f.processor.open_windows(), 0);

        let stored = f.store.locations();
        assert_eq!(stored.len(), 1);
        let location = &stored[0];
        assert_eq!(location.algorithm, LocationAlgorithm::Trilateration);
        assert_eq!(location.gateway_count, 3);
        assert!(location.confidence >= 40.0);
        assert!(location.speed_mps.is_none());

        let published = f.output.pull(10, Duration::from_millis(10)).await.unwrap();
        assert_eq!(published, stored);
    }

    /// Fails the first publish, then delivers.
    struct FlakyStream {
        inner: InMemoryEventStream<EstimatedLocation>,
        failures_left: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl EventStream<EstimatedLocation> for FlakyStream {
        async fn publish(&self, item: EstimatedLocation) -> Result<(), ServiceError> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(ServiceError::unavailable("stream", "broker unreachable"));
            }
            self.inner.publish(item).await
        }

        async fn pull(
            &self,
            max: usize,
            wait: Duration,
        ) -> Result<Vec<EstimatedLocation>, ServiceError> {
            self.inner.pull(max, wait).await
        }
    }

    #[tokio::test]
    async fn test_failed_publish_is_retried_without_storing_twice() {
        let flaky = Arc::new(FlakyStream {
            inner: InMemoryEventStream::new("anomaly"),
            failures_left: AtomicUsize::new(1),
        });
        let outputs: Vec<Arc<dyn EventStream<EstimatedLocation>>> = vec![flaky.clone()];
        let f = fixture_with(Duration::from_secs(60), outputs);
        for (gw, rssi) in [("GW-1", -55), ("GW-2", -70), ("GW-3", -85)] {
            f.processor.process(&message(gw, rssi, None)).await.unwrap();
        }

        assert!(f.processor.on_stop().await.is_err());
        assert_eq!(f.store.locations().len(), 1);
        assert_eq!(f.processor.open_windows(), 1);

        assert_eq!(f.processor.on_stop().await.unwrap(), 1);
        assert_eq!(f.processor.open_windows(), 0);

        let stored = f.store.locations();
        assert_eq!(stored.len(), 1);
        let first = f.output.pull(10, Duration::from_millis(10)).await.unwrap();
        let second = flaky.pull(10, Duration::from_millis(10)).await.unwrap();
        assert_eq!(first, stored);
        assert_eq!(second, stored);
    }

    #[tokio::test]
    async fn test_single_gateway_window() {
        let f = fixture(Duration::from_secs(60));
        f.processor
            .process(&message("GW-2", -62, None))
            .await
            .unwrap();
        f.processor.on_stop().await.unwrap();

        let location = &f.store.locations()[0];
        assert_eq!(location.algorithm, LocationAlgorithm::SingleGateway);
        assert!(location.confidence <= 30.0);
    }

    #[tokio::test]
    async fn test_unregistered_gateways_produce_nothing() {
        let f = fixture(Duration::from_secs(60));
        f.processor
            .process(&message("GW-404", -62, None))
            .await
            .unwrap();
        assert_eq!(f.processor.on_stop().await.unwrap(), 0);
        assert!(f.store.locations().is_empty());
    }

    #[tokio::test]
    async fn test_tick_only_flushes_elapsed_windows() {
        let f = fixture(Duration::from_millis(50));
        f.processor
            .process(&message("GW-1", -60, None))
            .await
            .unwrap();
        assert_eq!(f.processor.tick().await.unwrap(), 0);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(f.processor.tick().await.unwrap(), 1);
        assert_eq!(f.store.locations().len(), 1);
    }

    #[tokio::test]
    async fn test_low_battery_raises_alert() {
        let f = fixture(Duration::from_secs(60));
        f.processor
            .process(&message("GW-1", -60, Some(4)))
            .await
            .unwrap();
        f.processor
            .process(&message("GW-1", -60, Some(80)))
            .await
            .unwrap();

        let alerts = f.store.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, AlertType::LowBattery);
        assert_eq!(alerts[0].severity, AlertSeverity::High);
        assert_eq!(alerts[0].asset_id, f.asset.asset_id);
    }

    #[tokio::test]
    async fn test_settings_update_is_all_or_nothing() {
        let f = fixture(Duration::from_secs(60));

        let mut patch = ConfigPatch::new();
        patch.insert("path_loss_exponent".into(), json!(3.0));
        patch.insert("unknown_key".into(), json!(1));
        assert!(f.processor.apply_settings(&patch).is_err());
        assert_eq!(f.processor.settings().model.path_loss_exponent, 2.0);

        let mut patch = ConfigPatch::new();
        patch.insert("path_loss_exponent".into(), json!(3.0));
        patch.insert("min_gateways".into(), json!(2));
        assert!(f.processor.apply_settings(&patch).is_err());
        assert_eq!(f.processor.settings().model.path_loss_exponent, 2.0);

        let mut patch = ConfigPatch::new();
        patch.insert("path_loss_exponent".into(), json!(3.0));
        patch.insert("estimation_window_secs".into(), json!(0.5));
        f.processor.apply_settings(&patch).unwrap();
        let settings = f.processor.settings();
        assert_eq!(settings.model.path_loss_exponent, 3.0);
        assert_eq!(settings.window, Duration::from_millis(500));
    }
}
