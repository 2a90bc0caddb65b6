//! Fixtures for integration tests.
//!
//! Everything runs on the in-memory collaborators, so no database or
//! broker is needed.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use asset_tracking_api::memory::InMemoryStore;
use asset_tracking_api::processors::location::LocationSettings;
use asset_tracking_api::processors::{
    Coordinator, PipelineDeps, PipelineSettings, ProcessorKind, RuntimeOptions,
};
use asset_tracking_api::services::{InMemoryContainmentCache, InMemoryEventStream};
use chrono::{Duration as ChronoDuration, Utc};
use domain::models::{
    AssetRef, Coordinate, EstimatedLocation, GatewayFix, Geofence, GeofenceClassification,
    GeofenceShape, LocationAlgorithm, Movement, PositionFix,
};
use domain::ports::NoThrottle;
use domain::services::{HeuristicAnomalyScorer, RetryPolicy};
use fake::faker::company::en::CompanyName;
use fake::faker::lorem::en::Word;
use fake::Fake;
use serde_json::{json, Value};
use uuid::Uuid;

pub const TAG: &str = "TAG-42";

/// Surveyed gateway positions, a small triangle in central Berlin.
pub const GATEWAYS: [(&str, f64, f64); 3] = [
    ("GW-1", 52.5200, 13.4050),
    ("GW-2", 52.5200, 13.4065),
    ("GW-3", 52.5209, 13.4057),
];

/// Roughly the centroid of [`GATEWAYS`].
pub const SITE_CENTER: Coordinate = Coordinate {
    latitude: 52.5203,
    longitude: 13.4057,
};

pub struct Pipeline {
    pub store: Arc<InMemoryStore>,
    pub cache: Arc<InMemoryContainmentCache>,
    pub observations: Arc<InMemoryEventStream<Value>>,
    pub geofence_stream: Arc<InMemoryEventStream<EstimatedLocation>>,
    pub anomaly_stream: Arc<InMemoryEventStream<EstimatedLocation>>,
    pub coordinator: Arc<Coordinator>,
    pub asset: AssetRef,
}

/// Short window and poll intervals so tests settle quickly.
pub fn test_settings() -> PipelineSettings {
    let retry = RetryPolicy {
        max_attempts: 2,
        initial_backoff: Duration::from_millis(5),
        max_backoff: Duration::from_millis(10),
    };
    PipelineSettings {
        location: LocationSettings {
            window: Duration::from_millis(200),
            ..LocationSettings::default()
        },
        runtime: RuntimeOptions {
            batch_size: 50,
            poll_wait: Duration::from_millis(20),
            stop_timeout: Duration::from_secs(2),
            retry: retry.clone(),
        },
        retry,
        ..PipelineSettings::default()
    }
}

pub fn pipeline() -> Pipeline {
    pipeline_with(test_settings())
}

pub fn pipeline_with(settings: PipelineSettings) -> Pipeline {
    let store = Arc::new(InMemoryStore::new());
    let asset = AssetRef {
        asset_id: Uuid::new_v4(),
        asset_tag_id: TAG.to_string(),
        organization_id: Uuid::new_v4(),
        name: CompanyName().fake(),
    };
    store.add_asset(asset.clone());
    for (id, latitude, longitude) in GATEWAYS {
        store.add_gateway(GatewayFix {
            gateway_id: id.to_string(),
            organization_id: asset.organization_id,
            latitude,
            longitude,
            altitude: None,
        });
    }

    let cache = Arc::new(InMemoryContainmentCache::new());
    let observations: Arc<InMemoryEventStream<Value>> =
        Arc::new(InMemoryEventStream::new("observations"));
    let geofence_stream: Arc<InMemoryEventStream<EstimatedLocation>> =
        Arc::new(InMemoryEventStream::new("geofence-locations"));
    let anomaly_stream: Arc<InMemoryEventStream<EstimatedLocation>> =
        Arc::new(InMemoryEventStream::new("anomaly-locations"));

    let deps = PipelineDeps::with_store(
        store.clone(),
        cache.clone(),
        Arc::new(NoThrottle),
        Arc::new(HeuristicAnomalyScorer::default()),
        observations.clone(),
        geofence_stream.clone(),
        anomaly_stream.clone(),
    );
    let coordinator =
        Arc::new(Coordinator::new(deps, settings).expect("pipeline settings are valid"));

    Pipeline {
        store,
        cache,
        observations,
        geofence_stream,
        anomaly_stream,
        coordinator,
        asset,
    }
}

impl Pipeline {
    pub fn stats(&self, kind: ProcessorKind) -> asset_tracking_api::processors::ProcessorStats {
        use asset_tracking_api::processors::ManagedProcessor;
        self.coordinator.processor(kind).stats()
    }

    pub fn state(&self, kind: ProcessorKind) -> asset_tracking_api::processors::ProcessorState {
        use asset_tracking_api::processors::ManagedProcessor;
        self.coordinator.processor(kind).state()
    }

    /// Adds a circular geofence of the asset's organization.
    pub fn add_circle(
        &self,
        classification: GeofenceClassification,
        center: Coordinate,
        radius_m: f64,
    ) -> Geofence {
        let geofence = Geofence {
            id: Uuid::new_v4(),
            organization_id: self.asset.organization_id,
            name: Word().fake(),
            shape: GeofenceShape::Circular { center, radius_m },
            classification,
            alert_on_entry: true,
            alert_on_exit: true,
            tolerance_m: None,
            active: true,
        };
        self.store.add_geofence(geofence.clone());
        geofence
    }

    /// A trilaterated estimate for the fixture asset at the given point.
    pub fn location_at(&self, point: Coordinate, seconds: i64) -> EstimatedLocation {
        let fix = PositionFix {
            latitude: point.latitude,
            longitude: point.longitude,
            altitude: None,
            uncertainty_m: 4.0,
            confidence: 75.0,
            algorithm: LocationAlgorithm::Trilateration,
            gateway_ids: GATEWAYS.iter().map(|(id, _, _)| id.to_string()).collect(),
            signal_quality: 60.0,
            rssi_variance: 20.0,
            degenerate: false,
        };
        EstimatedLocation::assemble(
            &self.asset,
            fix,
            Movement::unknown(),
            Utc::now() + ChronoDuration::seconds(seconds),
        )
    }
}

pub fn observation(gateway: &str, rssi: i32) -> Value {
    json!({
        "asset_tag_id": TAG,
        "gateway_id": gateway,
        "rssi": rssi,
        "timestamp": Utc::now().to_rfc3339(),
    })
}

/// Polls `check` until it holds, failing the test after five seconds.
pub async fn wait_until<F: Fn() -> bool>(check: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
