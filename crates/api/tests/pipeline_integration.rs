//! End-to-end behaviour of the location pipeline on in-memory collaborators.

mod common;

use common::{observation, pipeline, wait_until, SITE_CENTER};
use asset_tracking_api::processors::ProcessorKind;
use domain::models::{
    AlertSeverity, AlertStatus, AlertType, Coordinate, GeofenceClassification,
    GeofenceTransitionType, LocationAlgorithm, NewAlert,
};
use domain::ports::EventStream;
use serde_json::json;

/// About 1.1 km north of the site.
const OUTSIDE: Coordinate = Coordinate {
    latitude: 52.5303,
    longitude: 13.4057,
};

/// About 10 m north of the site centre.
const NEAR_CENTER: Coordinate = Coordinate {
    latitude: 52.52039,
    longitude: 13.4057,
};

#[tokio::test]
async fn test_three_gateways_trilaterate_inside_hull() {
    let p = pipeline();
    assert!(p.coordinator.start_all().await.all_succeeded());

    for (gateway, rssi) in [("GW-1", -55), ("GW-2", -70), ("GW-3", -85)] {
        p.observations.publish(observation(gateway, rssi)).await.unwrap();
    }

    wait_until(|| p.store.locations().len() == 1).await;
    let location = p.store.locations().remove(0);

    assert_eq!(location.algorithm, LocationAlgorithm::Trilateration);
    assert_eq!(location.gateway_count, 3);
    assert!(location.confidence >= 40.0);
    assert!((52.5200..=52.5209).contains(&location.latitude));
    assert!((13.4050..=13.4065).contains(&location.longitude));
    assert!(location.speed_mps.is_none());

    // Both downstream processors see the estimate.
    wait_until(|| p.stats(ProcessorKind::Geofence).processed == 1).await;
    wait_until(|| p.stats(ProcessorKind::Anomaly).processed == 1).await;

    assert!(p.coordinator.stop_all().await.all_succeeded());
}

#[tokio::test]
async fn test_second_window_carries_movement() {
    let p = pipeline();
    p.coordinator.start_all().await;

    p.observations.publish(observation("GW-1", -60)).await.unwrap();
    wait_until(|| p.store.locations().len() == 1).await;

    p.observations.publish(observation("GW-2", -60)).await.unwrap();
    wait_until(|| p.store.locations().len() == 2).await;

    let second = p.store.locations().remove(1);
    assert_eq!(second.algorithm, LocationAlgorithm::SingleGateway);
    assert!(second.distance_moved_m.is_some());
    let speed = second.speed_mps.unwrap();
    assert!(speed.is_finite() && speed >= 0.0);

    p.coordinator.stop_all().await;
}

#[tokio::test]
async fn test_out_of_range_rssi_is_dropped() {
    let p = pipeline();
    p.coordinator.start_all().await;

    p.observations.publish(observation("GW-1", 10)).await.unwrap();
    p.observations
        .publish(json!({"gateway_id": "GW-1", "rssi": -60}))
        .await
        .unwrap();

    wait_until(|| p.stats(ProcessorKind::Location).rejected == 2).await;
    p.coordinator.stop_all().await;

    assert!(p.store.locations().is_empty());
    assert_eq!(
        p.state(ProcessorKind::Location),
        asset_tracking_api::processors::ProcessorState::Stopped
    );
}

#[tokio::test]
async fn test_restricted_entry_raises_event_and_alert() {
    let p = pipeline();
    let geofence = p.add_circle(GeofenceClassification::Restricted, SITE_CENTER, 50.0);
    p.coordinator.start_all().await;

    p.geofence_stream
        .publish(p.location_at(OUTSIDE, 0))
        .await
        .unwrap();
    p.geofence_stream
        .publish(p.location_at(NEAR_CENTER, 30))
        .await
        .unwrap();

    wait_until(|| p.store.alerts().len() == 1).await;

    let events = p.store.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, GeofenceTransitionType::Entry);
    assert_eq!(events[0].geofence_id, geofence.id);
    assert!(events[0].distance_from_boundary_m > 0.0);

    let alert = p.store.alerts()[0].clone();
    assert_eq!(alert.alert_type, AlertType::GeofenceViolation);
    assert_eq!(alert.severity, AlertSeverity::High);
    assert_eq!(alert.status, AlertStatus::Active);
    assert_eq!(alert.geofence_id, Some(geofence.id));

    // Leaving ends the violation.
    p.geofence_stream
        .publish(p.location_at(OUTSIDE, 60))
        .await
        .unwrap();
    wait_until(|| p.store.events().len() == 2).await;
    wait_until(|| {
        p.store
            .alerts()
            .iter()
            .any(|a| a.id == alert.id && a.status == AlertStatus::Resolved)
    })
    .await;
    let resolved = p
        .store
        .alerts()
        .into_iter()
        .find(|a| a.id == alert.id)
        .unwrap();
    assert!(resolved.auto_resolved);

    p.coordinator.stop_all().await;
}

#[tokio::test]
async fn test_first_sighting_only_records_baseline() {
    let p = pipeline();
    p.add_circle(GeofenceClassification::Restricted, SITE_CENTER, 200.0);

    let outcome = p
        .coordinator
        .force_evaluate(&p.location_at(SITE_CENTER, 0))
        .await
        .unwrap();
    assert_eq!(outcome.geofences_evaluated, 1);
    assert!(outcome.events.is_empty());

    // Same state again: still nothing.
    let outcome = p
        .coordinator
        .force_evaluate(&p.location_at(SITE_CENTER, 10))
        .await
        .unwrap();
    assert!(outcome.events.is_empty());
    assert!(p.store.events().is_empty());
}

#[tokio::test]
async fn test_concurrent_evaluations_emit_one_transition() {
    let p = pipeline();
    p.add_circle(GeofenceClassification::Authorized, SITE_CENTER, 200.0);

    p.coordinator
        .force_evaluate(&p.location_at(OUTSIDE, 0))
        .await
        .unwrap();

    let first = p.location_at(SITE_CENTER, 10);
    let second = p.location_at(SITE_CENTER, 10);
    let (a, b) = tokio::join!(
        p.coordinator.force_evaluate(&first),
        p.coordinator.force_evaluate(&second)
    );

    let emitted = a.unwrap().events.len() + b.unwrap().events.len();
    assert_eq!(emitted, 1);
    assert_eq!(p.store.events().len(), 1);
}

#[tokio::test]
async fn test_resolving_twice_is_a_noop() {
    let p = pipeline();
    let alerts = p.coordinator.alerts();

    let created = alerts
        .create(NewAlert {
            asset_id: p.asset.asset_id,
            organization_id: p.asset.organization_id,
            geofence_id: None,
            alert_type: AlertType::LowBattery,
            severity: AlertSeverity::Medium,
            message: "Battery low".to_string(),
            context: json!({"battery_level": 9}),
        })
        .await
        .unwrap()
        .created()
        .unwrap();

    let first = alerts
        .resolve(created.id, Some("battery swapped".to_string()))
        .await
        .unwrap();
    let second = alerts
        .resolve(created.id, Some("again".to_string()))
        .await
        .unwrap();

    assert_eq!(first.status, AlertStatus::Resolved);
    assert_eq!(second.resolved_at, first.resolved_at);
    assert_eq!(second.resolution_notes.as_deref(), Some("battery swapped"));
    assert!(!second.auto_resolved);
    assert_eq!(p.store.alerts().len(), 1);
}

#[tokio::test]
async fn test_low_battery_raises_alert() {
    let p = pipeline();
    p.coordinator.start_all().await;

    let mut message = observation("GW-1", -58);
    message["battery_level"] = json!(4);
    p.observations.publish(message).await.unwrap();

    wait_until(|| !p.store.alerts().is_empty()).await;
    let alert = p.store.alerts()[0].clone();
    assert_eq!(alert.alert_type, AlertType::LowBattery);
    assert_eq!(alert.severity, AlertSeverity::High);

    p.coordinator.stop_all().await;
}

#[tokio::test]
async fn test_restarting_healthy_geofence_processor() {
    let p = pipeline();
    p.coordinator.start_all().await;
    assert!(p.coordinator.health_check().is_healthy());

    p.coordinator.restart(ProcessorKind::Geofence).await.unwrap();

    assert_eq!(
        p.state(ProcessorKind::Geofence),
        asset_tracking_api::processors::ProcessorState::Running
    );
    let health = p.coordinator.health_check();
    assert!(health.is_healthy());
    assert_eq!(p.stats(ProcessorKind::Geofence).restarts, 1);

    p.coordinator.stop_all().await;
}
