//! Geofence containment and transition detection.
//!
//! Containment state per (geofence, asset) lives in the shared cache with a
//! TTL. Each evaluation atomically swaps in the new state and compares it to
//! the previous one, so concurrent evaluations of the same asset can never
//! both report the same transition. Without a cached previous state no
//! transition is reported; the state is only recorded. If handling a
//! transition fails, the previous state is written back.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use geo::{Contains, Coord, EuclideanDistance, LineString, Point, Polygon};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::alert::AlertGenerator;
use super::geodesy::{haversine_m, LocalFrame};
use super::retry::RetryPolicy;
use crate::models::{
    Alert, AlertSeverity, AlertType, Coordinate, EstimatedLocation, Geofence,
    GeofenceClassification, GeofenceEvent, GeofenceShape, GeofenceTransitionType, NewAlert,
};
use crate::ports::{
    containment_key, ContainmentCache, GeofenceDirectory, GeofenceEventStore, ServiceError,
};

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Whether a point lies inside a geofence, and how far it is from the edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Containment {
    pub inside: bool,
    pub distance_from_boundary_m: f64,
}

/// Tests a point against a geofence. Points on the boundary, or within the
/// geofence's tolerance outside it, count as inside.
pub fn containment(geofence: &Geofence, point: Coordinate) -> Containment {
    let tolerance = geofence.tolerance();
    match &geofence.shape {
        GeofenceShape::Circular { center, radius_m } => {
            let distance = haversine_m(point, *center);
            Containment {
                inside: distance <= radius_m + tolerance,
                distance_from_boundary_m: (distance - radius_m).abs(),
            }
        }
        GeofenceShape::Polygon { vertices } => {
            if vertices.len() < 3 {
                return Containment {
                    inside: false,
                    distance_from_boundary_m: 0.0,
                };
            }
            // planar test in a frame centred on the point itself
            let frame = LocalFrame::new(point);
            let ring: LineString<f64> = vertices
                .iter()
                .map(|v| {
                    let (x, y) = frame.to_local(*v);
                    Coord { x, y }
                })
                .collect();
            let polygon = Polygon::new(ring, vec![]);
            let origin = Point::new(0.0, 0.0);
            let boundary = polygon.exterior().euclidean_distance(&origin);

            Containment {
                inside: polygon.contains(&origin) || boundary <= tolerance,
                distance_from_boundary_m: boundary,
            }
        }
    }
}

/// What one evaluation produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluationOutcome {
    pub geofences_evaluated: usize,
    pub events: Vec<GeofenceEvent>,
    pub alerts: Vec<Alert>,
    pub auto_resolved: Vec<Alert>,
}

pub struct GeofenceEvaluator {
    geofences: Arc<dyn GeofenceDirectory>,
    cache: Arc<dyn ContainmentCache>,
    events: Arc<dyn GeofenceEventStore>,
    alerts: Arc<AlertGenerator>,
    retry: RetryPolicy,
    cache_ttl_secs: AtomicU64,
}

impl GeofenceEvaluator {
    pub fn new(
        geofences: Arc<dyn GeofenceDirectory>,
        cache: Arc<dyn ContainmentCache>,
        events: Arc<dyn GeofenceEventStore>,
        alerts: Arc<AlertGenerator>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            geofences,
            cache,
            events,
            alerts,
            retry,
            cache_ttl_secs: AtomicU64::new(DEFAULT_CACHE_TTL.as_secs()),
        }
    }

    pub fn with_cache_ttl(self, ttl: Duration) -> Self {
        self.set_cache_ttl(ttl);
        self
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs.load(Ordering::Relaxed))
    }

    /// Applies to evaluations started after the call.
    pub fn set_cache_ttl(&self, ttl: Duration) {
        self.cache_ttl_secs
            .store(ttl.as_secs().max(1), Ordering::Relaxed);
    }

    /// Evaluates one estimate against every active geofence of its
    /// organization.
    pub async fn evaluate(
        &self,
        location: &EstimatedLocation,
    ) -> Result<EvaluationOutcome, ServiceError> {
        let organization_id = location.organization_id;
        let geofences = self
            .retry
            .run("load_geofences", || {
                self.geofences.active_geofences(organization_id)
            })
            .await?;

        let point = Coordinate::new(location.latitude, location.longitude);
        let ttl = self.cache_ttl();
        let mut outcome = EvaluationOutcome::default();

        for geofence in geofences.iter().filter(|g| g.active) {
            outcome.geofences_evaluated += 1;
            let containment = containment(geofence, point);
            let key = containment_key(geofence.id, location.asset_id);

            let previous = self
                .retry
                .run("containment_swap", || {
                    self.cache.swap(&key, containment.inside, ttl)
                })
                .await?;

            let Some(was_inside) = previous else {
                debug!(
                    geofence_id = %geofence.id,
                    asset_id = %location.asset_id,
                    inside = containment.inside,
                    "No prior containment state, recording baseline"
                );
                continue;
            };

            let Some(transition) = GeofenceTransitionType::between(was_inside, containment.inside)
            else {
                continue;
            };

            // Until every side effect of the transition has landed, a failure
            // puts the old state back so a redelivery detects it again.
            match self
                .apply_transition(geofence, location, transition, containment)
                .await
            {
                Ok(applied) => {
                    outcome.auto_resolved.extend(applied.auto_resolved);
                    outcome.events.extend(applied.event);
                    outcome.alerts.extend(applied.alert);
                }
                Err(e) => {
                    if let Err(restore) = self.cache.set(&key, was_inside, ttl).await {
                        warn!(
                            geofence_id = %geofence.id,
                            asset_id = %location.asset_id,
                            error = %restore,
                            "Failed to restore containment state"
                        );
                    }
                    return Err(e);
                }
            }
        }

        Ok(outcome)
    }
}

/// Side effects of one detected transition.
#[derive(Debug, Default)]
struct AppliedTransition {
    auto_resolved: Vec<Alert>,
    event: Option<GeofenceEvent>,
    alert: Option<Alert>,
}

impl GeofenceEvaluator {
    /// Resolves the violation the transition ends, then stores the event and
    /// raises its alert. Every step tolerates being repeated for the same
    /// estimate: resolution only touches open alerts and the event id is
    /// derived from the estimate and the geofence.
    async fn apply_transition(
        &self,
        geofence: &Geofence,
        location: &EstimatedLocation,
        transition: GeofenceTransitionType,
        containment: Containment,
    ) -> Result<AppliedTransition, ServiceError> {
        let mut applied = AppliedTransition::default();

        if returns_to_expected_state(geofence.classification, transition) {
            applied.auto_resolved = self
                .alerts
                .auto_resolve(
                    location.asset_id,
                    AlertType::GeofenceViolation,
                    Some(geofence.id),
                    &format!("Asset {} {} '{}'", location.asset_tag_id, verb(transition), geofence.name),
                )
                .await?;
        }

        if !geofence.alerts_on(transition) {
            return Ok(applied);
        }

        let event = GeofenceEvent {
            id: event_id(location, geofence),
            geofence_id: geofence.id,
            asset_id: location.asset_id,
            organization_id: location.organization_id,
            event_type: transition,
            timestamp: location.estimated_at,
            latitude: location.latitude,
            longitude: location.longitude,
            confidence: location.confidence,
            distance_from_boundary_m: containment.distance_from_boundary_m,
        };
        self.retry
            .run("insert_geofence_event", || self.events.insert_event(&event))
            .await?;

        info!(
            geofence_id = %geofence.id,
            asset_id = %location.asset_id,
            transition = %transition,
            "Geofence transition detected"
        );

        applied.alert = self
            .alerts
            .create(violation_alert(geofence, &event, location))
            .await?
            .created();
        applied.event = Some(event);
        Ok(applied)
    }
}

/// Stable per (estimate, geofence), so a redelivered estimate stores the
/// same event.
fn event_id(location: &EstimatedLocation, geofence: &Geofence) -> Uuid {
    Uuid::new_v5(&location.id, geofence.id.as_bytes())
}

/// Leaving a restricted area or re-entering an authorized one ends the
/// violation.
fn returns_to_expected_state(
    classification: GeofenceClassification,
    transition: GeofenceTransitionType,
) -> bool {
    matches!(
        (classification, transition),
        (GeofenceClassification::Restricted, GeofenceTransitionType::Exit)
            | (GeofenceClassification::Authorized, GeofenceTransitionType::Entry)
    )
}

fn verb(transition: GeofenceTransitionType) -> &'static str {
    match transition {
        GeofenceTransitionType::Entry => "entered",
        GeofenceTransitionType::Exit => "left",
    }
}

fn violation_alert(
    geofence: &Geofence,
    event: &GeofenceEvent,
    location: &EstimatedLocation,
) -> NewAlert {
    let severity = if returns_to_expected_state(geofence.classification, event.event_type) {
        AlertSeverity::Low
    } else {
        AlertSeverity::High
    };

    NewAlert {
        asset_id: event.asset_id,
        organization_id: event.organization_id,
        geofence_id: Some(geofence.id),
        alert_type: AlertType::GeofenceViolation,
        severity,
        message: format!(
            "Asset {} {} {} geofence '{}'",
            location.asset_tag_id,
            verb(event.event_type),
            geofence.classification.as_str(),
            geofence.name
        ),
        context: json!({
            "event_id": event.id,
            "transition": event.event_type.as_str(),
            "classification": geofence.classification.as_str(),
            "latitude": event.latitude,
            "longitude": event.longitude,
            "confidence": event.confidence,
            "distance_from_boundary_m": event.distance_from_boundary_m,
        }),
    }
}
