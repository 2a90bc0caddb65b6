//! Geofence event entity (database row mapping).
//!
//! Maps to the `geofence_events` table.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use domain::models::{GeofenceEvent, GeofenceTransitionType};

#[derive(Debug, Clone, FromRow)]
pub struct GeofenceEventEntity {
    pub id: Uuid,
    pub geofence_id: Uuid,
    pub asset_id: Uuid,
    pub organization_id: Uuid,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub confidence: f64,
    pub distance_from_boundary_m: f64,
}

impl GeofenceEventEntity {
    /// Convert to domain model; unknown event types yield `None`.
    pub fn into_domain(self) -> Option<GeofenceEvent> {
        Some(GeofenceEvent {
            id: self.id,
            geofence_id: self.geofence_id,
            asset_id: self.asset_id,
            organization_id: self.organization_id,
            event_type: GeofenceTransitionType::parse(&self.event_type)?,
            timestamp: self.timestamp,
            latitude: self.latitude,
            longitude: self.longitude,
            confidence: self.confidence,
            distance_from_boundary_m: self.distance_from_boundary_m,
        })
    }
}
