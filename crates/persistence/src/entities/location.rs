//! Estimated location entity (database row mapping).

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use domain::models::{EstimatedLocation, LocationAlgorithm};

/// Row of the append-only `estimated_locations` table.
#[derive(Debug, Clone, FromRow)]
pub struct EstimatedLocationEntity {
    pub id: Uuid,
    pub asset_id: Uuid,
    pub asset_tag_id: String,
    pub organization_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    pub uncertainty_m: f64,
    pub confidence: f64,
    pub algorithm: String,
    pub estimated_at: DateTime<Utc>,
    pub gateway_count: i32,
    pub gateway_ids: Vec<String>,
    pub signal_quality: f64,
    pub rssi_variance: f64,
    pub speed_mps: Option<f64>,
    pub bearing_deg: Option<f64>,
    pub distance_moved_m: Option<f64>,
}

impl EstimatedLocationEntity {
    /// Convert to domain model.
    pub fn into_domain(self) -> EstimatedLocation {
        let algorithm = self
            .algorithm
            .parse::<LocationAlgorithm>()
            .unwrap_or(LocationAlgorithm::Trilateration);

        EstimatedLocation {
            id: self.id,
            asset_id: self.asset_id,
            asset_tag_id: self.asset_tag_id,
            organization_id: self.organization_id,
            latitude: self.latitude,
            longitude: self.longitude,
            altitude: self.altitude,
            uncertainty_m: self.uncertainty_m,
            confidence: self.confidence,
            algorithm,
            estimated_at: self.estimated_at,
            gateway_count: self.gateway_count.max(0) as usize,
            gateway_ids: self.gateway_ids,
            signal_quality: self.signal_quality,
            rssi_variance: self.rssi_variance,
            speed_mps: self.speed_mps,
            bearing_deg: self.bearing_deg,
            distance_moved_m: self.distance_moved_m,
        }
    }
}

impl From<EstimatedLocationEntity> for EstimatedLocation {
    fn from(entity: EstimatedLocationEntity) -> Self {
        entity.into_domain()
    }
}
