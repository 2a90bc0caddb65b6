//! Estimated location repository.

use sqlx::PgPool;
use uuid::Uuid;

use domain::models::EstimatedLocation;
use domain::ports::{LocationStore, ServiceError};

use crate::entities::EstimatedLocationEntity;
use crate::error::to_service_error;
use crate::metrics::QueryTimer;

/// Append-only store of estimates; the latest row per asset is its current
/// location.
#[derive(Clone)]
pub struct LocationRepository {
    pool: PgPool,
}

impl LocationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl LocationStore for LocationRepository {
    async fn insert_location(&self, location: &EstimatedLocation) -> Result<(), ServiceError> {
        let timer = QueryTimer::new("insert_location");
        let result = sqlx::query(
            r#"
            INSERT INTO estimated_locations (
                id, asset_id, asset_tag_id, organization_id, latitude, longitude, altitude,
                uncertainty_m, confidence, algorithm, estimated_at, gateway_count, gateway_ids,
                signal_quality, rssi_variance, speed_mps, bearing_deg, distance_moved_m
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(location.id)
        .bind(location.asset_id)
        .bind(&location.asset_tag_id)
        .bind(location.organization_id)
        .bind(location.latitude)
        .bind(location.longitude)
        .bind(location.altitude)
        .bind(location.uncertainty_m)
        .bind(location.confidence)
        .bind(location.algorithm.as_str())
        .bind(location.estimated_at)
        .bind(location.gateway_count as i32)
        .bind(&location.gateway_ids)
        .bind(location.signal_quality)
        .bind(location.rssi_variance)
        .bind(location.speed_mps)
        .bind(location.bearing_deg)
        .bind(location.distance_moved_m)
        .execute(&self.pool)
        .await;
        timer.record();

        result
            .map(|_| ())
            .map_err(|e| to_service_error("insert_location", e))
    }

    async fn latest_location(
        &self,
        asset_id: Uuid,
    ) -> Result<Option<EstimatedLocation>, ServiceError> {
        let timer = QueryTimer::new("latest_location");
        let result = sqlx::query_as::<_, EstimatedLocationEntity>(
            r#"
            SELECT id, asset_id, asset_tag_id, organization_id, latitude, longitude, altitude,
                   uncertainty_m, confidence, algorithm, estimated_at, gateway_count, gateway_ids,
                   signal_quality, rssi_variance, speed_mps, bearing_deg, distance_moved_m
            FROM estimated_locations
            WHERE asset_id = $1
            ORDER BY estimated_at DESC
            LIMIT 1
            "#,
        )
        .bind(asset_id)
        .fetch_optional(&self.pool)
        .await;
        timer.record();

        result
            .map(|row| row.map(EstimatedLocation::from))
            .map_err(|e| to_service_error("latest_location", e))
    }
}
