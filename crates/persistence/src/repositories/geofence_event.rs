//! Geofence event repository.

use sqlx::PgPool;
use uuid::Uuid;

use domain::models::GeofenceEvent;
use domain::ports::{GeofenceEventStore, ServiceError};

use crate::entities::GeofenceEventEntity;
use crate::error::to_service_error;
use crate::metrics::QueryTimer;

#[derive(Clone)]
pub struct GeofenceEventRepository {
    pool: PgPool,
}

impl GeofenceEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Most recent events for an asset, newest first.
    pub async fn find_by_asset(
        &self,
        asset_id: Uuid,
        limit: i64,
    ) -> Result<Vec<GeofenceEvent>, ServiceError> {
        let timer = QueryTimer::new("geofence_events_by_asset");
        let result = sqlx::query_as::<_, GeofenceEventEntity>(
            r#"
            SELECT id, geofence_id, asset_id, organization_id, event_type, timestamp,
                   latitude, longitude, confidence, distance_from_boundary_m
            FROM geofence_events
            WHERE asset_id = $1
            ORDER BY timestamp DESC
            LIMIT $2
            "#,
        )
        .bind(asset_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await;
        timer.record();

        let rows = result.map_err(|e| to_service_error("geofence_events_by_asset", e))?;
        Ok(rows
            .into_iter()
            .filter_map(GeofenceEventEntity::into_domain)
            .collect())
    }
}

#[async_trait::async_trait]
impl GeofenceEventStore for GeofenceEventRepository {
    async fn insert_event(&self, event: &GeofenceEvent) -> Result<(), ServiceError> {
        let timer = QueryTimer::new("insert_geofence_event");
        let result = sqlx::query(
            r#"
            INSERT INTO geofence_events (id, geofence_id, asset_id, organization_id, event_type,
                                         timestamp, latitude, longitude, confidence,
                                         distance_from_boundary_m)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(event.id)
        .bind(event.geofence_id)
        .bind(event.asset_id)
        .bind(event.organization_id)
        .bind(event.event_type.as_str())
        .bind(event.timestamp)
        .bind(event.latitude)
        .bind(event.longitude)
        .bind(event.confidence)
        .bind(event.distance_from_boundary_m)
        .execute(&self.pool)
        .await;
        timer.record();

        result
            .map(|_| ())
            .map_err(|e| to_service_error("insert_geofence_event", e))
    }
}
