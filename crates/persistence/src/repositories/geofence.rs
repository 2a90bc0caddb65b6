//! Geofence repository.

use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use domain::models::Geofence;
use domain::ports::{GeofenceDirectory, ServiceError};

use crate::entities::GeofenceEntity;
use crate::error::to_service_error;
use crate::metrics::QueryTimer;

#[derive(Clone)]
pub struct GeofenceRepository {
    pool: PgPool,
}

impl GeofenceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl GeofenceDirectory for GeofenceRepository {
    /// Rows that fail shape or classification checks are skipped and logged.
    async fn active_geofences(&self, organization_id: Uuid) -> Result<Vec<Geofence>, ServiceError> {
        let timer = QueryTimer::new("active_geofences");
        let result = sqlx::query_as::<_, GeofenceEntity>(
            r#"
            SELECT id, organization_id, name, shape_type, center_latitude, center_longitude,
                   radius_m, vertices, classification, alert_on_entry, alert_on_exit,
                   tolerance_m, active
            FROM geofences
            WHERE organization_id = $1 AND active = TRUE
            ORDER BY created_at
            "#,
        )
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await;
        timer.record();

        let rows = result.map_err(|e| to_service_error("active_geofences", e))?;
        Ok(rows
            .into_iter()
            .filter_map(|row| match Geofence::try_from(row) {
                Ok(geofence) => Some(geofence),
                Err(e) => {
                    warn!(organization_id = %organization_id, error = %e, "Skipping invalid geofence");
                    None
                }
            })
            .collect())
    }
}
