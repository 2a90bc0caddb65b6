//! Alert repository.

use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use domain::models::{Alert, AlertType};
use domain::ports::{AlertStore, ServiceError};

use crate::entities::AlertEntity;
use crate::error::to_service_error;
use crate::metrics::QueryTimer;

const ALERT_COLUMNS: &str = "id, asset_id, organization_id, geofence_id, alert_type, severity, \
     status, auto_resolved, message, context, created_at, acknowledged_at, resolved_at, \
     resolution_notes";

#[derive(Clone)]
pub struct AlertRepository {
    pool: PgPool,
}

impl AlertRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn into_domain(entity: AlertEntity) -> Result<Alert, ServiceError> {
    Alert::try_from(entity).map_err(ServiceError::Internal)
}

#[async_trait::async_trait]
impl AlertStore for AlertRepository {
    async fn insert_alert(&self, alert: &Alert) -> Result<(), ServiceError> {
        let timer = QueryTimer::new("insert_alert");
        let result = sqlx::query(
            r#"
            INSERT INTO alerts (id, asset_id, organization_id, geofence_id, alert_type, severity,
                                status, auto_resolved, message, context, created_at,
                                acknowledged_at, resolved_at, resolution_notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(alert.id)
        .bind(alert.asset_id)
        .bind(alert.organization_id)
        .bind(alert.geofence_id)
        .bind(alert.alert_type.as_str())
        .bind(alert.severity.as_str())
        .bind(alert.status.as_str())
        .bind(alert.auto_resolved)
        .bind(&alert.message)
        .bind(&alert.context)
        .bind(alert.created_at)
        .bind(alert.acknowledged_at)
        .bind(alert.resolved_at)
        .bind(&alert.resolution_notes)
        .execute(&self.pool)
        .await;
        timer.record();

        result
            .map(|_| ())
            .map_err(|e| to_service_error("insert_alert", e))
    }

    async fn find_alert(&self, alert_id: Uuid) -> Result<Option<Alert>, ServiceError> {
        let timer = QueryTimer::new("find_alert");
        let sql = format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE id = $1");
        let result = sqlx::query_as::<_, AlertEntity>(&sql)
            .bind(alert_id)
            .fetch_optional(&self.pool)
            .await;
        timer.record();

        result
            .map_err(|e| to_service_error("find_alert", e))?
            .map(into_domain)
            .transpose()
    }

    async fn update_alert(&self, alert: &Alert) -> Result<(), ServiceError> {
        let timer = QueryTimer::new("update_alert");
        let result = sqlx::query(
            r#"
            UPDATE alerts
            SET status = $2, auto_resolved = $3, acknowledged_at = $4, resolved_at = $5,
                resolution_notes = $6
            WHERE id = $1
            "#,
        )
        .bind(alert.id)
        .bind(alert.status.as_str())
        .bind(alert.auto_resolved)
        .bind(alert.acknowledged_at)
        .bind(alert.resolved_at)
        .bind(&alert.resolution_notes)
        .execute(&self.pool)
        .await;
        timer.record();

        let done = result.map_err(|e| to_service_error("update_alert", e))?;
        if done.rows_affected() == 0 {
            return Err(ServiceError::NotFound(format!("alert {}", alert.id)));
        }
        Ok(())
    }

    async fn find_open_alerts(
        &self,
        asset_id: Uuid,
        alert_type: AlertType,
        geofence_id: Option<Uuid>,
    ) -> Result<Vec<Alert>, ServiceError> {
        let timer = QueryTimer::new("find_open_alerts");
        let sql = format!(
            "SELECT {ALERT_COLUMNS} FROM alerts \
             WHERE asset_id = $1 AND alert_type = $2 \
               AND ($3::uuid IS NULL OR geofence_id = $3) \
               AND status IN ('active', 'acknowledged') \
             ORDER BY created_at"
        );
        let result = sqlx::query_as::<_, AlertEntity>(&sql)
            .bind(asset_id)
            .bind(alert_type.as_str())
            .bind(geofence_id)
            .fetch_all(&self.pool)
            .await;
        timer.record();

        let rows = result.map_err(|e| to_service_error("find_open_alerts", e))?;
        Ok(rows
            .into_iter()
            .filter_map(|row| match into_domain(row) {
                Ok(alert) => Some(alert),
                Err(e) => {
                    warn!(asset_id = %asset_id, error = %e, "Skipping unreadable alert row");
                    None
                }
            })
            .collect())
    }
}
