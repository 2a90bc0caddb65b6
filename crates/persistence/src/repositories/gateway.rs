//! Gateway repository.

use sqlx::PgPool;
use uuid::Uuid;

use domain::models::GatewayFix;
use domain::ports::{GatewayDirectory, ServiceError};

use crate::entities::GatewayEntity;
use crate::error::to_service_error;
use crate::metrics::QueryTimer;

#[derive(Clone)]
pub struct GatewayRepository {
    pool: PgPool,
}

impl GatewayRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl GatewayDirectory for GatewayRepository {
    async fn find_gateways(
        &self,
        organization_id: Uuid,
        gateway_ids: &[String],
    ) -> Result<Vec<GatewayFix>, ServiceError> {
        if gateway_ids.is_empty() {
            return Ok(Vec::new());
        }

        let timer = QueryTimer::new("find_gateways");
        let result = sqlx::query_as::<_, GatewayEntity>(
            r#"
            SELECT gateway_id, organization_id, latitude, longitude, altitude
            FROM gateways
            WHERE organization_id = $1 AND gateway_id = ANY($2) AND active = TRUE
            "#,
        )
        .bind(organization_id)
        .bind(gateway_ids)
        .fetch_all(&self.pool)
        .await;
        timer.record();

        result
            .map(|rows| rows.into_iter().map(GatewayFix::from).collect())
            .map_err(|e| to_service_error("find_gateways", e))
    }
}
