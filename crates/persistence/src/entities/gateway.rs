//! Gateway entity (database row mapping).

use sqlx::FromRow;
use uuid::Uuid;

use domain::models::GatewayFix;

/// Row of the `gateways` table.
#[derive(Debug, Clone, FromRow)]
pub struct GatewayEntity {
    pub gateway_id: String,
    pub organization_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
}

impl From<GatewayEntity> for GatewayFix {
    fn from(entity: GatewayEntity) -> Self {
        Self {
            gateway_id: entity.gateway_id,
            organization_id: entity.organization_id,
            latitude: entity.latitude,
            longitude: entity.longitude,
            altitude: entity.altitude,
        }
    }
}
