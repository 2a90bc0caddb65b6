//! Asset entity (database row mapping).

use sqlx::FromRow;
use uuid::Uuid;

use domain::models::AssetRef;

/// Row of the `assets` table as read by the pipeline.
#[derive(Debug, Clone, FromRow)]
pub struct AssetEntity {
    pub id: Uuid,
    pub asset_tag_id: String,
    pub organization_id: Uuid,
    pub name: String,
}

impl From<AssetEntity> for AssetRef {
    fn from(entity: AssetEntity) -> Self {
        Self {
            asset_id: entity.id,
            asset_tag_id: entity.asset_tag_id,
            organization_id: entity.organization_id,
            name: entity.name,
        }
    }
}
