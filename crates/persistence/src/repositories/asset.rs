//! Asset repository.

use sqlx::PgPool;

use domain::models::AssetRef;
use domain::ports::{AssetDirectory, ServiceError};

use crate::entities::AssetEntity;
use crate::error::to_service_error;
use crate::metrics::QueryTimer;

/// Resolves tag identifiers against the `assets` table.
#[derive(Clone)]
pub struct AssetRepository {
    pool: PgPool,
}

impl AssetRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl AssetDirectory for AssetRepository {
    async fn find_by_tag(&self, asset_tag_id: &str) -> Result<Option<AssetRef>, ServiceError> {
        let timer = QueryTimer::new("find_asset_by_tag");
        let result = sqlx::query_as::<_, AssetEntity>(
            r#"
            SELECT id, asset_tag_id, organization_id, name
            FROM assets
            WHERE asset_tag_id = $1 AND active = TRUE
            "#,
        )
        .bind(asset_tag_id)
        .fetch_optional(&self.pool)
        .await;
        timer.record();

        result
            .map(|row| row.map(AssetRef::from))
            .map_err(|e| to_service_error("find_asset_by_tag", e))
    }
}
