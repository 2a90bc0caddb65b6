//! Samples database connection pool gauges.

use sqlx::PgPool;

use super::scheduler::{Job, JobFrequency};

pub struct PoolMetricsJob {
    pool: PgPool,
}

impl PoolMetricsJob {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl Job for PoolMetricsJob {
    fn name(&self) -> &'static str {
        "pool_metrics"
    }

    fn frequency(&self) -> JobFrequency {
        JobFrequency::Seconds(10)
    }

    async fn execute(&self) -> anyhow::Result<()> {
        persistence::metrics::record_pool_metrics(&self.pool);
        Ok(())
    }
}
