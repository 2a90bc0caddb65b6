//! Database metrics collection.

use metrics::{counter, gauge, histogram};
use sqlx::PgPool;
use std::time::Instant;

/// Record database query duration.
pub fn record_query_duration(query_name: &str, duration_secs: f64) {
    histogram!(
        "database_query_duration_seconds",
        "query" => query_name.to_string()
    )
    .record(duration_secs);
}

/// Count a failed query by the domain error class it was mapped to.
pub fn record_query_error(query_name: &str, class: &'static str) {
    counter!(
        "database_query_errors_total",
        "query" => query_name.to_string(),
        "class" => class
    )
    .increment(1);
}

/// Record database connection pool metrics.
///
/// Sampled periodically by the pool metrics job.
pub fn record_pool_metrics(pool: &PgPool) {
    let size = pool.size() as usize;
    let idle = pool.num_idle();
    let active = size.saturating_sub(idle);

    gauge!("database_connections_active").set(active as f64);
    gauge!("database_connections_idle").set(idle as f64);
    gauge!("database_connections_total").set(size as f64);
}

/// Times one repository call.
///
/// ```ignore
/// let timer = QueryTimer::new("insert_alert");
/// let result = sqlx::query(...).execute(&pool).await;
/// timer.record();
/// ```
pub struct QueryTimer {
    query_name: &'static str,
    start: Instant,
}

impl QueryTimer {
    pub fn new(query_name: &'static str) -> Self {
        Self {
            query_name,
            start: Instant::now(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.query_name
    }

    /// Record the elapsed duration to metrics.
    pub fn record(self) {
        let duration = self.start.elapsed().as_secs_f64();
        record_query_duration(self.query_name, duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_timer_keeps_name() {
        let timer = QueryTimer::new("latest_location");
        assert_eq!(timer.name(), "latest_location");
        // no recorder installed; recording must still be harmless
        timer.record();
    }
}
