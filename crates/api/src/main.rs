use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use domain::services::HeuristicAnomalyScorer;
use persistence::repositories::{
    AlertRepository, AssetRepository, GatewayRepository, GeofenceEventRepository,
    GeofenceRepository, LocationRepository,
};
use tracing::{info, warn};

use asset_tracking_api::app::{create_app, AppState};
use asset_tracking_api::config::Config;
use asset_tracking_api::jobs::{JobScheduler, PoolMetricsJob, StateCleanupJob};
use asset_tracking_api::middleware::{init_logging, init_metrics};
use asset_tracking_api::processors::{Coordinator, PipelineDeps, PipelineSettings};
use asset_tracking_api::services::{
    GovernorAlertThrottle, InMemoryContainmentCache, InMemoryEventStream,
};

const JOB_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let config = Config::load().context("Failed to load configuration")?;
    init_logging(&config.logging).context("Failed to initialize logging")?;
    init_metrics()?;

    info!("Starting asset tracker v{}", env!("CARGO_PKG_VERSION"));

    let pool = persistence::db::create_pool(&config.database.pool_config()).await?;

    info!("Running database migrations...");
    persistence::db::run_migrations(&pool).await?;
    info!("Migrations completed");

    let cache = Arc::new(InMemoryContainmentCache::new());
    let throttle = Arc::new(GovernorAlertThrottle::new(Duration::from_secs(
        config.alerts.throttle_window_secs,
    )));
    let observations: Arc<InMemoryEventStream<serde_json::Value>> =
        Arc::new(InMemoryEventStream::new("observations"));

    let deps = PipelineDeps {
        assets: Arc::new(AssetRepository::new(pool.clone())),
        gateways: Arc::new(GatewayRepository::new(pool.clone())),
        geofences: Arc::new(GeofenceRepository::new(pool.clone())),
        locations: Arc::new(LocationRepository::new(pool.clone())),
        geofence_events: Arc::new(GeofenceEventRepository::new(pool.clone())),
        alerts: Arc::new(AlertRepository::new(pool.clone())),
        cache: cache.clone(),
        throttle: throttle.clone(),
        scorer: Arc::new(HeuristicAnomalyScorer::new(config.anomaly.scorer_config())),
        observations: observations.clone(),
        geofence_stream: Arc::new(InMemoryEventStream::new("geofence-locations")),
        anomaly_stream: Arc::new(InMemoryEventStream::new("anomaly-locations")),
    };
    let coordinator = Arc::new(Coordinator::new(
        deps,
        PipelineSettings::from_config(&config),
    )?);

    if config.processors.autostart {
        let report = coordinator.start_all().await;
        if !report.all_succeeded() {
            warn!("Some processors failed to start; see /health");
        }
    }

    let mut scheduler = JobScheduler::new();
    scheduler.register(PoolMetricsJob::new(pool.clone()));
    scheduler.register(StateCleanupJob::new(cache, throttle));
    scheduler.start();

    let addr = config.socket_addr()?;
    let state = AppState::new(config, coordinator.clone(), observations, Some(pool));
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Stopping processors...");
    coordinator.stop_all().await;

    scheduler.shutdown();
    scheduler.wait_for_shutdown(JOB_SHUTDOWN_TIMEOUT).await;

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
