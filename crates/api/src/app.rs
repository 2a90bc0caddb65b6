use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};
use serde_json::Value;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use domain::ports::EventStream;

use crate::config::Config;
use crate::middleware::{metrics_handler, metrics_middleware};
use crate::processors::Coordinator;
use crate::routes::{health, observations, processors};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub coordinator: Arc<Coordinator>,
    /// Ingress side of the observation stream.
    pub observations: Arc<dyn EventStream<Value>>,
    /// Absent when the pipeline runs on in-memory collaborators.
    pub pool: Option<PgPool>,
}

impl AppState {
    pub fn new(
        config: Config,
        coordinator: Arc<Coordinator>,
        observations: Arc<dyn EventStream<Value>>,
        pool: Option<PgPool>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            coordinator,
            observations,
            pool,
        }
    }
}

/// Creates the operator-facing router.
pub fn create_app(state: AppState) -> Router {
    let request_timeout = Duration::from_secs(state.config.server.request_timeout_secs);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let health_routes = Router::new()
        .route("/health", get(health::health_check))
        .route("/health/live", get(health::live))
        .route("/metrics", get(metrics_handler));

    let api_routes = Router::new()
        .route("/api/v1/observations", post(observations::ingest))
        .route("/api/v1/processors", get(processors::list_processors))
        .route(
            "/api/v1/processors/:name/start",
            post(processors::start_processor),
        )
        .route(
            "/api/v1/processors/:name/stop",
            post(processors::stop_processor),
        )
        .route(
            "/api/v1/processors/:name/restart",
            post(processors::restart_processor),
        )
        .route(
            "/api/v1/processors/:name/config",
            patch(processors::update_processor_config),
        );

    Router::new()
        .merge(health_routes)
        .merge(api_routes)
        // Global middleware (order matters: bottom layers run first)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(cors)
        .with_state(state)
}
