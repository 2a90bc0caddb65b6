//! Prometheus metrics: HTTP middleware, pipeline counters and the exporter.

use std::sync::OnceLock;
use std::time::Instant;

use axum::{
    body::Body,
    extract::MatchedPath,
    http::{header, Method, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::processors::ProcessorKind;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Middleware to record HTTP request metrics.
///
/// Records the following metrics:
/// - `http_requests_total`: Counter with labels (method, path, status)
/// - `http_request_duration_seconds`: Histogram with labels (method, path)
pub async fn metrics_middleware(req: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = method_to_str(req.method());
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let response = next.run(req).await;

    let status = response.status().as_u16().to_string();
    counter!(
        "http_requests_total",
        "method" => method,
        "path" => path.clone(),
        "status" => status
    )
    .increment(1);
    histogram!(
        "http_request_duration_seconds",
        "method" => method,
        "path" => path
    )
    .record(start.elapsed().as_secs_f64());

    response
}

/// Convert HTTP method to string for metric labels.
fn method_to_str(method: &Method) -> &'static str {
    match *method {
        Method::GET => "GET",
        Method::POST => "POST",
        Method::PUT => "PUT",
        Method::DELETE => "DELETE",
        Method::PATCH => "PATCH",
        Method::HEAD => "HEAD",
        Method::OPTIONS => "OPTIONS",
        _ => "OTHER",
    }
}

pub fn record_observations_ingested(count: usize) {
    counter!("observations_ingested_total").increment(count as u64);
}

pub fn record_observation_rejected(reason: &'static str) {
    counter!("observations_rejected_total", "reason" => reason).increment(1);
}

pub fn record_location_estimated(algorithm: &'static str, confidence: f64) {
    counter!("location_estimates_total", "algorithm" => algorithm).increment(1);
    histogram!("location_confidence", "algorithm" => algorithm).record(confidence);
}

pub fn record_geofence_event(transition: &'static str) {
    counter!("geofence_events_total", "transition" => transition).increment(1);
}

pub fn record_alert_created(alert_type: &'static str) {
    counter!("alerts_created_total", "type" => alert_type).increment(1);
}

pub fn record_processor_items(processor: ProcessorKind, outcome: &'static str, count: u64) {
    counter!(
        "processor_items_total",
        "processor" => processor.as_str(),
        "outcome" => outcome
    )
    .increment(count);
}

pub fn record_processor_error(processor: ProcessorKind) {
    counter!("processor_errors_total", "processor" => processor.as_str()).increment(1);
}

pub fn record_processor_pending(processor: ProcessorKind, pending: usize) {
    gauge!("processor_pending_items", "processor" => processor.as_str()).set(pending as f64);
}

/// Handler for /metrics endpoint that returns Prometheus text format.
pub async fn metrics_handler() -> impl IntoResponse {
    match PROMETHEUS_HANDLE.get() {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain")],
            "Metrics not initialized".to_string(),
        ),
    }
}

/// Installs the global Prometheus recorder.
///
/// Must be called once during startup before any metrics are recorded.
pub fn init_metrics() -> anyhow::Result<()> {
    let handle = PrometheusBuilder::new()
        .set_buckets(&[0.001, 0.005, 0.01, 0.05, 0.1, 0.2, 0.5, 1.0, 2.0, 5.0])?
        .install_recorder()?;

    if PROMETHEUS_HANDLE.set(handle).is_err() {
        anyhow::bail!("Prometheus recorder already initialized");
    }
    Ok(())
}
