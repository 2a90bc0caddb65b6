//! Operator endpoints for the pipeline processors.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use crate::app::AppState;
use crate::error::ApiError;
use crate::processors::{
    ConfigPatch, HealthReport, ProcessorKind, ProcessorState, ProcessorStats,
};

#[derive(Debug, Serialize)]
pub struct ProcessorResponse {
    pub name: ProcessorKind,
    pub state: ProcessorState,
    pub stats: ProcessorStats,
}

fn parse_kind(name: &str) -> Result<ProcessorKind, ApiError> {
    Ok(name.parse::<ProcessorKind>()?)
}

fn describe(state: &AppState, kind: ProcessorKind) -> ProcessorResponse {
    let processor = state.coordinator.processor(kind);
    ProcessorResponse {
        name: kind,
        state: processor.state(),
        stats: processor.stats(),
    }
}

/// List every processor with its state and counters.
///
/// GET /api/v1/processors
pub async fn list_processors(State(state): State<AppState>) -> Json<HealthReport> {
    Json(state.coordinator.health_check())
}

/// POST /api/v1/processors/:name/start
pub async fn start_processor(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ProcessorResponse>, ApiError> {
    let kind = parse_kind(&name)?;
    state.coordinator.start(kind).await?;
    Ok(Json(describe(&state, kind)))
}

/// POST /api/v1/processors/:name/stop
pub async fn stop_processor(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ProcessorResponse>, ApiError> {
    let kind = parse_kind(&name)?;
    state.coordinator.stop(kind).await?;
    Ok(Json(describe(&state, kind)))
}

/// POST /api/v1/processors/:name/restart
pub async fn restart_processor(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ProcessorResponse>, ApiError> {
    let kind = parse_kind(&name)?;
    state.coordinator.restart(kind).await?;
    Ok(Json(describe(&state, kind)))
}

/// Apply a runtime settings patch. The whole patch is rejected if any key
/// is unsupported or any value invalid.
///
/// PATCH /api/v1/processors/:name/config
pub async fn update_processor_config(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(patch): Json<ConfigPatch>,
) -> Result<Json<ProcessorResponse>, ApiError> {
    let kind = parse_kind(&name)?;
    if patch.is_empty() {
        return Err(ApiError::Validation("Empty settings patch".to_string()));
    }
    state.coordinator.update_config(kind, &patch)?;
    Ok(Json(describe(&state, kind)))
}
