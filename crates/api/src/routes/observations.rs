//! Observation ingress.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::app::AppState;
use crate::error::ApiError;
use crate::middleware::metrics::record_observations_ingested;

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub accepted: usize,
}

/// Publish raw observation messages onto the observation stream.
///
/// POST /api/v1/observations
///
/// Accepts one message object or an array of them. Messages are validated
/// by the location processor, not here.
pub async fn ingest(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<IngestResponse>), ApiError> {
    let messages = match body {
        Value::Array(items) => items,
        item @ Value::Object(_) => vec![item],
        _ => {
            return Err(ApiError::Validation(
                "Expected an observation object or an array of them".to_string(),
            ))
        }
    };

    let max = state.config.server.max_ingest_batch;
    if messages.is_empty() {
        return Err(ApiError::Validation("No observations in request".to_string()));
    }
    if messages.len() > max {
        return Err(ApiError::Validation(format!(
            "At most {max} observations per request"
        )));
    }
    if let Some(index) = messages.iter().position(|m| !m.is_object()) {
        return Err(ApiError::Validation(format!(
            "Observation at index {index} is not an object"
        )));
    }

    let accepted = messages.len();
    for message in messages {
        state.observations.publish(message).await?;
    }

    record_observations_ingested(accepted);
    debug!(accepted = accepted, "Observations published");

    Ok((StatusCode::ACCEPTED, Json(IngestResponse { accepted })))
}
