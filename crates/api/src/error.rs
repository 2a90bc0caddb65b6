use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use domain::ports::ServiceError;
use serde::Serialize;
use thiserror::Error;

use crate::processors::ProcessorError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone()),
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg.clone()),
            ApiError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".into(),
                )
            }
            ApiError::ServiceUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable",
                msg.clone(),
            ),
        };

        let body = ErrorBody {
            error: error_code.into(),
            message,
        };

        (status, Json(body)).into_response()
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Unavailable { .. } => ApiError::ServiceUnavailable(err.to_string()),
            ServiceError::NotFound(what) => ApiError::NotFound(what),
            ServiceError::Internal(msg) => ApiError::Internal(msg),
        }
    }
}

impl From<ProcessorError> for ApiError {
    fn from(err: ProcessorError) -> Self {
        match err {
            ProcessorError::UnknownProcessor(name) => {
                ApiError::NotFound(format!("Unknown processor: {name}"))
            }
            ProcessorError::UnsupportedSetting { .. } | ProcessorError::InvalidSetting { .. } => {
                ApiError::Validation(err.to_string())
            }
            ProcessorError::StartFailed { .. } | ProcessorError::StopTimedOut { .. } => {
                ApiError::Conflict(err.to_string())
            }
            ProcessorError::Service(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::ProcessorKind;

    #[test]
    fn test_api_error_not_found() {
        let response = ApiError::NotFound("processor".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_api_error_internal_hides_details() {
        let response = ApiError::Internal("db exploded".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_service_error_mapping() {
        let err: ApiError = ServiceError::unavailable("store", "timeout").into();
        assert!(matches!(err, ApiError::ServiceUnavailable(_)));

        let err: ApiError = ServiceError::NotFound("alert".into()).into();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[test]
    fn test_processor_error_mapping() {
        let err: ApiError = ProcessorError::UnsupportedSetting {
            kind: ProcessorKind::Geofence,
            key: "min_gateways".into(),
        }
        .into();
        assert!(matches!(err, ApiError::Validation(ref m) if m.contains("min_gateways")));

        let err: ApiError = ProcessorError::UnknownProcessor("billing".into()).into();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);

        let err: ApiError = ProcessorError::StopTimedOut {
            kind: ProcessorKind::Location,
            timeout_ms: 10,
        }
        .into();
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
    }
}
