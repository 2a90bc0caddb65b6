//! Long-running stream processors and their coordinator.
//!
//! Each processor owns one tokio task that pulls from an [`EventStream`],
//! handles items strictly in order, and reports its state and counters to
//! the [`coordinator::Coordinator`].
//!
//! [`EventStream`]: domain::ports::EventStream

pub mod anomaly;
pub mod coordinator;
pub mod geofence;
pub mod location;
pub mod runtime;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use domain::ports::ServiceError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use anomaly::AnomalyProcessor;
pub use coordinator::{Coordinator, HealthReport, LifecycleReport, PipelineDeps, PipelineSettings};
pub use geofence::GeofenceProcessor;
pub use location::LocationProcessor;
pub use runtime::{ItemOutcome, ManagedProcessor, Processor, ProcessorHandle, RuntimeOptions};

/// The three pipeline processors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessorKind {
    Location,
    Anomaly,
    Geofence,
}

impl ProcessorKind {
    pub const ALL: [ProcessorKind; 3] = [
        ProcessorKind::Location,
        ProcessorKind::Anomaly,
        ProcessorKind::Geofence,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessorKind::Location => "location",
            ProcessorKind::Anomaly => "anomaly",
            ProcessorKind::Geofence => "geofence",
        }
    }

    /// Parse from string (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "location" => Some(ProcessorKind::Location),
            "anomaly" => Some(ProcessorKind::Anomaly),
            "geofence" => Some(ProcessorKind::Geofence),
            _ => None,
        }
    }
}

impl fmt::Display for ProcessorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProcessorKind {
    type Err = ProcessorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| ProcessorError::UnknownProcessor(s.to_string()))
    }
}

/// Lifecycle: `stopped -> starting -> running -> stopping -> stopped`.
/// `error` is only left through an explicit start or restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessorState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

impl ProcessorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessorState::Stopped => "stopped",
            ProcessorState::Starting => "starting",
            ProcessorState::Running => "running",
            ProcessorState::Stopping => "stopping",
            ProcessorState::Error => "error",
        }
    }
}

impl fmt::Display for ProcessorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Counters reported in health checks.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessorStats {
    /// Items handled successfully, rejections included.
    pub processed: u64,
    /// Items dropped by input validation.
    pub rejected: u64,
    /// Downstream records produced (estimates, events, alerts).
    pub emitted: u64,
    /// Fatal failures since the processor was created.
    pub errors: u64,
    pub restarts: u64,
    /// Items pulled but not yet handled.
    pub pending: usize,
    pub batch_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activity_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

/// Partial settings update, keyed by setting name.
pub type ConfigPatch = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Unknown processor: {0}")]
    UnknownProcessor(String),

    #[error("Unsupported setting for {kind} processor: {key}")]
    UnsupportedSetting { kind: ProcessorKind, key: String },

    #[error("Invalid value for {key}: {message}")]
    InvalidSetting { key: String, message: String },

    #[error("{kind} processor failed to start: {message}")]
    StartFailed { kind: ProcessorKind, message: String },

    #[error("{kind} processor did not stop within {timeout_ms} ms and was aborted")]
    StopTimedOut { kind: ProcessorKind, timeout_ms: u64 },

    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl ProcessorError {
    pub fn invalid(key: &str, message: impl Into<String>) -> Self {
        ProcessorError::InvalidSetting {
            key: key.to_string(),
            message: message.into(),
        }
    }
}

/// Reads a positive finite number from a patch value.
pub(crate) fn positive_f64(key: &str, value: &serde_json::Value) -> Result<f64, ProcessorError> {
    match value.as_f64() {
        Some(v) if v.is_finite() && v > 0.0 => Ok(v),
        _ => Err(ProcessorError::invalid(key, "must be a positive number")),
    }
}

/// Reads a finite number from a patch value.
pub(crate) fn finite_f64(key: &str, value: &serde_json::Value) -> Result<f64, ProcessorError> {
    match value.as_f64() {
        Some(v) if v.is_finite() => Ok(v),
        _ => Err(ProcessorError::invalid(key, "must be a number")),
    }
}

/// Reads a positive integer from a patch value.
pub(crate) fn positive_u64(key: &str, value: &serde_json::Value) -> Result<u64, ProcessorError> {
    match value.as_u64() {
        Some(v) if v > 0 => Ok(v),
        _ => Err(ProcessorError::invalid(key, "must be a positive integer")),
    }
}
