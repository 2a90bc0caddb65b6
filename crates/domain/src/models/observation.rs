//! Gateway observation model and inbound message parsing.
//!
//! An observation is one gateway's sighting of one asset tag. It is the unit
//! of input to the pipeline and is only ever built through
//! [`Observation::from_message`], which applies all bounds validation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::Validate;

/// Coarse signal quality label derived from RSSI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalQuality {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl SignalQuality {
    /// Classifies an RSSI reading (dBm).
    pub fn from_rssi(rssi: i32) -> Self {
        match rssi {
            r if r >= -50 => SignalQuality::Excellent,
            r if r >= -65 => SignalQuality::Good,
            r if r >= -80 => SignalQuality::Fair,
            _ => SignalQuality::Poor,
        }
    }

    /// Converts to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalQuality::Excellent => "excellent",
            SignalQuality::Good => "good",
            SignalQuality::Fair => "fair",
            SignalQuality::Poor => "poor",
        }
    }

    /// Continuous 0-100 quality score for an RSSI reading.
    ///
    /// -100 dBm and weaker scores 0, -30 dBm and stronger scores 100.
    pub fn score(rssi: f64) -> f64 {
        ((rssi + 100.0) / 70.0 * 100.0).clamp(0.0, 100.0)
    }
}

impl std::fmt::Display for SignalQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reasons an inbound message is refused before it reaches the pipeline.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ObservationRejection {
    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Out of range: {0}")]
    OutOfRange(String),

    #[error("Unknown asset tag: {0}")]
    UnknownAsset(String),
}

impl ObservationRejection {
    /// Short label used for metrics and structured logs.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed",
            Self::MissingField(_) => "missing_field",
            Self::InvalidTimestamp(_) => "invalid_timestamp",
            Self::OutOfRange(_) => "out_of_range",
            Self::UnknownAsset(_) => "unknown_asset",
        }
    }
}

impl From<validator::ValidationErrors> for ObservationRejection {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut messages: Vec<String> = errors
            .field_errors()
            .iter()
            .flat_map(|(field, errors)| {
                errors.iter().map(move |e| {
                    format!(
                        "{}: {}",
                        field,
                        e.message.clone().map(|m| m.to_string()).unwrap_or_default()
                    )
                })
            })
            .collect();
        messages.sort();
        ObservationRejection::OutOfRange(messages.join(", "))
    }
}

/// Wire shape of one inbound stream message.
///
/// Every field is optional here so that a missing required field is reported
/// as [`ObservationRejection::MissingField`] rather than a generic parse error.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ObservationMessage {
    #[validate(length(min = 1, max = 128, message = "Asset tag id must be 1-128 characters"))]
    pub asset_tag_id: Option<String>,

    #[validate(length(min = 1, max = 128, message = "Gateway id must be 1-128 characters"))]
    pub gateway_id: Option<String>,

    #[validate(custom(function = "shared::validation::validate_rssi"))]
    pub rssi: Option<i32>,

    #[validate(custom(function = "shared::validation::validate_battery_level"))]
    pub battery_level: Option<i32>,

    #[validate(custom(function = "shared::validation::validate_temperature"))]
    pub temperature: Option<f64>,

    pub timestamp: Option<String>,

    pub metadata: Option<serde_json::Value>,
}

/// A validated gateway sighting of an asset tag.
#[derive(Debug, Clone, Serialize)]
pub struct Observation {
    pub asset_tag_id: String,
    pub gateway_id: String,
    pub rssi: i32,
    pub battery_level: Option<i32>,
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub observed_at: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
    pub signal_quality: SignalQuality,
}

impl Observation {
    /// Parses and validates a raw stream message.
    pub fn from_message(
        value: &serde_json::Value,
        received_at: DateTime<Utc>,
    ) -> Result<Self, ObservationRejection> {
        if !value.is_object() {
            return Err(ObservationRejection::Malformed(
                "message must be a JSON object".to_string(),
            ));
        }

        let message: ObservationMessage = serde_json::from_value(value.clone())
            .map_err(|e| ObservationRejection::Malformed(e.to_string()))?;

        let asset_tag_id = message
            .asset_tag_id
            .clone()
            .ok_or(ObservationRejection::MissingField("asset_tag_id"))?;
        let gateway_id = message
            .gateway_id
            .clone()
            .ok_or(ObservationRejection::MissingField("gateway_id"))?;
        let rssi = message
            .rssi
            .ok_or(ObservationRejection::MissingField("rssi"))?;
        let timestamp = message
            .timestamp
            .clone()
            .ok_or(ObservationRejection::MissingField("timestamp"))?;

        message.validate()?;

        if let Some(ref metadata) = message.metadata {
            if !metadata.is_object() && !metadata.is_null() {
                return Err(ObservationRejection::Malformed(
                    "metadata must be an object".to_string(),
                ));
            }
        }

        let observed_at = DateTime::parse_from_rfc3339(&timestamp)
            .map_err(|e| ObservationRejection::InvalidTimestamp(format!("{timestamp}: {e}")))?
            .with_timezone(&Utc);

        shared::validation::validate_observed_at(observed_at, received_at).map_err(|e| {
            ObservationRejection::InvalidTimestamp(
                e.message.map(|m| m.to_string()).unwrap_or_default(),
            )
        })?;

        Ok(Self {
            asset_tag_id,
            gateway_id,
            rssi,
            battery_level: message.battery_level,
            temperature: message.temperature,
            metadata: message.metadata.filter(|m| !m.is_null()),
            observed_at,
            received_at,
            signal_quality: SignalQuality::from_rssi(rssi),
        })
    }
}
