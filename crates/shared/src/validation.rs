//! Common validation utilities.

use chrono::{DateTime, Utc};
use validator::ValidationError;

/// Weakest RSSI accepted at ingestion (dBm).
pub const MIN_RSSI_DBM: i32 = -120;

/// Strongest RSSI accepted at ingestion (dBm).
pub const MAX_RSSI_DBM: i32 = 0;

/// Lowest plausible tag temperature (Celsius).
pub const MIN_TEMPERATURE_C: f64 = -40.0;

/// Highest plausible tag temperature (Celsius).
pub const MAX_TEMPERATURE_C: f64 = 85.0;

/// Maximum age of an observation relative to its receive time, in days.
const MAX_OBSERVATION_AGE_DAYS: i64 = 7;

/// Maximum allowed future timestamp tolerance in seconds (5 minutes for clock skew).
const MAX_FUTURE_TOLERANCE_SECS: i64 = 300;

fn range_error(code: &'static str, message: String) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(message.into());
    err
}

/// Validates that a latitude value is within valid range (-90 to 90).
pub fn validate_latitude(lat: f64) -> Result<(), ValidationError> {
    if (-90.0..=90.0).contains(&lat) {
        Ok(())
    } else {
        Err(range_error(
            "latitude_range",
            "Latitude must be between -90 and 90".to_string(),
        ))
    }
}

/// Validates that a longitude value is within valid range (-180 to 180).
pub fn validate_longitude(lon: f64) -> Result<(), ValidationError> {
    if (-180.0..=180.0).contains(&lon) {
        Ok(())
    } else {
        Err(range_error(
            "longitude_range",
            "Longitude must be between -180 and 180".to_string(),
        ))
    }
}

/// Validates that an RSSI reading is within the accepted receiver range.
pub fn validate_rssi(rssi: i32) -> Result<(), ValidationError> {
    if (MIN_RSSI_DBM..=MAX_RSSI_DBM).contains(&rssi) {
        Ok(())
    } else {
        Err(range_error(
            "rssi_range",
            format!("RSSI must be between {MIN_RSSI_DBM} and {MAX_RSSI_DBM} dBm"),
        ))
    }
}

/// Validates that battery level is within valid range (0 to 100).
pub fn validate_battery_level(level: i32) -> Result<(), ValidationError> {
    if (0..=100).contains(&level) {
        Ok(())
    } else {
        Err(range_error(
            "battery_range",
            "Battery level must be between 0 and 100".to_string(),
        ))
    }
}

/// Validates that a reported tag temperature is physically plausible.
pub fn validate_temperature(celsius: f64) -> Result<(), ValidationError> {
    if (MIN_TEMPERATURE_C..=MAX_TEMPERATURE_C).contains(&celsius) {
        Ok(())
    } else {
        Err(range_error(
            "temperature_range",
            format!("Temperature must be between {MIN_TEMPERATURE_C} and {MAX_TEMPERATURE_C} C"),
        ))
    }
}

/// Validates an observation timestamp against the time it was received.
/// - Must not be more than 5 minutes after `received_at` (allows for clock skew)
/// - Must not be more than 7 days before `received_at`
pub fn validate_observed_at(
    observed_at: DateTime<Utc>,
    received_at: DateTime<Utc>,
) -> Result<(), ValidationError> {
    let future_limit = received_at + chrono::Duration::seconds(MAX_FUTURE_TOLERANCE_SECS);
    if observed_at > future_limit {
        return Err(range_error(
            "timestamp_future",
            "Timestamp cannot be in the future".to_string(),
        ));
    }

    let past_limit = received_at - chrono::Duration::days(MAX_OBSERVATION_AGE_DAYS);
    if observed_at < past_limit {
        return Err(range_error(
            "timestamp_old",
            "Timestamp cannot be older than 7 days".to_string(),
        ));
    }

    Ok(())
}
