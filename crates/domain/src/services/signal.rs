//! Log-distance path-loss model converting RSSI to range.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_REFERENCE_POWER_DBM: f64 = -59.0;
pub const DEFAULT_REFERENCE_DISTANCE_M: f64 = 1.0;
pub const DEFAULT_PATH_LOSS_EXPONENT: f64 = 2.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SignalModelError {
    #[error("Path loss exponent must be positive, got {0}")]
    InvalidExponent(f64),

    #[error("Reference distance must be positive, got {0}")]
    InvalidReferenceDistance(f64),

    #[error("Reference power must be a finite dBm value, got {0}")]
    InvalidReferencePower(f64),
}

/// RSSI to distance conversion:
/// `d = d0 * 10^((P0 - rssi) / (10 * n))`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PathLossModel {
    pub reference_power_dbm: f64,
    pub reference_distance_m: f64,
    pub path_loss_exponent: f64,
}

impl Default for PathLossModel {
    fn default() -> Self {
        Self {
            reference_power_dbm: DEFAULT_REFERENCE_POWER_DBM,
            reference_distance_m: DEFAULT_REFERENCE_DISTANCE_M,
            path_loss_exponent: DEFAULT_PATH_LOSS_EXPONENT,
        }
    }
}

impl PathLossModel {
    pub fn new(
        reference_power_dbm: f64,
        reference_distance_m: f64,
        path_loss_exponent: f64,
    ) -> Result<Self, SignalModelError> {
        let model = Self {
            reference_power_dbm,
            reference_distance_m,
            path_loss_exponent,
        };
        model.validate()?;
        Ok(model)
    }

    pub fn validate(&self) -> Result<(), SignalModelError> {
        if !(self.path_loss_exponent.is_finite() && self.path_loss_exponent > 0.0) {
            return Err(SignalModelError::InvalidExponent(self.path_loss_exponent));
        }
        if !(self.reference_distance_m.is_finite() && self.reference_distance_m > 0.0) {
            return Err(SignalModelError::InvalidReferenceDistance(
                self.reference_distance_m,
            ));
        }
        if !self.reference_power_dbm.is_finite() {
            return Err(SignalModelError::InvalidReferencePower(
                self.reference_power_dbm,
            ));
        }
        Ok(())
    }

    /// Estimated distance in meters for a reading in dBm.
    ///
    /// Strictly decreasing in `rssi` for a valid model. Readings stronger than
    /// the reference power yield distances below the reference distance.
    pub fn distance_m(&self, rssi: f64) -> f64 {
        distance(
            rssi,
            self.reference_power_dbm,
            self.reference_distance_m,
            self.path_loss_exponent,
        )
    }
}

/// Free-standing form of [`PathLossModel::distance_m`].
pub fn distance(
    rssi: f64,
    reference_power_dbm: f64,
    reference_distance_m: f64,
    path_loss_exponent: f64,
) -> f64 {
    let exponent = (reference_power_dbm - rssi) / (10.0 * path_loss_exponent);
    reference_distance_m * 10f64.powf(exponent)
}
