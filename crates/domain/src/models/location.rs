//! Estimated location domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::asset::AssetRef;

/// Positioning algorithm that produced an estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LocationAlgorithm {
    Trilateration,
    SingleGateway,
}

impl LocationAlgorithm {
    /// Returns the string representation for database storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            LocationAlgorithm::Trilateration => "TRILATERATION",
            LocationAlgorithm::SingleGateway => "SINGLE_GATEWAY",
        }
    }
}

impl fmt::Display for LocationAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for LocationAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TRILATERATION" => Ok(LocationAlgorithm::Trilateration),
            "SINGLE_GATEWAY" => Ok(LocationAlgorithm::SingleGateway),
            _ => Err(format!(
                "Invalid location algorithm: {}. Must be one of: TRILATERATION, SINGLE_GATEWAY",
                s
            )),
        }
    }
}

/// Output of the trilateration engine for one estimation window.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionFix {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    pub uncertainty_m: f64,
    /// 0-100.
    pub confidence: f64,
    pub algorithm: LocationAlgorithm,
    pub gateway_ids: Vec<String>,
    /// 0-100, mean of per-gateway signal scores.
    pub signal_quality: f64,
    /// Population variance of the RSSI readings (dBm^2).
    pub rssi_variance: f64,
    /// True when the multilateration solve fell back to a weighted centroid.
    pub degenerate: bool,
}

/// Movement relative to the previous estimate. Every field is `None` when
/// there is no usable previous estimate, which is distinct from "stationary".
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Movement {
    pub distance_moved_m: Option<f64>,
    pub bearing_deg: Option<f64>,
    pub speed_mps: Option<f64>,
}

impl Movement {
    /// Movement with nothing known.
    pub fn unknown() -> Self {
        Self::default()
    }

    /// Returns true if movement could be derived.
    pub fn is_known(&self) -> bool {
        self.distance_moved_m.is_some()
    }
}

/// One pipeline output per (asset, estimation window).
///
/// Built once by [`EstimatedLocation::assemble`] after trilateration and
/// movement analysis have both run; downstream stages receive it by value and
/// never modify it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EstimatedLocation {
    pub id: Uuid,
    pub asset_id: Uuid,
    pub asset_tag_id: String,
    pub organization_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    pub uncertainty_m: f64,
    pub confidence: f64,
    pub algorithm: LocationAlgorithm,
    pub estimated_at: DateTime<Utc>,
    pub gateway_count: usize,
    pub gateway_ids: Vec<String>,
    pub signal_quality: f64,
    pub rssi_variance: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed_mps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bearing_deg: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_moved_m: Option<f64>,
}

impl EstimatedLocation {
    /// Assembles the final estimate from its independently computed parts.
    pub fn assemble(
        asset: &AssetRef,
        fix: PositionFix,
        movement: Movement,
        estimated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            asset_id: asset.asset_id,
            asset_tag_id: asset.asset_tag_id.clone(),
            organization_id: asset.organization_id,
            latitude: fix.latitude,
            longitude: fix.longitude,
            altitude: fix.altitude,
            uncertainty_m: fix.uncertainty_m,
            confidence: fix.confidence,
            algorithm: fix.algorithm,
            estimated_at,
            gateway_count: fix.gateway_ids.len(),
            gateway_ids: fix.gateway_ids,
            signal_quality: fix.signal_quality,
            rssi_variance: fix.rssi_variance,
            speed_mps: movement.speed_mps,
            bearing_deg: movement.bearing_deg,
            distance_moved_m: movement.distance_moved_m,
        }
    }

    /// Movement fields of this estimate.
    pub fn movement(&self) -> Movement {
        Movement {
            distance_moved_m: self.distance_moved_m,
            bearing_deg: self.bearing_deg,
            speed_mps: self.speed_mps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_asset() -> AssetRef {
        AssetRef {
            asset_id: Uuid::new_v4(),
            asset_tag_id: "A1".to_string(),
            organization_id: Uuid::new_v4(),
            name: "Forklift 1".to_string(),
        }
    }

    fn test_fix() -> PositionFix {
        PositionFix {
            latitude: 52.52,
            longitude: 13.405,
            altitude: None,
            uncertainty_m: 4.5,
            confidence: 82.0,
            algorithm: LocationAlgorithm::Trilateration,
            gateway_ids: vec!["GW-1".into(), "GW-2".into(), "GW-3".into()],
            signal_quality: 61.0,
            rssi_variance: 12.5,
            degenerate: false,
        }
    }

    #[test]
    fn test_algorithm_round_trip_strings() {
        assert_eq!(LocationAlgorithm::Trilateration.as_str(), "TRILATERATION");
        assert_eq!(
            "SINGLE_GATEWAY".parse::<LocationAlgorithm>().unwrap(),
            LocationAlgorithm::SingleGateway
        );
        assert!("CENTROID".parse::<LocationAlgorithm>().is_err());
    }

    #[test]
    fn test_assemble_copies_all_parts() {
        let asset = test_asset();
        let movement = Movement {
            distance_moved_m: Some(10.0),
            bearing_deg: Some(90.0),
            speed_mps: Some(0.5),
        };
        let at = Utc::now();
        let location = EstimatedLocation::assemble(&asset, test_fix(), movement, at);

        assert_eq!(location.asset_id, asset.asset_id);
        assert_eq!(location.organization_id, asset.organization_id);
        assert_eq!(location.gateway_count, 3);
        assert_eq!(location.estimated_at, at);
        assert_eq!(location.movement(), movement);
    }

    #[test]
    fn test_unknown_movement_is_not_serialized() {
        let location =
            EstimatedLocation::assemble(&test_asset(), test_fix(), Movement::unknown(), Utc::now());
        let json = serde_json::to_string(&location).unwrap();
        assert!(json.contains("\"algorithm\":\"TRILATERATION\""));
        assert!(!json.contains("speedMps"));
        assert!(!location.movement().is_known());
    }
}
