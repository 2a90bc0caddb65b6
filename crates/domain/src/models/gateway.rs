//! Gateway position model.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Surveyed position of a fixed gateway. Owned by the site registry and
/// only ever read by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayFix {
    pub gateway_id: String,
    pub organization_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
}

impl GatewayFix {
    /// Returns true if the surveyed coordinates are usable for positioning.
    pub fn has_valid_position(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && shared::validation::validate_latitude(self.latitude).is_ok()
            && shared::validation::validate_longitude(self.longitude).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_position_validity() {
        let mut gateway = GatewayFix {
            gateway_id: "GW-1".to_string(),
            organization_id: Uuid::new_v4(),
            latitude: 52.52,
            longitude: 13.405,
            altitude: None,
        };
        assert!(gateway.has_valid_position());

        gateway.latitude = 91.0;
        assert!(!gateway.has_valid_position());

        gateway.latitude = f64::NAN;
        assert!(!gateway.has_valid_position());
    }
}
