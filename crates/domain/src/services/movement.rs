//! Movement relative to an asset's previous estimate.

use std::time::Duration;

use chrono::{DateTime, Utc};

use super::geodesy::{bearing_deg, haversine_m};
use crate::models::{Coordinate, EstimatedLocation, Movement, PositionFix};

pub const DEFAULT_STALENESS: Duration = Duration::from_secs(600);

/// Derives distance, bearing and speed from consecutive estimates.
///
/// A previous estimate older than the staleness window is ignored, so an
/// asset that reappears after a long gap reports unknown movement rather
/// than a misleadingly low average speed.
#[derive(Debug, Clone)]
pub struct MovementAnalyzer {
    staleness: Duration,
}

impl Default for MovementAnalyzer {
    fn default() -> Self {
        Self::new(DEFAULT_STALENESS)
    }
}

impl MovementAnalyzer {
    pub fn new(staleness: Duration) -> Self {
        Self { staleness }
    }

    pub fn analyze(
        &self,
        previous: Option<&EstimatedLocation>,
        fix: &PositionFix,
        estimated_at: DateTime<Utc>,
    ) -> Movement {
        let Some(previous) = previous else {
            return Movement::unknown();
        };

        let elapsed_secs =
            (estimated_at - previous.estimated_at).num_milliseconds() as f64 / 1000.0;
        if elapsed_secs > self.staleness.as_secs_f64() {
            return Movement::unknown();
        }

        let from = Coordinate::new(previous.latitude, previous.longitude);
        let to = Coordinate::new(fix.latitude, fix.longitude);
        let distance = haversine_m(from, to);
        if !distance.is_finite() {
            return Movement::unknown();
        }

        let speed = if elapsed_secs > 0.0 {
            distance / elapsed_secs
        } else {
            0.0
        };

        Movement {
            distance_moved_m: Some(distance),
            bearing_deg: Some(bearing_deg(from, to)),
            speed_mps: Some(speed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AssetRef, LocationAlgorithm};
    use crate::services::geodesy::LocalFrame;
    use chrono::Duration as ChronoDuration;
    use uuid::Uuid;

    const ORIGIN: Coordinate = Coordinate {
        latitude: 52.52,
        longitude: 13.405,
    };

    fn fix_at(east_m: f64, north_m: f64) -> PositionFix {
        let c = LocalFrame::new(ORIGIN).to_coordinate(east_m, north_m);
        PositionFix {
            latitude: c.latitude,
            longitude: c.longitude,
            altitude: None,
            uncertainty_m: 2.0,
            confidence: 80.0,
            algorithm: LocationAlgorithm::Trilateration,
            gateway_ids: vec!["GW-1".into(), "GW-2".into(), "GW-3".into()],
            signal_quality: 60.0,
            rssi_variance: 4.0,
            degenerate: false,
        }
    }

    fn previous_at(east_m: f64, north_m: f64, at: DateTime<Utc>) -> EstimatedLocation {
        let asset = AssetRef {
            asset_id: Uuid::new_v4(),
            asset_tag_id: "A1".to_string(),
            organization_id: Uuid::new_v4(),
            name: "Pallet jack".to_string(),
        };
        EstimatedLocation::assemble(&asset, fix_at(east_m, north_m), Movement::unknown(), at)
    }

    #[test]
    fn test_no_previous_means_unknown() {
        let movement = MovementAnalyzer::default().analyze(None, &fix_at(0.0, 0.0), Utc::now());
        assert_eq!(movement, Movement::unknown());
        assert!(!movement.is_known());
    }

    #[test]
    fn test_speed_and_bearing_toward_east() {
        let t0 = Utc::now();
        let previous = previous_at(0.0, 0.0, t0);
        let movement = MovementAnalyzer::default().analyze(
            Some(&previous),
            &fix_at(10.0, 0.0),
            t0 + ChronoDuration::seconds(5),
        );

        let distance = movement.distance_moved_m.unwrap();
        assert!((distance - 10.0).abs() < 0.05, "distance {distance}");
        assert!((movement.speed_mps.unwrap() - 2.0).abs() < 0.01);
        assert!((movement.bearing_deg.unwrap() - 90.0).abs() < 0.01);
    }

    #[test]
    fn test_bearing_south_west_is_normalized() {
        let t0 = Utc::now();
        let previous = previous_at(0.0, 0.0, t0);
        let movement = MovementAnalyzer::default().analyze(
            Some(&previous),
            &fix_at(-10.0, -10.0),
            t0 + ChronoDuration::seconds(10),
        );
        let bearing = movement.bearing_deg.unwrap();
        assert!((bearing - 225.0).abs() < 0.5, "bearing {bearing}");
    }

    #[test]
    fn test_zero_elapsed_time_reports_zero_speed() {
        let t0 = Utc::now();
        let previous = previous_at(0.0, 0.0, t0);
        let movement =
            MovementAnalyzer::default().analyze(Some(&previous), &fix_at(3.0, 4.0), t0);

        assert_eq!(movement.speed_mps, Some(0.0));
        assert!((movement.distance_moved_m.unwrap() - 5.0).abs() < 0.05);
    }

    #[test]
    fn test_out_of_order_previous_reports_zero_speed() {
        let t0 = Utc::now();
        let previous = previous_at(0.0, 0.0, t0);
        let movement = MovementAnalyzer::default().analyze(
            Some(&previous),
            &fix_at(3.0, 4.0),
            t0 - ChronoDuration::seconds(2),
        );
        assert_eq!(movement.speed_mps, Some(0.0));
    }

    #[test]
    fn test_stale_previous_is_ignored() {
        let t0 = Utc::now();
        let previous = previous_at(0.0, 0.0, t0);
        let analyzer = MovementAnalyzer::new(Duration::from_secs(60));

        let stale = analyzer.analyze(
            Some(&previous),
            &fix_at(50.0, 0.0),
            t0 + ChronoDuration::seconds(61),
        );
        assert_eq!(stale, Movement::unknown());

        let fresh = analyzer.analyze(
            Some(&previous),
            &fix_at(50.0, 0.0),
            t0 + ChronoDuration::seconds(60),
        );
        assert!(fresh.is_known());
    }

    #[test]
    fn test_stationary_asset_is_known_and_still() {
        let t0 = Utc::now();
        let previous = previous_at(5.0, 5.0, t0);
        let movement = MovementAnalyzer::default().analyze(
            Some(&previous),
            &fix_at(5.0, 5.0),
            t0 + ChronoDuration::seconds(30),
        );
        assert!(movement.is_known());
        assert!(movement.distance_moved_m.unwrap() < 1e-6);
        assert!(movement.speed_mps.unwrap() < 1e-6);
    }
}
