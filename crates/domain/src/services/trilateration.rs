//! Position estimation from per-gateway range estimates.
//!
//! With at least `min_gateways` distinct gateways the engine solves a
//! weighted least-squares multilateration in a local metric frame: a
//! linearised closed-form solve seeds a Gauss-Newton refinement on the range
//! residuals. Fewer gateways fall back to the strongest single gateway.
//! Singular geometry (collinear or coincident gateways) falls back to a
//! weighted centroid. Every path returns finite, valid coordinates.

use std::collections::BTreeMap;

use geo::{Closest, ClosestPoint, ConvexHull, Intersects, MultiPoint, Point};
use thiserror::Error;
use tracing::debug;

use super::geodesy::LocalFrame;
use super::signal::PathLossModel;
use crate::models::{Coordinate, GatewayFix, LocationAlgorithm, PositionFix, SignalQuality};

/// Relative determinant below which the normal equations are treated as
/// singular.
const SINGULAR_EPSILON: f64 = 1e-9;

/// Ranges below this many meters are weighted as if they were this long.
const MIN_WEIGHT_RANGE_M: f64 = 1.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrilaterationError {
    #[error("No usable gateway sightings")]
    NoSightings,

    #[error("Invalid trilateration configuration: {0}")]
    InvalidConfig(String),
}

/// One gateway's view of the tag within an estimation window.
#[derive(Debug, Clone, PartialEq)]
pub struct Sighting {
    pub gateway: GatewayFix,
    pub distance_m: f64,
    pub rssi: f64,
}

impl Sighting {
    /// Converts a raw reading into a range with the given model.
    pub fn from_rssi(gateway: GatewayFix, rssi: f64, model: &PathLossModel) -> Self {
        Self {
            distance_m: model.distance_m(rssi),
            gateway,
            rssi,
        }
    }

    fn is_usable(&self) -> bool {
        self.gateway.has_valid_position()
            && self.distance_m.is_finite()
            && self.distance_m >= 0.0
            && self.rssi.is_finite()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrilaterationConfig {
    /// Distinct gateways needed for multilateration.
    pub min_gateways: usize,
    /// Upper bound for single-gateway confidence.
    pub single_gateway_max_confidence: f64,
    /// Lower bound for multilateration confidence.
    pub trilateration_min_confidence: f64,
    pub max_iterations: usize,
    /// Gauss-Newton stops once a step is shorter than this.
    pub convergence_m: f64,
    pub min_uncertainty_m: f64,
    /// Projects solutions that land outside the gateways' convex hull back
    /// onto it.
    pub constrain_to_hull: bool,
}

impl Default for TrilaterationConfig {
    fn default() -> Self {
        Self {
            min_gateways: 3,
            single_gateway_max_confidence: 30.0,
            trilateration_min_confidence: 40.0,
            max_iterations: 25,
            convergence_m: 1e-3,
            min_uncertainty_m: 1.0,
            constrain_to_hull: true,
        }
    }
}

impl TrilaterationConfig {
    /// Keeps the single-gateway and multilateration confidence bands disjoint.
    pub fn validate(&self) -> Result<(), TrilaterationError> {
        let invalid = |msg: String| Err(TrilaterationError::InvalidConfig(msg));

        if self.min_gateways < 3 {
            return invalid(format!(
                "min_gateways must be at least 3, got {}",
                self.min_gateways
            ));
        }
        if !(self.single_gateway_max_confidence > 0.0
            && self.single_gateway_max_confidence <= 100.0)
        {
            return invalid("single_gateway_max_confidence must be in (0, 100]".to_string());
        }
        if !(self.trilateration_min_confidence > 0.0 && self.trilateration_min_confidence <= 100.0)
        {
            return invalid("trilateration_min_confidence must be in (0, 100]".to_string());
        }
        if self.single_gateway_max_confidence >= self.trilateration_min_confidence {
            return invalid(format!(
                "single_gateway_max_confidence ({}) must be below trilateration_min_confidence ({})",
                self.single_gateway_max_confidence, self.trilateration_min_confidence
            ));
        }
        if self.max_iterations == 0 {
            return invalid("max_iterations must be at least 1".to_string());
        }
        if !(self.convergence_m.is_finite() && self.convergence_m > 0.0) {
            return invalid("convergence_m must be positive".to_string());
        }
        if !(self.min_uncertainty_m.is_finite() && self.min_uncertainty_m > 0.0) {
            return invalid("min_uncertainty_m must be positive".to_string());
        }
        Ok(())
    }
}

/// Sightings of one gateway merged into a single range.
#[derive(Debug, Clone)]
struct Anchor {
    gateway: GatewayFix,
    distance_m: f64,
    rssi: f64,
    x: f64,
    y: f64,
}

impl Anchor {
    fn weight(&self) -> f64 {
        1.0 / self.distance_m.max(MIN_WEIGHT_RANGE_M).powi(2)
    }
}

#[derive(Debug, Clone)]
pub struct TrilaterationEngine {
    config: TrilaterationConfig,
}

impl TrilaterationEngine {
    pub fn new(config: TrilaterationConfig) -> Result<Self, TrilaterationError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &TrilaterationConfig {
        &self.config
    }

    /// Estimates the tag position from the window's sightings.
    pub fn estimate(&self, sightings: &[Sighting]) -> Result<PositionFix, TrilaterationError> {
        let usable: Vec<&Sighting> = sightings.iter().filter(|s| s.is_usable()).collect();
        if usable.is_empty() {
            return Err(TrilaterationError::NoSightings);
        }

        let rssi: Vec<f64> = usable.iter().map(|s| s.rssi).collect();
        let signal_quality = rssi.iter().map(|r| SignalQuality::score(*r)).sum::<f64>()
            / rssi.len() as f64;
        let rssi_variance = population_variance(&rssi);

        let merged = merge_by_gateway(&usable);
        let coordinates: Vec<Coordinate> = merged
            .iter()
            .map(|(g, _, _)| Coordinate::new(g.latitude, g.longitude))
            .collect();
        let frame = LocalFrame::centred_on(&coordinates).ok_or(TrilaterationError::NoSightings)?;

        let anchors: Vec<Anchor> = merged
            .into_iter()
            .map(|(gateway, distance_m, rssi)| {
                let (x, y) = frame.to_local(Coordinate::new(gateway.latitude, gateway.longitude));
                Anchor {
                    gateway,
                    distance_m,
                    rssi,
                    x,
                    y,
                }
            })
            .collect();

        let solved = if anchors.len() < self.config.min_gateways {
            self.single_gateway(&anchors)
        } else {
            self.multilaterate(&anchors)
        };

        let coordinate = frame.to_coordinate(solved.x, solved.y);
        let mut gateway_ids: Vec<String> =
            anchors.iter().map(|a| a.gateway.gateway_id.clone()).collect();
        gateway_ids.sort();

        Ok(PositionFix {
            latitude: coordinate.latitude,
            longitude: coordinate.longitude,
            altitude: solved.altitude,
            uncertainty_m: solved.uncertainty_m,
            confidence: solved.confidence,
            algorithm: solved.algorithm,
            gateway_ids,
            signal_quality,
            rssi_variance,
            degenerate: solved.degenerate,
        })
    }

    fn single_gateway(&self, anchors: &[Anchor]) -> Solved {
        // strongest signal wins; ties go to the shorter range
        let best = anchors
            .iter()
            .max_by(|a, b| {
                a.rssi
                    .total_cmp(&b.rssi)
                    .then_with(|| b.distance_m.total_cmp(&a.distance_m))
            })
            .unwrap_or(&anchors[0]);

        let confidence =
            self.config.single_gateway_max_confidence / (1.0 + best.distance_m / 10.0);

        Solved {
            x: best.x,
            y: best.y,
            altitude: best.gateway.altitude,
            uncertainty_m: best.distance_m.max(self.config.min_uncertainty_m),
            confidence: confidence.clamp(0.0, self.config.single_gateway_max_confidence),
            algorithm: LocationAlgorithm::SingleGateway,
            degenerate: false,
        }
    }

    fn multilaterate(&self, anchors: &[Anchor]) -> Solved {
        let Some((x0, y0)) = linear_solve(anchors) else {
            debug!(gateways = anchors.len(), "Singular gateway geometry, using weighted centroid");
            return self.centroid(anchors);
        };

        let (mut x, mut y) = (x0, y0);
        for _ in 0..self.config.max_iterations {
            let Some((dx, dy)) = gauss_newton_step(anchors, x, y) else {
                break;
            };
            x += dx;
            y += dy;
            if (dx * dx + dy * dy).sqrt() < self.config.convergence_m {
                break;
            }
        }

        if !(x.is_finite() && y.is_finite()) {
            debug!(gateways = anchors.len(), "Solver diverged, using weighted centroid");
            return self.centroid(anchors);
        }

        if self.config.constrain_to_hull {
            (x, y) = clamp_to_hull(anchors, x, y);
        }

        let rms = weighted_rms_residual(anchors, x, y);
        let mean_range =
            anchors.iter().map(|a| a.distance_m).sum::<f64>() / anchors.len() as f64;

        let floor = self.config.trilateration_min_confidence;
        let fit = 1.0 / (1.0 + rms / mean_range.max(MIN_WEIGHT_RANGE_M));
        let redundancy =
            ((anchors.len() - self.config.min_gateways) as f64 / 3.0).min(1.0);
        let confidence = floor + (100.0 - floor) * (0.85 * fit + 0.15 * redundancy);

        Solved {
            x,
            y,
            altitude: mean_altitude(anchors),
            uncertainty_m: rms.max(self.config.min_uncertainty_m),
            confidence: confidence.clamp(floor, 100.0),
            algorithm: LocationAlgorithm::Trilateration,
            degenerate: false,
        }
    }

    fn centroid(&self, anchors: &[Anchor]) -> Solved {
        let total: f64 = anchors.iter().map(Anchor::weight).sum();
        let x = anchors.iter().map(|a| a.weight() * a.x).sum::<f64>() / total;
        let y = anchors.iter().map(|a| a.weight() * a.y).sum::<f64>() / total;
        let spread = anchors.iter().map(|a| a.weight() * a.distance_m).sum::<f64>() / total;

        Solved {
            x,
            y,
            altitude: mean_altitude(anchors),
            uncertainty_m: spread.max(self.config.min_uncertainty_m),
            confidence: self.config.trilateration_min_confidence,
            algorithm: LocationAlgorithm::Trilateration,
            degenerate: true,
        }
    }
}

struct Solved {
    x: f64,
    y: f64,
    altitude: Option<f64>,
    uncertainty_m: f64,
    confidence: f64,
    algorithm: LocationAlgorithm,
    degenerate: bool,
}

/// Groups sightings by gateway id, averaging range and signal.
fn merge_by_gateway(sightings: &[&Sighting]) -> Vec<(GatewayFix, f64, f64)> {
    let mut grouped: BTreeMap<&str, (&GatewayFix, f64, f64, usize)> = BTreeMap::new();
    for s in sightings {
        let entry = grouped
            .entry(s.gateway.gateway_id.as_str())
            .or_insert((&s.gateway, 0.0, 0.0, 0));
        entry.1 += s.distance_m;
        entry.2 += s.rssi;
        entry.3 += 1;
    }

    grouped
        .into_values()
        .map(|(gateway, distance, rssi, n)| (gateway.clone(), distance / n as f64, rssi / n as f64))
        .collect()
}

/// Closed-form weighted least squares on the range equations linearised
/// against the most trusted anchor. Returns `None` for singular geometry.
fn linear_solve(anchors: &[Anchor]) -> Option<(f64, f64)> {
    let reference = anchors
        .iter()
        .max_by(|a, b| a.weight().total_cmp(&b.weight()))?;

    let (mut a11, mut a12, mut a22, mut b1, mut b2) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for anchor in anchors {
        if std::ptr::eq(anchor, reference) {
            continue;
        }
        let w = anchor.weight();
        let ax = 2.0 * (anchor.x - reference.x);
        let ay = 2.0 * (anchor.y - reference.y);
        let rhs = reference.distance_m.powi(2) - anchor.distance_m.powi(2)
            + anchor.x.powi(2)
            - reference.x.powi(2)
            + anchor.y.powi(2)
            - reference.y.powi(2);

        a11 += w * ax * ax;
        a12 += w * ax * ay;
        a22 += w * ay * ay;
        b1 += w * ax * rhs;
        b2 += w * ay * rhs;
    }

    solve_2x2(a11, a12, a22, b1, b2)
}

/// One Gauss-Newton step on the weighted range residuals.
fn gauss_newton_step(anchors: &[Anchor], x: f64, y: f64) -> Option<(f64, f64)> {
    let (mut a11, mut a12, mut a22, mut b1, mut b2) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for anchor in anchors {
        let dx = x - anchor.x;
        let dy = y - anchor.y;
        let d = (dx * dx + dy * dy).sqrt();
        if d < 1e-9 {
            // gradient undefined on the anchor itself
            continue;
        }
        let w = anchor.weight();
        let (jx, jy) = (dx / d, dy / d);
        let residual = d - anchor.distance_m;

        a11 += w * jx * jx;
        a12 += w * jx * jy;
        a22 += w * jy * jy;
        b1 -= w * jx * residual;
        b2 -= w * jy * residual;
    }

    solve_2x2(a11, a12, a22, b1, b2)
}

/// Solves the symmetric system `[a11 a12; a12 a22] p = [b1; b2]`.
fn solve_2x2(a11: f64, a12: f64, a22: f64, b1: f64, b2: f64) -> Option<(f64, f64)> {
    let det = a11 * a22 - a12 * a12;
    let scale = (a11 + a22).powi(2);
    if !(det.is_finite() && scale > 0.0) || det.abs() <= SINGULAR_EPSILON * scale {
        return None;
    }
    let x = (b1 * a22 - b2 * a12) / det;
    let y = (a11 * b2 - a12 * b1) / det;
    (x.is_finite() && y.is_finite()).then_some((x, y))
}

fn clamp_to_hull(anchors: &[Anchor], x: f64, y: f64) -> (f64, f64) {
    let points: MultiPoint<f64> = anchors.iter().map(|a| Point::new(a.x, a.y)).collect();
    let hull = points.convex_hull();
    let p = Point::new(x, y);
    if hull.intersects(&p) {
        return (x, y);
    }
    match hull.closest_point(&p) {
        Closest::Intersection(q) | Closest::SinglePoint(q) => (q.x(), q.y()),
        Closest::Indeterminate => (x, y),
    }
}

fn weighted_rms_residual(anchors: &[Anchor], x: f64, y: f64) -> f64 {
    let (sum, total) = anchors.iter().fold((0.0, 0.0), |(sum, total), a| {
        let d = ((x - a.x).powi(2) + (y - a.y).powi(2)).sqrt();
        let w = a.weight();
        (sum + w * (d - a.distance_m).powi(2), total + w)
    });
    (sum / total).sqrt()
}

fn mean_altitude(anchors: &[Anchor]) -> Option<f64> {
    let altitudes: Option<Vec<f64>> = anchors.iter().map(|a| a.gateway.altitude).collect();
    let altitudes = altitudes?;
    let mean = altitudes.iter().sum::<f64>() / altitudes.len() as f64;
    mean.is_finite().then_some(mean)
}

fn population_variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::geodesy::haversine_m;
    use uuid::Uuid;

    const ORIGIN: Coordinate = Coordinate {
        latitude: 52.52,
        longitude: 13.405,
    };

    fn engine() -> TrilaterationEngine {
        TrilaterationEngine::new(TrilaterationConfig::default()).unwrap()
    }

    /// Gateway `east_m`/`north_m` meters from the test origin.
    fn gateway(id: &str, east_m: f64, north_m: f64) -> GatewayFix {
        let c = LocalFrame::new(ORIGIN).to_coordinate(east_m, north_m);
        GatewayFix {
            gateway_id: id.to_string(),
            organization_id: Uuid::nil(),
            latitude: c.latitude,
            longitude: c.longitude,
            altitude: None,
        }
    }

    fn sighting(gateway: GatewayFix, distance_m: f64, rssi: f64) -> Sighting {
        Sighting {
            gateway,
            distance_m,
            rssi,
        }
    }

    /// Sightings with exact ranges to a tag at (`east_m`, `north_m`).
    fn exact_sightings(gateways: &[GatewayFix], east_m: f64, north_m: f64) -> Vec<Sighting> {
        let tag = LocalFrame::new(ORIGIN).to_coordinate(east_m, north_m);
        gateways
            .iter()
            .map(|g| {
                let d = haversine_m(tag, Coordinate::new(g.latitude, g.longitude));
                sighting(g.clone(), d, -70.0)
            })
            .collect()
    }

    fn inside_triangle(p: (f64, f64), a: (f64, f64), b: (f64, f64), c: (f64, f64)) -> bool {
        let cross = |o: (f64, f64), u: (f64, f64), v: (f64, f64)| {
            (u.0 - o.0) * (v.1 - o.1) - (u.1 - o.1) * (v.0 - o.0)
        };
        let eps = 1e-6;
        let d1 = cross(a, b, p);
        let d2 = cross(b, c, p);
        let d3 = cross(c, a, p);
        let has_neg = d1 < -eps || d2 < -eps || d3 < -eps;
        let has_pos = d1 > eps || d2 > eps || d3 > eps;
        !(has_neg && has_pos)
    }

    #[test]
    fn test_invalid_confidence_bands_rejected() {
        let config = TrilaterationConfig {
            single_gateway_max_confidence: 50.0,
            trilateration_min_confidence: 40.0,
            ..Default::default()
        };
        assert!(matches!(
            TrilaterationEngine::new(config),
            Err(TrilaterationError::InvalidConfig(_))
        ));

        let config = TrilaterationConfig {
            min_gateways: 2,
            ..Default::default()
        };
        assert!(TrilaterationEngine::new(config).is_err());
    }

    #[test]
    fn test_no_sightings() {
        assert_eq!(engine().estimate(&[]), Err(TrilaterationError::NoSightings));

        let mut bad = gateway("GW-1", 0.0, 0.0);
        bad.latitude = 95.0;
        assert_eq!(
            engine().estimate(&[sighting(bad, 3.0, -60.0)]),
            Err(TrilaterationError::NoSightings)
        );
    }

    #[test]
    fn test_exact_ranges_recover_position() {
        let gateways = [
            gateway("GW-1", 0.0, 0.0),
            gateway("GW-2", 30.0, 0.0),
            gateway("GW-3", 0.0, 30.0),
            gateway("GW-4", 30.0, 30.0),
        ];
        let fix = engine()
            .estimate(&exact_sightings(&gateways, 12.0, 7.0))
            .unwrap();

        let expected = LocalFrame::new(ORIGIN).to_coordinate(12.0, 7.0);
        let error = haversine_m(expected, Coordinate::new(fix.latitude, fix.longitude));
        assert!(error < 0.1, "position error {error} m");
        assert_eq!(fix.algorithm, LocationAlgorithm::Trilateration);
        assert!(!fix.degenerate);
        assert!(fix.confidence > 90.0);
        assert_eq!(fix.uncertainty_m, 1.0);
    }

    #[test]
    fn test_three_gateways_estimate_stays_in_hull() {
        let a = gateway("GW-1", 0.0, 0.0);
        let b = gateway("GW-2", 20.0, 0.0);
        let c = gateway("GW-3", 10.0, 17.0);
        let model = PathLossModel::default();
        let sightings = vec![
            Sighting::from_rssi(a.clone(), -55.0, &model),
            Sighting::from_rssi(b.clone(), -70.0, &model),
            Sighting::from_rssi(c.clone(), -85.0, &model),
        ];

        let fix = engine().estimate(&sightings).unwrap();

        assert_eq!(fix.algorithm, LocationAlgorithm::Trilateration);
        assert!(fix.confidence >= 40.0);
        assert_eq!(fix.gateway_ids, vec!["GW-1", "GW-2", "GW-3"]);

        let frame = LocalFrame::new(ORIGIN);
        let p = frame.to_local(Coordinate::new(fix.latitude, fix.longitude));
        let local = |g: &GatewayFix| frame.to_local(Coordinate::new(g.latitude, g.longitude));
        assert!(
            inside_triangle(p, local(&a), local(&b), local(&c)),
            "estimate {p:?} outside gateway hull"
        );
        // strongest reading pulls the estimate toward GW-1
        let to_a = haversine_m(
            Coordinate::new(fix.latitude, fix.longitude),
            Coordinate::new(a.latitude, a.longitude),
        );
        let to_c = haversine_m(
            Coordinate::new(fix.latitude, fix.longitude),
            Coordinate::new(c.latitude, c.longitude),
        );
        assert!(to_a < to_c);
    }

    #[test]
    fn test_single_gateway_below_trilateration_band() {
        let g = gateway("GW-1", 0.0, 0.0);
        let fix = engine()
            .estimate(&[sighting(g.clone(), 2.0, -62.0)])
            .unwrap();

        assert_eq!(fix.algorithm, LocationAlgorithm::SingleGateway);
        assert!(fix.confidence > 0.0 && fix.confidence <= 30.0);
        assert_eq!(fix.uncertainty_m, 2.0);
        assert!((fix.latitude - g.latitude).abs() < 1e-9);
        assert!((fix.longitude - g.longitude).abs() < 1e-9);
    }

    #[test]
    fn test_two_gateways_picks_strongest() {
        let fix = engine()
            .estimate(&[
                sighting(gateway("GW-1", 0.0, 0.0), 8.0, -75.0),
                sighting(gateway("GW-2", 25.0, 0.0), 1.5, -58.0),
            ])
            .unwrap();

        let strongest = gateway("GW-2", 25.0, 0.0);
        assert_eq!(fix.algorithm, LocationAlgorithm::SingleGateway);
        assert!((fix.longitude - strongest.longitude).abs() < 1e-9);
        assert_eq!(fix.gateway_ids, vec!["GW-1", "GW-2"]);
    }

    #[test]
    fn test_confidence_bands_never_overlap() {
        let engine = engine();
        let single = engine
            .estimate(&[sighting(gateway("GW-1", 0.0, 0.0), 0.0, -30.0)])
            .unwrap();

        // badly inconsistent ranges still stay at or above the floor
        let multi = engine
            .estimate(&[
                sighting(gateway("GW-1", 0.0, 0.0), 200.0, -95.0),
                sighting(gateway("GW-2", 10.0, 0.0), 0.5, -50.0),
                sighting(gateway("GW-3", 0.0, 10.0), 90.0, -90.0),
            ])
            .unwrap();

        assert!(single.confidence <= 30.0);
        assert!(multi.confidence >= 40.0);
        assert!(multi.confidence <= 100.0);
    }

    #[test]
    fn test_collinear_gateways_fall_back_to_centroid() {
        let fix = engine()
            .estimate(&[
                sighting(gateway("GW-1", 0.0, 0.0), 5.0, -70.0),
                sighting(gateway("GW-2", 10.0, 0.0), 5.0, -70.0),
                sighting(gateway("GW-3", 20.0, 0.0), 15.0, -80.0),
            ])
            .unwrap();

        assert!(fix.degenerate);
        assert_eq!(fix.algorithm, LocationAlgorithm::Trilateration);
        assert_eq!(fix.confidence, 40.0);
        assert!(fix.latitude.is_finite() && fix.longitude.is_finite());
    }

    #[test]
    fn test_coincident_gateways_do_not_produce_nan() {
        let fix = engine()
            .estimate(&[
                sighting(gateway("GW-1", 5.0, 5.0), 3.0, -65.0),
                sighting(gateway("GW-2", 5.0, 5.0), 4.0, -68.0),
                sighting(gateway("GW-3", 5.0, 5.0), 2.0, -61.0),
            ])
            .unwrap();

        assert!(fix.latitude.is_finite());
        assert!(fix.longitude.is_finite());
        assert!(fix.uncertainty_m.is_finite());
        assert!(fix.degenerate);
    }

    #[test]
    fn test_repeated_gateway_sightings_are_merged() {
        let g1 = gateway("GW-1", 0.0, 0.0);
        let fix = engine()
            .estimate(&[
                sighting(g1.clone(), 2.0, -60.0),
                sighting(g1.clone(), 4.0, -66.0),
                sighting(g1, 3.0, -63.0),
            ])
            .unwrap();

        assert_eq!(fix.gateway_ids, vec!["GW-1"]);
        assert_eq!(fix.algorithm, LocationAlgorithm::SingleGateway);
        assert!((fix.uncertainty_m - 3.0).abs() < 1e-9);
        assert!((fix.rssi_variance - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_signal_summary() {
        let fix = engine()
            .estimate(&[sighting(gateway("GW-1", 0.0, 0.0), 1.0, -65.0)])
            .unwrap();
        assert!((fix.signal_quality - 50.0).abs() < 1e-9);
        assert_eq!(fix.rssi_variance, 0.0);
    }

    #[test]
    fn test_near_pole_output_is_valid() {
        let g = |id: &str, lat: f64, lng: f64| GatewayFix {
            gateway_id: id.to_string(),
            organization_id: Uuid::nil(),
            latitude: lat,
            longitude: lng,
            altitude: Some(2.0),
        };
        let fix = engine()
            .estimate(&[
                sighting(g("GW-1", 89.9999, 0.0), 30.0, -80.0),
                sighting(g("GW-2", 89.9999, 120.0), 30.0, -80.0),
                sighting(g("GW-3", 89.9999, -120.0), 30.0, -80.0),
            ])
            .unwrap();

        assert!((-90.0..=90.0).contains(&fix.latitude));
        assert!((-180.0..180.0).contains(&fix.longitude));
        assert_eq!(fix.altitude, Some(2.0));
    }
}
