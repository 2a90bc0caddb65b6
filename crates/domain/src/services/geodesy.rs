//! Spherical helpers and a local metric frame.
//!
//! Distances and bearings between coordinates use the haversine formulas from
//! `geo`. Solving and polygon tests happen in a local equirectangular frame
//! centred on the area of interest, which is accurate to well under a meter
//! at building and campus scale.

use std::f64::consts::PI;

use geo::{HaversineBearing, HaversineDistance, Point};

use crate::models::Coordinate;

/// Mean Earth radius in meters (IUGG).
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

const METERS_PER_DEGREE: f64 = EARTH_RADIUS_M * PI / 180.0;

fn point(c: Coordinate) -> Point<f64> {
    Point::new(c.longitude, c.latitude)
}

/// Great-circle distance in meters.
pub fn haversine_m(from: Coordinate, to: Coordinate) -> f64 {
    point(from).haversine_distance(&point(to))
}

/// Initial bearing from `from` to `to`, degrees clockwise from north in
/// `[0, 360)`.
pub fn bearing_deg(from: Coordinate, to: Coordinate) -> f64 {
    normalize_bearing(point(from).haversine_bearing(point(to)))
}

pub fn normalize_bearing(deg: f64) -> f64 {
    let b = deg.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if b >= 360.0 {
        0.0
    } else {
        b
    }
}

/// Wraps longitude into `[-180, 180)`.
pub fn wrap_longitude(longitude: f64) -> f64 {
    (longitude + 180.0).rem_euclid(360.0) - 180.0
}

pub fn clamp_latitude(latitude: f64) -> f64 {
    latitude.clamp(-90.0, 90.0)
}

/// Equirectangular projection around a fixed origin. `x` grows east and `y`
/// grows north, both in meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalFrame {
    origin: Coordinate,
    meters_per_deg_lat: f64,
    meters_per_deg_lng: f64,
}

impl LocalFrame {
    pub fn new(origin: Coordinate) -> Self {
        let cos_lat = origin.latitude.to_radians().cos().abs().max(1e-6);
        Self {
            origin,
            meters_per_deg_lat: METERS_PER_DEGREE,
            meters_per_deg_lng: METERS_PER_DEGREE * cos_lat,
        }
    }

    /// Frame centred on the arithmetic mean of `coordinates`, taking the
    /// antimeridian into account.
    pub fn centred_on(coordinates: &[Coordinate]) -> Option<Self> {
        let first = coordinates.first()?;
        let n = coordinates.len() as f64;
        let latitude = coordinates.iter().map(|c| c.latitude).sum::<f64>() / n;
        // average longitude offsets relative to the first point so a cluster
        // spanning +-180 does not average to 0
        let offset = coordinates
            .iter()
            .map(|c| wrap_longitude(c.longitude - first.longitude))
            .sum::<f64>()
            / n;
        Some(Self::new(Coordinate::new(
            latitude,
            wrap_longitude(first.longitude + offset),
        )))
    }

    pub fn origin(&self) -> Coordinate {
        self.origin
    }

    pub fn to_local(&self, c: Coordinate) -> (f64, f64) {
        let dx = wrap_longitude(c.longitude - self.origin.longitude) * self.meters_per_deg_lng;
        let dy = (c.latitude - self.origin.latitude) * self.meters_per_deg_lat;
        (dx, dy)
    }

    /// Inverse of [`LocalFrame::to_local`]; the result is always a valid
    /// coordinate.
    pub fn to_coordinate(&self, x: f64, y: f64) -> Coordinate {
        Coordinate::new(
            clamp_latitude(self.origin.latitude + y / self.meters_per_deg_lat),
            wrap_longitude(self.origin.longitude + x / self.meters_per_deg_lng),
        )
    }
}
