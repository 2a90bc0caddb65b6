//! Geofence domain model.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::geofence_event::GeofenceTransitionType;

/// A latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// Boundary shape of a geofence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum GeofenceShape {
    Circular {
        center: Coordinate,
        radius_m: f64,
    },
    /// Vertex ring; closing the ring is implicit.
    Polygon { vertices: Vec<Coordinate> },
}

impl GeofenceShape {
    /// Shape type name as stored in the database.
    pub fn type_str(&self) -> &'static str {
        match self {
            GeofenceShape::Circular { .. } => "circular",
            GeofenceShape::Polygon { .. } => "polygon",
        }
    }

    /// Checks the structural invariants of the shape.
    pub fn validate(&self) -> Result<(), String> {
        let check = |c: &Coordinate| {
            shared::validation::validate_latitude(c.latitude)
                .and_then(|_| shared::validation::validate_longitude(c.longitude))
                .map_err(|e| e.message.map(|m| m.to_string()).unwrap_or_default())
        };

        match self {
            GeofenceShape::Circular { center, radius_m } => {
                check(center)?;
                if !(radius_m.is_finite() && *radius_m > 0.0) {
                    return Err("Radius must be a positive number of meters".to_string());
                }
                Ok(())
            }
            GeofenceShape::Polygon { vertices } => {
                if vertices.len() < 3 {
                    return Err("Polygon must have at least 3 vertices".to_string());
                }
                vertices.iter().try_for_each(check)
            }
        }
    }
}

/// Whether presence inside the boundary is expected or forbidden.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeofenceClassification {
    Authorized,
    Restricted,
}

impl GeofenceClassification {
    /// Converts to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            GeofenceClassification::Authorized => "authorized",
            GeofenceClassification::Restricted => "restricted",
        }
    }

    /// Parses from database string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "authorized" => Some(GeofenceClassification::Authorized),
            "restricted" => Some(GeofenceClassification::Restricted),
            _ => None,
        }
    }
}

/// Organization-scoped boundary. Read-only to the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geofence {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub shape: GeofenceShape,
    pub classification: GeofenceClassification,
    pub alert_on_entry: bool,
    pub alert_on_exit: bool,
    /// Extra buffer around the boundary counted as inside.
    pub tolerance_m: Option<f64>,
    pub active: bool,
}

impl Geofence {
    /// Returns true if this geofence wants an event for the given transition.
    pub fn alerts_on(&self, transition: GeofenceTransitionType) -> bool {
        match transition {
            GeofenceTransitionType::Entry => self.alert_on_entry,
            GeofenceTransitionType::Exit => self.alert_on_exit,
        }
    }

    /// Tolerance buffer in meters, never negative.
    pub fn tolerance(&self) -> f64 {
        self.tolerance_m.unwrap_or(0.0).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_serialization_is_tagged() {
        let shape = GeofenceShape::Circular {
            center: Coordinate::new(52.52, 13.405),
            radius_m: 50.0,
        };
        let json = serde_json::to_value(&shape).unwrap();
        assert_eq!(json["type"], "circular");
        assert_eq!(json["radius_m"], 50.0);

        let parsed: GeofenceShape = serde_json::from_str(
            r#"{"type":"polygon","vertices":[
                {"latitude":0.0,"longitude":0.0},
                {"latitude":0.0,"longitude":1.0},
                {"latitude":1.0,"longitude":1.0}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.type_str(), "polygon");
    }

    #[test]
    fn test_shape_validation() {
        let too_few = GeofenceShape::Polygon {
            vertices: vec![Coordinate::new(0.0, 0.0), Coordinate::new(1.0, 1.0)],
        };
        assert!(too_few.validate().is_err());

        let bad_radius = GeofenceShape::Circular {
            center: Coordinate::new(0.0, 0.0),
            radius_m: 0.0,
        };
        assert!(bad_radius.validate().is_err());

        let bad_center = GeofenceShape::Circular {
            center: Coordinate::new(120.0, 0.0),
            radius_m: 10.0,
        };
        assert_eq!(
            bad_center.validate().unwrap_err(),
            "Latitude must be between -90 and 90"
        );
    }

    #[test]
    fn test_classification_parse() {
        assert_eq!(
            GeofenceClassification::parse("restricted"),
            Some(GeofenceClassification::Restricted)
        );
        assert_eq!(GeofenceClassification::parse("unknown"), None);
    }

    #[test]
    fn test_alerts_on_flags() {
        let geofence = Geofence {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            name: "Loading dock".to_string(),
            shape: GeofenceShape::Circular {
                center: Coordinate::new(0.0, 0.0),
                radius_m: 25.0,
            },
            classification: GeofenceClassification::Restricted,
            alert_on_entry: true,
            alert_on_exit: false,
            tolerance_m: Some(-3.0),
            active: true,
        };
        assert!(geofence.alerts_on(GeofenceTransitionType::Entry));
        assert!(!geofence.alerts_on(GeofenceTransitionType::Exit));
        assert_eq!(geofence.tolerance(), 0.0);
    }
}
