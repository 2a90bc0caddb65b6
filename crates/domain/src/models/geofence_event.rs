//! Geofence transition event model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Boundary transition type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeofenceTransitionType {
    Entry,
    Exit,
}

impl GeofenceTransitionType {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Entry => "entry",
            Self::Exit => "exit",
        }
    }

    /// Parse from string (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "entry" => Some(Self::Entry),
            "exit" => Some(Self::Exit),
            _ => None,
        }
    }

    /// Derives the transition from previous and current containment.
    pub fn between(was_inside: bool, is_inside: bool) -> Option<Self> {
        match (was_inside, is_inside) {
            (false, true) => Some(Self::Entry),
            (true, false) => Some(Self::Exit),
            _ => None,
        }
    }
}

impl std::fmt::Display for GeofenceTransitionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One detected boundary crossing. Created once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeofenceEvent {
    pub id: Uuid,
    pub geofence_id: Uuid,
    pub asset_id: Uuid,
    pub organization_id: Uuid,
    pub event_type: GeofenceTransitionType,
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub confidence: f64,
    pub distance_from_boundary_m: f64,
}
