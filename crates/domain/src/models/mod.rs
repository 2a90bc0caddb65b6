//! Domain models for the location pipeline.

pub mod alert;
pub mod anomaly;
pub mod asset;
pub mod gateway;
pub mod geofence;
pub mod geofence_event;
pub mod location;
pub mod observation;

pub use alert::{Alert, AlertSeverity, AlertStatus, AlertType, NewAlert};
pub use anomaly::{AnomalyReason, AnomalyScore};
pub use asset::AssetRef;
pub use gateway::GatewayFix;
pub use geofence::{Coordinate, Geofence, GeofenceClassification, GeofenceShape};
pub use geofence_event::{GeofenceEvent, GeofenceTransitionType};
pub use location::{EstimatedLocation, LocationAlgorithm, Movement, PositionFix};
pub use observation::{Observation, ObservationMessage, ObservationRejection, SignalQuality};
