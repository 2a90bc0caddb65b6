//! Database entity definitions.
//!
//! Entities are direct mappings to database rows.

pub mod alert;
pub mod asset;
pub mod gateway;
pub mod geofence;
pub mod geofence_event;
pub mod location;

pub use alert::AlertEntity;
pub use asset::AssetEntity;
pub use gateway::GatewayEntity;
pub use geofence::GeofenceEntity;
pub use geofence_event::GeofenceEventEntity;
pub use location::EstimatedLocationEntity;
