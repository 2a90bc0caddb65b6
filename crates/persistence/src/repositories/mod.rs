//! Repository implementations of the domain ports.

pub mod alert;
pub mod asset;
pub mod gateway;
pub mod geofence;
pub mod geofence_event;
pub mod location;

pub use alert::AlertRepository;
pub use asset::AssetRepository;
pub use gateway::GatewayRepository;
pub use geofence::GeofenceRepository;
pub use geofence_event::GeofenceEventRepository;
pub use location::LocationRepository;
