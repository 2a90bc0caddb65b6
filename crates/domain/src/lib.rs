//! Domain layer for the asset tracking backend.
//!
//! This crate contains:
//! - Domain models (Observation, EstimatedLocation, Geofence, Alert)
//! - The location pipeline services (signal model, trilateration, movement,
//!   geofence evaluation, alert generation, anomaly scoring)
//! - Ports describing the external collaborators the pipeline depends on

pub mod models;
pub mod ports;
pub mod services;
