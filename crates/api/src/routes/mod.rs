//! HTTP route handlers.

pub mod health;
pub mod observations;
pub mod processors;
