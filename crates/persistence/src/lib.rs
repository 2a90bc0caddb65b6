//! Persistence layer for the asset tracking pipeline.
//!
//! This crate contains:
//! - Database connection management
//! - Entity definitions (database row mappings)
//! - Repository implementations of the domain ports

pub mod db;
pub mod entities;
pub mod error;
pub mod metrics;
pub mod repositories;
