//! Shared utilities and common types for the asset tracking backend.
//!
//! This crate provides common functionality used across all other crates:
//! - Bounds validation for observations, coordinates and timestamps
//! - Shared constants for accepted signal and sensor ranges

pub mod validation;
