//! Asset tracking pipeline service: configuration, the three stream
//! processors and their coordinator, in-process infrastructure and the
//! operator HTTP surface.

pub mod app;
pub mod config;
pub mod error;
pub mod jobs;
pub mod memory;
pub mod middleware;
pub mod processors;
pub mod routes;
pub mod services;
