//! Interfaces to the collaborators the pipeline depends on but does not own:
//! the relational store, the containment cache, the event streams and the
//! alert throttle.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    Alert, AlertType, AssetRef, EstimatedLocation, GatewayFix, Geofence, GeofenceEvent,
};

/// Failure reported by an external collaborator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ServiceError {
    #[error("{service} unavailable: {message}")]
    Unavailable {
        service: &'static str,
        message: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn unavailable(service: &'static str, message: impl Into<String>) -> Self {
        ServiceError::Unavailable {
            service,
            message: message.into(),
        }
    }

    /// Temporary failures are retried; everything else is final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::Unavailable { .. })
    }
}

/// Resolves asset tags to assets.
#[async_trait::async_trait]
pub trait AssetDirectory: Send + Sync {
    async fn find_by_tag(&self, asset_tag_id: &str) -> Result<Option<AssetRef>, ServiceError>;
}

/// Surveyed gateway positions, keyed by organization.
#[async_trait::async_trait]
pub trait GatewayDirectory: Send + Sync {
    /// Returns the subset of `gateway_ids` known for the organization.
    async fn find_gateways(
        &self,
        organization_id: Uuid,
        gateway_ids: &[String],
    ) -> Result<Vec<GatewayFix>, ServiceError>;
}

/// Active geofences, keyed by organization.
#[async_trait::async_trait]
pub trait GeofenceDirectory: Send + Sync {
    async fn active_geofences(&self, organization_id: Uuid) -> Result<Vec<Geofence>, ServiceError>;
}

/// Append-only estimated location series.
#[async_trait::async_trait]
pub trait LocationStore: Send + Sync {
    async fn insert_location(&self, location: &EstimatedLocation) -> Result<(), ServiceError>;

    /// The asset's current location, if any.
    async fn latest_location(
        &self,
        asset_id: Uuid,
    ) -> Result<Option<EstimatedLocation>, ServiceError>;
}

#[async_trait::async_trait]
pub trait GeofenceEventStore: Send + Sync {
    async fn insert_event(&self, event: &GeofenceEvent) -> Result<(), ServiceError>;
}

#[async_trait::async_trait]
pub trait AlertStore: Send + Sync {
    async fn insert_alert(&self, alert: &Alert) -> Result<(), ServiceError>;

    async fn find_alert(&self, alert_id: Uuid) -> Result<Option<Alert>, ServiceError>;

    /// Persists status, timestamps and notes of an existing alert.
    async fn update_alert(&self, alert: &Alert) -> Result<(), ServiceError>;

    /// Open (active or acknowledged) alerts for an asset and type, optionally
    /// narrowed to one geofence.
    async fn find_open_alerts(
        &self,
        asset_id: Uuid,
        alert_type: AlertType,
        geofence_id: Option<Uuid>,
    ) -> Result<Vec<Alert>, ServiceError>;
}

/// Key-value cache holding per-(geofence, asset) containment.
#[async_trait::async_trait]
pub trait ContainmentCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<bool>, ServiceError>;

    async fn set(&self, key: &str, inside: bool, ttl: Duration) -> Result<(), ServiceError>;

    async fn exists(&self, key: &str) -> Result<bool, ServiceError>;

    /// Atomically stores `inside` with a fresh TTL and returns the previous
    /// unexpired value. Two concurrent swaps on one key never both observe
    /// the same previous value.
    async fn swap(
        &self,
        key: &str,
        inside: bool,
        ttl: Duration,
    ) -> Result<Option<bool>, ServiceError>;
}

/// Durable ordered message stream.
#[async_trait::async_trait]
pub trait EventStream<T: Send + 'static>: Send + Sync {
    async fn publish(&self, item: T) -> Result<(), ServiceError>;

    /// Waits up to `wait` for at least one item and returns at most `max`
    /// items in publish order. An empty result means the wait elapsed.
    async fn pull(&self, max: usize, wait: Duration) -> Result<Vec<T>, ServiceError>;
}

/// Suppression policy for repeated alerts of the same kind.
pub trait AlertThrottle: Send + Sync {
    /// Returns true if an alert for `(asset_id, alert_type)` may be created now.
    fn try_acquire(&self, asset_id: Uuid, alert_type: AlertType) -> bool;
}

/// Throttle that never suppresses.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoThrottle;

impl AlertThrottle for NoThrottle {
    fn try_acquire(&self, _asset_id: Uuid, _alert_type: AlertType) -> bool {
        true
    }
}

/// Cache key for a containment entry.
pub fn containment_key(geofence_id: Uuid, asset_id: Uuid) -> String {
    format!("geofence:{geofence_id}:asset:{asset_id}")
}
