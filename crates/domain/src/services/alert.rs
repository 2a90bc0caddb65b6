//! Alert creation, throttling and lifecycle transitions.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::retry::RetryPolicy;
use crate::models::{Alert, AlertStatus, AlertType, NewAlert};
use crate::ports::{AlertStore, AlertThrottle, ServiceError};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AlertError {
    #[error("Alert not found: {0}")]
    NotFound(Uuid),

    #[error("Cannot {action} alert {alert_id} in status {status}")]
    InvalidTransition {
        alert_id: Uuid,
        action: &'static str,
        status: &'static str,
    },

    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl From<AlertError> for ServiceError {
    fn from(err: AlertError) -> Self {
        match err {
            AlertError::Service(e) => e,
            AlertError::NotFound(id) => ServiceError::NotFound(format!("alert {id}")),
            other => ServiceError::Internal(other.to_string()),
        }
    }
}

/// Result of a creation request.
#[derive(Debug, Clone, PartialEq)]
pub enum AlertOutcome {
    Created(Alert),
    /// Dropped by the throttle; nothing was persisted.
    Suppressed,
}

impl AlertOutcome {
    pub fn created(self) -> Option<Alert> {
        match self {
            AlertOutcome::Created(alert) => Some(alert),
            AlertOutcome::Suppressed => None,
        }
    }
}

/// Creates alerts and moves them through `active -> acknowledged -> resolved`.
pub struct AlertGenerator {
    store: Arc<dyn AlertStore>,
    throttle: Arc<dyn AlertThrottle>,
    retry: RetryPolicy,
    /// Throttle permits granted to alerts whose insert failed. The next
    /// request for the same key uses the permit instead of the throttle.
    held_permits: Mutex<HashSet<(Uuid, AlertType)>>,
}

impl AlertGenerator {
    pub fn new(
        store: Arc<dyn AlertStore>,
        throttle: Arc<dyn AlertThrottle>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            throttle,
            retry,
            held_permits: Mutex::new(HashSet::new()),
        }
    }

    fn held_permits(&self) -> std::sync::MutexGuard<'_, HashSet<(Uuid, AlertType)>> {
        self.held_permits.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Persists a new active alert unless the throttle suppresses it.
    pub async fn create(&self, request: NewAlert) -> Result<AlertOutcome, AlertError> {
        let permit = (request.asset_id, request.alert_type);
        let held = self.held_permits().remove(&permit);
        if !held && !self.throttle.try_acquire(request.asset_id, request.alert_type) {
            debug!(
                asset_id = %request.asset_id,
                alert_type = %request.alert_type,
                "Alert suppressed by throttle"
            );
            return Ok(AlertOutcome::Suppressed);
        }

        let alert = request.into_alert(Utc::now());
        if let Err(e) = self
            .retry
            .run("insert_alert", || self.store.insert_alert(&alert))
            .await
        {
            warn!(
                asset_id = %alert.asset_id,
                alert_type = %alert.alert_type,
                error = %e,
                "Alert insert failed, holding throttle permit"
            );
            self.held_permits().insert(permit);
            return Err(e.into());
        }

        info!(
            alert_id = %alert.id,
            asset_id = %alert.asset_id,
            alert_type = %alert.alert_type,
            severity = alert.severity.as_str(),
            "Alert created"
        );
        Ok(AlertOutcome::Created(alert))
    }

    /// Marks an active alert acknowledged. Acknowledging twice is a no-op.
    pub async fn acknowledge(&self, alert_id: Uuid) -> Result<Alert, AlertError> {
        let mut alert = self.load(alert_id).await?;
        match alert.status {
            AlertStatus::Acknowledged => return Ok(alert),
            AlertStatus::Resolved => {
                return Err(AlertError::InvalidTransition {
                    alert_id,
                    action: "acknowledge",
                    status: alert.status.as_str(),
                })
            }
            AlertStatus::Active => {}
        }

        alert.status = AlertStatus::Acknowledged;
        alert.acknowledged_at = Some(Utc::now());
        self.save(&alert).await?;

        info!(alert_id = %alert_id, "Alert acknowledged");
        Ok(alert)
    }

    /// Resolves an open alert. Resolving an already resolved alert leaves it
    /// untouched, including its timestamps and notes.
    pub async fn resolve(
        &self,
        alert_id: Uuid,
        notes: Option<String>,
    ) -> Result<Alert, AlertError> {
        let mut alert = self.load(alert_id).await?;
        if alert.status == AlertStatus::Resolved {
            return Ok(alert);
        }

        alert.status = AlertStatus::Resolved;
        alert.resolved_at = Some(Utc::now());
        alert.resolution_notes = notes;
        self.save(&alert).await?;

        info!(alert_id = %alert_id, "Alert resolved");
        Ok(alert)
    }

    /// Resolves every open alert of the given kind for an asset, marking
    /// them as auto-resolved.
    pub async fn auto_resolve(
        &self,
        asset_id: Uuid,
        alert_type: AlertType,
        geofence_id: Option<Uuid>,
        notes: &str,
    ) -> Result<Vec<Alert>, AlertError> {
        let open = self
            .retry
            .run("find_open_alerts", || {
                self.store.find_open_alerts(asset_id, alert_type, geofence_id)
            })
            .await?;

        let mut resolved = Vec::with_capacity(open.len());
        for mut alert in open.into_iter().filter(|a| a.status.is_open()) {
            alert.status = AlertStatus::Resolved;
            alert.auto_resolved = true;
            alert.resolved_at = Some(Utc::now());
            alert.resolution_notes = Some(notes.to_string());
            self.save(&alert).await?;
            resolved.push(alert);
        }

        if !resolved.is_empty() {
            info!(
                asset_id = %asset_id,
                alert_type = %alert_type,
                count = resolved.len(),
                "Alerts auto-resolved"
            );
        }
        Ok(resolved)
    }

    async fn load(&self, alert_id: Uuid) -> Result<Alert, AlertError> {
        self.retry
            .run("find_alert", || self.store.find_alert(alert_id))
            .await?
            .ok_or(AlertError::NotFound(alert_id))
    }

    async fn save(&self, alert: &Alert) -> Result<(), AlertError> {
        self.retry
            .run("update_alert", || self.store.update_alert(alert))
            .await?;
        Ok(())
    }
}
