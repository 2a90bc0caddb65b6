//! In-memory implementations of the registry and output stores.
//!
//! Used by the integration tests and by local runs without a database. A
//! store can be switched into an unavailable mode to exercise the retry and
//! error-state paths of the processors.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use domain::models::{
    Alert, AlertType, AssetRef, EstimatedLocation, GatewayFix, Geofence, GeofenceEvent,
};
use domain::ports::{
    AlertStore, AssetDirectory, GatewayDirectory, GeofenceDirectory, GeofenceEventStore,
    LocationStore, ServiceError,
};
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    assets: HashMap<String, AssetRef>,
    gateways: HashMap<(Uuid, String), GatewayFix>,
    geofences: Vec<Geofence>,
    locations: Vec<EstimatedLocation>,
    events: Vec<GeofenceEvent>,
    alerts: Vec<Alert>,
}

#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    unavailable: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(|e| e.into_inner())
    }

    fn check_available(&self) -> Result<(), ServiceError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ServiceError::unavailable("store", "store is offline"));
        }
        Ok(())
    }

    /// While unavailable every call fails with a retryable error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn add_asset(&self, asset: AssetRef) {
        self.write().assets.insert(asset.asset_tag_id.clone(), asset);
    }

    pub fn add_gateway(&self, gateway: GatewayFix) {
        self.write().gateways.insert(
            (gateway.organization_id, gateway.gateway_id.clone()),
            gateway,
        );
    }

    pub fn add_geofence(&self, geofence: Geofence) {
        let mut tables = self.write();
        tables.geofences.retain(|g| g.id != geofence.id);
        tables.geofences.push(geofence);
    }

    pub fn locations(&self) -> Vec<EstimatedLocation> {
        self.read().locations.clone()
    }

    pub fn events(&self) -> Vec<GeofenceEvent> {
        self.read().events.clone()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.read().alerts.clone()
    }
}

#[async_trait::async_trait]
impl AssetDirectory for InMemoryStore {
    async fn find_by_tag(&self, asset_tag_id: &str) -> Result<Option<AssetRef>, ServiceError> {
        self.check_available()?;
        Ok(self.read().assets.get(asset_tag_id).cloned())
    }
}

#[async_trait::async_trait]
impl GatewayDirectory for InMemoryStore {
    async fn find_gateways(
        &self,
        organization_id: Uuid,
        gateway_ids: &[String],
    ) -> Result<Vec<GatewayFix>, ServiceError> {
        self.check_available()?;
        let tables = self.read();
        Ok(gateway_ids
            .iter()
            .filter_map(|id| tables.gateways.get(&(organization_id, id.clone())).cloned())
            .collect())
    }
}

#[async_trait::async_trait]
impl GeofenceDirectory for InMemoryStore {
    async fn active_geofences(&self, organization_id: Uuid) -> Result<Vec<Geofence>, ServiceError> {
        self.check_available()?;
        Ok(self
            .read()
            .geofences
            .iter()
            .filter(|g| g.organization_id == organization_id && g.active)
            .cloned()
            .collect())
    }
}

#[async_trait::async_trait]
impl LocationStore for InMemoryStore {
    async fn insert_location(&self, location: &EstimatedLocation) -> Result<(), ServiceError> {
        self.check_available()?;
        self.write().locations.push(location.clone());
        Ok(())
    }

    async fn latest_location(
        &self,
        asset_id: Uuid,
    ) -> Result<Option<EstimatedLocation>, ServiceError> {
        self.check_available()?;
        Ok(self
            .read()
            .locations
            .iter()
            .filter(|l| l.asset_id == asset_id)
            .max_by_key(|l| l.estimated_at)
            .cloned())
    }
}

#[async_trait::async_trait]
impl GeofenceEventStore for InMemoryStore {
    async fn insert_event(&self, event: &GeofenceEvent) -> Result<(), ServiceError> {
        self.check_available()?;
        let mut tables = self.write();
        if !tables.events.iter().any(|e| e.id == event.id) {
            tables.events.push(event.clone());
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl AlertStore for InMemoryStore {
    async fn insert_alert(&self, alert: &Alert) -> Result<(), ServiceError> {
        self.check_available()?;
        self.write().alerts.push(alert.clone());
        Ok(())
    }

    async fn find_alert(&self, alert_id: Uuid) -> Result<Option<Alert>, ServiceError> {
        self.check_available()?;
        Ok(self.read().alerts.iter().find(|a| a.id == alert_id).cloned())
    }

    async fn update_alert(&self, alert: &Alert) -> Result<(), ServiceError> {
        self.check_available()?;
        let mut tables = self.write();
        let existing = tables
            .alerts
            .iter_mut()
            .find(|a| a.id == alert.id)
            .ok_or_else(|| ServiceError::NotFound(format!("alert {}", alert.id)))?;
        *existing = alert.clone();
        Ok(())
    }

    async fn find_open_alerts(
        &self,
        asset_id: Uuid,
        alert_type: AlertType,
        geofence_id: Option<Uuid>,
    ) -> Result<Vec<Alert>, ServiceError> {
        self.check_available()?;
        Ok(self
            .read()
            .alerts
            .iter()
            .filter(|a| {
                a.asset_id == asset_id
                    && a.alert_type == alert_type
                    && a.status.is_open()
                    && geofence_id.map_or(true, |id| a.geofence_id == Some(id))
            })
            .cloned()
            .collect())
    }
}
