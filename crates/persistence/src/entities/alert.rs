//! Alert entity (database row mapping).

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use domain::models::{Alert, AlertSeverity, AlertStatus, AlertType};

#[derive(Debug, Clone, FromRow)]
pub struct AlertEntity {
    pub id: Uuid,
    pub asset_id: Uuid,
    pub organization_id: Uuid,
    pub geofence_id: Option<Uuid>,
    pub alert_type: String,
    pub severity: String,
    pub status: String,
    pub auto_resolved: bool,
    pub message: String,
    pub context: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution_notes: Option<String>,
}

impl TryFrom<AlertEntity> for Alert {
    type Error = String;

    fn try_from(entity: AlertEntity) -> Result<Self, Self::Error> {
        let alert_type = AlertType::parse(&entity.alert_type)
            .ok_or_else(|| format!("unknown alert type '{}'", entity.alert_type))?;
        let severity = AlertSeverity::parse(&entity.severity)
            .ok_or_else(|| format!("unknown severity '{}'", entity.severity))?;
        let status = AlertStatus::parse(&entity.status)
            .ok_or_else(|| format!("unknown status '{}'", entity.status))?;

        Ok(Self {
            id: entity.id,
            asset_id: entity.asset_id,
            organization_id: entity.organization_id,
            geofence_id: entity.geofence_id,
            alert_type,
            severity,
            status,
            auto_resolved: entity.auto_resolved,
            message: entity.message,
            context: entity.context,
            created_at: entity.created_at,
            acknowledged_at: entity.acknowledged_at,
            resolved_at: entity.resolved_at,
            resolution_notes: entity.resolution_notes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity() -> AlertEntity {
        AlertEntity {
            id: Uuid::new_v4(),
            asset_id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            geofence_id: None,
            alert_type: "anomaly_detected".to_string(),
            severity: "high".to_string(),
            status: "acknowledged".to_string(),
            auto_resolved: false,
            message: "Implausible speed".to_string(),
            context: serde_json::json!({"score": 0.93}),
            created_at: Utc::now(),
            acknowledged_at: Some(Utc::now()),
            resolved_at: None,
            resolution_notes: None,
        }
    }

    #[test]
    fn test_entity_to_domain() {
        let alert = Alert::try_from(entity()).unwrap();
        assert_eq!(alert.alert_type, AlertType::AnomalyDetected);
        assert_eq!(alert.severity, AlertSeverity::High);
        assert_eq!(alert.status, AlertStatus::Acknowledged);
    }

    #[test]
    fn test_unknown_status_rejected() {
        let mut bad = entity();
        bad.status = "snoozed".to_string();
        assert!(Alert::try_from(bad).is_err());
    }
}
