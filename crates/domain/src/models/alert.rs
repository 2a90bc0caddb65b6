//! Alert domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// What raised the alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    GeofenceViolation,
    AnomalyDetected,
    LowBattery,
}

impl AlertType {
    /// Returns the string representation for database storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::GeofenceViolation => "geofence_violation",
            AlertType::AnomalyDetected => "anomaly_detected",
            AlertType::LowBattery => "low_battery",
        }
    }

    /// Parses from database string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "geofence_violation" => Some(AlertType::GeofenceViolation),
            "anomaly_detected" => Some(AlertType::AnomalyDetected),
            "low_battery" => Some(AlertType::LowBattery),
            _ => None,
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Low => "low",
            AlertSeverity::Medium => "medium",
            AlertSeverity::High => "high",
            AlertSeverity::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(AlertSeverity::Low),
            "medium" => Some(AlertSeverity::Medium),
            "high" => Some(AlertSeverity::High),
            "critical" => Some(AlertSeverity::Critical),
            _ => None,
        }
    }
}

/// Alert lifecycle: `active -> acknowledged -> resolved`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Active => "active",
            AlertStatus::Acknowledged => "acknowledged",
            AlertStatus::Resolved => "resolved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(AlertStatus::Active),
            "acknowledged" => Some(AlertStatus::Acknowledged),
            "resolved" => Some(AlertStatus::Resolved),
            _ => None,
        }
    }

    /// Open alerts still need attention.
    pub fn is_open(&self) -> bool {
        !matches!(self, AlertStatus::Resolved)
    }
}

/// A persisted alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub asset_id: Uuid,
    pub organization_id: Uuid,
    pub geofence_id: Option<Uuid>,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub status: AlertStatus,
    pub auto_resolved: bool,
    pub message: String,
    pub context: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution_notes: Option<String>,
}

/// Creation request handed to the alert generator.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAlert {
    pub asset_id: Uuid,
    pub organization_id: Uuid,
    pub geofence_id: Option<Uuid>,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub message: String,
    pub context: serde_json::Value,
}

impl NewAlert {
    /// Materialises the request as a fresh `active` alert.
    pub fn into_alert(self, now: DateTime<Utc>) -> Alert {
        Alert {
            id: Uuid::new_v4(),
            asset_id: self.asset_id,
            organization_id: self.organization_id,
            geofence_id: self.geofence_id,
            alert_type: self.alert_type,
            severity: self.severity,
            status: AlertStatus::Active,
            auto_resolved: false,
            message: self.message,
            context: self.context,
            created_at: now,
            acknowledged_at: None,
            resolved_at: None,
            resolution_notes: None,
        }
    }
}
