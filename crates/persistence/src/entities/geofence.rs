//! Geofence entity (database row mapping).

use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

use domain::models::{Coordinate, Geofence, GeofenceClassification, GeofenceShape};

/// Database row mapping for the geofences table.
///
/// Circular fences use the center and radius columns, polygons store their
/// vertex ring as JSONB.
#[derive(Debug, Clone, FromRow)]
pub struct GeofenceEntity {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub shape_type: String,
    pub center_latitude: Option<f64>,
    pub center_longitude: Option<f64>,
    pub radius_m: Option<f64>,
    pub vertices: Option<Json<Vec<Coordinate>>>,
    pub classification: String,
    pub alert_on_entry: bool,
    pub alert_on_exit: bool,
    pub tolerance_m: Option<f64>,
    pub active: bool,
}

impl TryFrom<GeofenceEntity> for Geofence {
    type Error = String;

    fn try_from(entity: GeofenceEntity) -> Result<Self, Self::Error> {
        let shape = match entity.shape_type.as_str() {
            "circular" => match (entity.center_latitude, entity.center_longitude, entity.radius_m)
            {
                (Some(latitude), Some(longitude), Some(radius_m)) => GeofenceShape::Circular {
                    center: Coordinate::new(latitude, longitude),
                    radius_m,
                },
                _ => return Err(format!("geofence {} is missing circle columns", entity.id)),
            },
            "polygon" => GeofenceShape::Polygon {
                vertices: entity.vertices.map(|v| v.0).unwrap_or_default(),
            },
            other => return Err(format!("geofence {} has unknown shape '{other}'", entity.id)),
        };
        shape
            .validate()
            .map_err(|e| format!("geofence {}: {e}", entity.id))?;

        let classification = GeofenceClassification::parse(&entity.classification)
            .ok_or_else(|| {
                format!(
                    "geofence {} has unknown classification '{}'",
                    entity.id, entity.classification
                )
            })?;

        Ok(Self {
            id: entity.id,
            organization_id: entity.organization_id,
            name: entity.name,
            shape,
            classification,
            alert_on_entry: entity.alert_on_entry,
            alert_on_exit: entity.alert_on_exit,
            tolerance_m: entity.tolerance_m,
            active: entity.active,
        })
    }
}
