use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Identifiant canonique d'une entité (motorista / véhicule).
/// Les ids numériques amont (`7`) et texte (`"7"`) se rejoignent ici.
pub type EntityId = String;

/// Lecture de position normalisée
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ping {
    pub entity_id: EntityId,
    pub ping_id: String,
    pub lat: f64,
    pub lon: f64,
    pub speed: Option<f64>,
    pub battery: Option<f64>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl Ping {
    pub fn has_valid_coords(&self) -> bool {
        valid_coords(self.lat, self.lon)
    }
}

pub fn valid_coords(lat: f64, lon: f64) -> bool {
    lat.is_finite()
        && lon.is_finite()
        && (-90.0..=90.0).contains(&lat)
        && (-180.0..=180.0).contains(&lon)
}

/// Métadonnées d'affichage portées par les records snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityMeta {
    pub name: Option<String>,
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Normal,
    Amber,
    Red,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskRecord {
    pub entity_id: EntityId,
    pub level: RiskLevel,
    pub minutes_stationary: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitSummary {
    pub unit_name: String,
    pub total: u32,
    pub online: u32,
    pub offline: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitReport {
    pub rows: Vec<UnitSummary>,
    pub total: UnitSummary,
}

/// Point de polyline (`lng` pour coller au format des clients carto)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoutePoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeatPoint {
    pub lat: f64,
    pub lon: f64,
    pub weight: f64,
}

/// Vue consolidée d'une entité pour l'API
#[derive(Debug, Clone, Serialize)]
pub struct EntityView {
    pub entity_id: EntityId,
    pub name: Option<String>,
    pub unit: Option<String>,
    pub active: bool,
    pub online: bool,
    pub offline_for_seconds: Option<i64>,
    pub latest: Option<Ping>,
    pub risk: Option<RiskRecord>,
}
