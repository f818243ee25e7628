/**
 * NORMALIZER - Conversion des records amont hétérogènes en `Ping` canonique
 *
 * RÔLE :
 * Les deux sources (snapshot HTTP et push MQTT) n'utilisent pas les mêmes noms
 * de champs ni les mêmes formats numériques. Ce module ramène tout record JSON
 * à un `Ping` validé, ou le rejette.
 *
 * FONCTIONNEMENT :
 * - FieldResolver = liste ordonnée d'alias par champ canonique, le premier
 *   présent et non-null gagne
 * - Nombres : JSON natif ou texte pt-BR ("-23,55") avec substitution `,` → `.`
 * - Timestamps : RFC 3339, "YYYY-MM-DD HH:MM:SS" (UTC), epoch ms ou secondes
 * - Record sans entityId ou timestamp = rejeté (None), jamais d'erreur
 *
 * UTILITÉ :
 * 🎯 Un record malformé ne bloque jamais le pipeline (drop-and-continue)
 */

use crate::models::{valid_coords, EntityMeta, Ping};
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};
use tracing::debug;

/// Au-delà de ce seuil un epoch numérique est lu en millisecondes
const EPOCH_MS_CUTOFF: f64 = 1e11;

/// Plage représentable par `OffsetDateTime` (années ±9999), en millisecondes
const EPOCH_MS_LIMIT: f64 = 253_402_300_800_000.0;

/// Résolveur d'un champ canonique par liste d'alias ordonnée
#[derive(Debug, Clone, Copy)]
pub struct FieldResolver {
    aliases: &'static [&'static str],
}

impl FieldResolver {
    pub const fn new(aliases: &'static [&'static str]) -> Self {
        Self { aliases }
    }

    /// Première valeur présente et non-null parmi les alias
    pub fn resolve<'a>(&self, record: &'a Value) -> Option<&'a Value> {
        self.aliases
            .iter()
            .filter_map(|key| record.get(*key))
            .find(|v| !v.is_null())
    }

    pub fn number(&self, record: &Value) -> Option<f64> {
        self.resolve(record).and_then(parse_number)
    }

    pub fn text(&self, record: &Value) -> Option<String> {
        self.resolve(record).and_then(parse_text)
    }

    pub fn timestamp(&self, record: &Value) -> Option<OffsetDateTime> {
        self.resolve(record).and_then(parse_timestamp)
    }
}

pub const ENTITY_ID: FieldResolver = FieldResolver::new(&[
    "entityId",
    "entity_id",
    "driverId",
    "motoristaId",
    "vehicleId",
    "id",
]);
pub const PING_ID: FieldResolver = FieldResolver::new(&["pingId", "ping_id", "eventId", "uuid"]);
pub const LAT: FieldResolver = FieldResolver::new(&["lat", "LATITUDE", "latitude"]);
pub const LON: FieldResolver = FieldResolver::new(&["lon", "lng", "LONGITUDE", "longitude"]);
pub const SPEED: FieldResolver = FieldResolver::new(&["speed", "velocidade", "VELOCIDADE"]);
pub const BATTERY: FieldResolver = FieldResolver::new(&["battery", "bateria", "BATERIA"]);
pub const TIMESTAMP: FieldResolver =
    FieldResolver::new(&["timestamp", "ts", "dataHora", "DATAHORA", "createdAt"]);
pub const UNIT: FieldResolver = FieldResolver::new(&["unit", "unidade", "UNIDADE", "base"]);
pub const NAME: FieldResolver = FieldResolver::new(&["name", "nome", "NOME"]);

/// Nombre fini depuis un nombre JSON ou un texte à virgule décimale
pub fn parse_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().replace(',', ".").parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn parse_text(value: &Value) -> Option<String> {
    let s = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => match (n.as_i64(), n.as_u64()) {
            (Some(i), _) => i.to_string(),
            (_, Some(u)) => u.to_string(),
            _ => n.to_string(),
        },
        _ => return None,
    };
    (!s.is_empty()).then_some(s)
}

pub fn parse_timestamp(value: &Value) -> Option<OffsetDateTime> {
    match value {
        Value::Number(_) => parse_number(value).and_then(from_epoch),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(n) = s.parse::<f64>() {
                return n.is_finite().then_some(n).and_then(from_epoch);
            }
            if let Ok(ts) = OffsetDateTime::parse(s, &Rfc3339) {
                return Some(ts);
            }
            let space = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
            let t_sep = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
            PrimitiveDateTime::parse(s, &space)
                .or_else(|_| PrimitiveDateTime::parse(s, &t_sep))
                .ok()
                .map(PrimitiveDateTime::assume_utc)
        }
        _ => None,
    }
}

fn from_epoch(n: f64) -> Option<OffsetDateTime> {
    let ms = if n.abs() >= EPOCH_MS_CUTOFF { n } else { n * 1_000.0 };
    if ms.abs() > EPOCH_MS_LIMIT {
        return None;
    }
    let nanos = (ms as i128).checked_mul(1_000_000)?;
    OffsetDateTime::from_unix_timestamp_nanos(nanos).ok()
}

/// Id synthétique quand la source n'en fournit pas : `{entityId}:{epoch_ms}`
pub fn synthetic_ping_id(entity_id: &str, timestamp: OffsetDateTime) -> String {
    let ms = timestamp.unix_timestamp_nanos() / 1_000_000;
    format!("{entity_id}:{ms}")
}

/// Record amont → `Ping`, ou None si le record est inutilisable
pub fn normalize_ping(record: &Value) -> Option<Ping> {
    let Some(entity_id) = ENTITY_ID.text(record) else {
        debug!("[normalizer] dropped record without entity id");
        return None;
    };
    let Some(timestamp) = TIMESTAMP.timestamp(record) else {
        debug!(entity_id = %entity_id, "[normalizer] dropped record without timestamp");
        return None;
    };
    let (lat, lon) = match (LAT.number(record), LON.number(record)) {
        (Some(lat), Some(lon)) if valid_coords(lat, lon) => (lat, lon),
        _ => {
            debug!(entity_id = %entity_id, "[normalizer] dropped record with invalid coordinates");
            return None;
        }
    };

    let ping_id = PING_ID
        .text(record)
        .unwrap_or_else(|| synthetic_ping_id(&entity_id, timestamp));

    Some(Ping {
        entity_id,
        ping_id,
        lat,
        lon,
        speed: SPEED.number(record),
        battery: BATTERY.number(record),
        timestamp,
    })
}

/// Métadonnées (nom, unité) d'un record snapshot
pub fn normalize_meta(record: &Value) -> EntityMeta {
    EntityMeta {
        name: NAME.text(record),
        unit: UNIT.text(record),
    }
}
