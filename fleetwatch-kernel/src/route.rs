/**
 * ROUTE RECONSTRUCTOR - Historique de pings → polyline ordonnée
 *
 * FONCTIONNEMENT :
 * - garde les points à lat/lon présents et parsables (+ timestamp pour l'ordre)
 * - tri chronologique ascendant (stable)
 * - supprime les doublons consécutifs de coordonnées
 * - rejette un point à plus de 0.1° (distance euclidienne en degrés) du
 *   dernier point retenu : filtre grossier des sauts GPS
 *
 * NOTE : le filtre travaille en degrés bruts, pas en mètres ; lat et lon n'ont
 * pas la même échelle. Comportement conservé volontairement.
 */

use crate::geo::degree_distance;
use crate::models::{valid_coords, Ping, RoutePoint};
use crate::normalizer::{LAT, LON, TIMESTAMP};
use serde_json::Value;
use time::OffsetDateTime;

pub const DEFAULT_JUMP_THRESHOLD_DEG: f64 = 0.1;

#[derive(Debug, Clone, Copy)]
struct Sample {
    lat: f64,
    lon: f64,
    timestamp: OffsetDateTime,
}

/// Corps de réponse historique → records : tableau, `{data}`, `{result}` ou objet seul
pub fn extract_records(body: Value) -> Vec<Value> {
    match body {
        Value::Array(items) => items,
        Value::Object(mut map) => {
            for key in ["data", "result"] {
                match map.remove(key) {
                    Some(Value::Array(items)) => return items,
                    Some(obj @ Value::Object(_)) => return vec![obj],
                    Some(other) => {
                        map.insert(key.to_string(), other);
                    }
                    None => {}
                }
            }
            vec![Value::Object(map)]
        }
        _ => Vec::new(),
    }
}

fn build(mut samples: Vec<Sample>, jump_threshold_deg: f64) -> Vec<RoutePoint> {
    samples.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

    let mut path: Vec<RoutePoint> = Vec::with_capacity(samples.len());
    for s in samples {
        if let Some(prev) = path.last() {
            if prev.lat == s.lat && prev.lng == s.lon {
                continue;
            }
            if degree_distance(prev.lat, prev.lng, s.lat, s.lon) > jump_threshold_deg {
                continue;
            }
        }
        path.push(RoutePoint { lat: s.lat, lng: s.lon });
    }
    path
}

/// Records bruts de l'endpoint historique → trajet ordonné
pub fn reconstruct(records: &[Value], jump_threshold_deg: f64) -> Vec<RoutePoint> {
    let samples = records
        .iter()
        .filter_map(|r| {
            let lat = LAT.number(r)?;
            let lon = LON.number(r)?;
            let timestamp = TIMESTAMP.timestamp(r)?;
            valid_coords(lat, lon).then_some(Sample { lat, lon, timestamp })
        })
        .collect();
    build(samples, jump_threshold_deg)
}

/// Même pipeline depuis des pings déjà normalisés (historique du store)
pub fn reconstruct_pings(pings: &[Ping], jump_threshold_deg: f64) -> Vec<RoutePoint> {
    let samples = pings
        .iter()
        .filter(|p| p.has_valid_coords())
        .map(|p| Sample {
            lat: p.lat,
            lon: p.lon,
            timestamp: p.timestamp,
        })
        .collect();
    build(samples, jump_threshold_deg)
}
