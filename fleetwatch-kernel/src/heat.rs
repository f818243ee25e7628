use crate::models::{valid_coords, HeatPoint};
use crate::normalizer::{FieldResolver, LAT, LON};
use serde_json::Value;
use std::collections::HashMap;

pub const WEIGHT: FieldResolver = FieldResolver::new(&["weight", "peso", "count", "intensity"]);

/// Points bruts → heat points pondérés, agrégés par coordonnée exacte.
/// L'ordre de sortie suit la première apparition de chaque coordonnée.
pub fn normalize(raw_points: &[Value]) -> Vec<HeatPoint> {
    let mut index: HashMap<(u64, u64), usize> = HashMap::new();
    let mut points: Vec<HeatPoint> = Vec::new();

    for raw in raw_points {
        let (Some(lat), Some(lon)) = (LAT.number(raw), LON.number(raw)) else {
            continue;
        };
        if !valid_coords(lat, lon) {
            continue;
        }
        let weight = WEIGHT.number(raw).filter(|w| *w > 0.0).unwrap_or(1.0);

        // -0.0 et 0.0 désignent la même coordonnée
        let key = ((lat + 0.0).to_bits(), (lon + 0.0).to_bits());
        match index.get(&key) {
            Some(&i) => points[i].weight += weight,
            None => {
                index.insert(key, points.len());
                points.push(HeatPoint { lat, lon, weight });
            }
        }
    }

    points
}
