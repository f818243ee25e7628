/**
 * UNIT AGGREGATOR - Compteurs online/offline par unité (base, dépôt...)
 *
 * Pur fold sur les états d'entités, recalculé à chaque tick : aucune mémoire.
 * Les entités désactivées par le consommateur (`active = false`) sont exclues.
 */

use crate::liveness::is_offline;
use crate::models::{UnitReport, UnitSummary};
use std::collections::HashMap;
use time::{Duration, OffsetDateTime};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Libellé des entités sans unité
pub const NO_UNIT: &str = "—";

/// État minimal d'une entité vu par l'agrégateur
#[derive(Debug, Clone)]
pub struct UnitMember {
    pub unit: Option<String>,
    pub latest: Option<OffsetDateTime>,
    pub active: bool,
}

fn unit_label(unit: Option<&str>) -> String {
    match unit.map(str::trim) {
        Some(u) if !u.is_empty() => u.to_string(),
        _ => NO_UNIT.to_string(),
    }
}

/// Clé de tri primaire façon collation pt-BR : sans accents, sans casse
pub fn collation_key(s: &str) -> String {
    s.nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .collect()
}

pub fn aggregate(members: &[UnitMember], now: OffsetDateTime, threshold: Duration) -> UnitReport {
    let mut groups: HashMap<String, UnitSummary> = HashMap::new();

    for member in members.iter().filter(|m| m.active) {
        let label = unit_label(member.unit.as_deref());
        let row = groups.entry(label.clone()).or_insert_with(|| UnitSummary {
            unit_name: label,
            ..Default::default()
        });
        row.total += 1;
        if is_offline(member.latest, now, threshold) {
            row.offline += 1;
        } else {
            row.online += 1;
        }
    }

    let mut rows: Vec<UnitSummary> = groups.into_values().collect();
    rows.sort_by(|a, b| {
        collation_key(&a.unit_name)
            .cmp(&collation_key(&b.unit_name))
            .then_with(|| a.unit_name.cmp(&b.unit_name))
    });

    let total = rows.iter().fold(
        UnitSummary {
            unit_name: "Total".to_string(),
            ..Default::default()
        },
        |mut acc, row| {
            acc.total += row.total;
            acc.online += row.online;
            acc.offline += row.offline;
            acc
        },
    );

    UnitReport { rows, total }
}
