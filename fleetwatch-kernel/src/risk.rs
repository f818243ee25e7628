/**
 * RISK SCORER - Risque "stationnaire" d'une entité
 *
 * RÔLE :
 * Mesure depuis combien de temps une entité n'a pas quitté un rayon de 30 m
 * autour de sa dernière position et en déduit normal / amber / red.
 *
 * FONCTIONNEMENT :
 * - filtre les pings à coordonnées valides et retrie (on ne fait pas
 *   confiance à l'ordre reçu)
 * - ancre = ping le plus récent ; on remonte le temps tant que la distance
 *   haversine à l'ancre reste ≤ rayon, arrêt au premier ping hors rayon
 * - minutes = floor(ms / 60000) ; > 15 → red, > 10 → amber
 *
 * NOTE : un seul ping bruité hors rayon coupe une longue période immobile.
 */

use crate::geo::haversine_m;
use crate::models::{Ping, RiskLevel, RiskRecord};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskPolicy {
    pub radius_m: f64,
    pub amber_after_minutes: i64,
    pub red_after_minutes: i64,
}

impl Default for RiskPolicy {
    fn default() -> Self {
        Self {
            radius_m: 30.0,
            amber_after_minutes: 10,
            red_after_minutes: 15,
        }
    }
}

/// Borne de la période immobile : (ancre, plus ancien ping encore dans le rayon)
struct Dwell {
    anchor: OffsetDateTime,
    since: OffsetDateTime,
}

impl RiskPolicy {
    pub fn level_for(&self, minutes_stationary: i64) -> RiskLevel {
        if minutes_stationary > self.red_after_minutes {
            RiskLevel::Red
        } else if minutes_stationary > self.amber_after_minutes {
            RiskLevel::Amber
        } else {
            RiskLevel::Normal
        }
    }

    fn dwell(&self, history: &[Ping]) -> Option<Dwell> {
        let mut valid: Vec<&Ping> = history.iter().filter(|p| p.has_valid_coords()).collect();
        valid.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let (anchor, rest) = valid.split_first()?;
        let mut since = anchor.timestamp;
        for ping in rest {
            if haversine_m(anchor.lat, anchor.lon, ping.lat, ping.lon) > self.radius_m {
                break;
            }
            since = ping.timestamp;
        }

        Some(Dwell {
            anchor: anchor.timestamp,
            since,
        })
    }

    fn record(&self, entity_id: &str, stationary: Duration) -> RiskRecord {
        let minutes = stationary.whole_minutes().max(0);
        RiskRecord {
            entity_id: entity_id.to_string(),
            level: self.level_for(minutes),
            minutes_stationary: minutes,
        }
    }

    /// Score à partir de l'historique seul (durée = ancre - plus ancien ping dans le rayon)
    pub fn score(&self, entity_id: &str, history: &[Ping]) -> Option<RiskRecord> {
        let dwell = self.dwell(history)?;
        Some(self.record(entity_id, dwell.anchor - dwell.since))
    }

    /// Score à l'instant `now` : l'immobilité se prolonge jusqu'à l'évaluation
    pub fn score_at(&self, entity_id: &str, history: &[Ping], now: OffsetDateTime) -> Option<RiskRecord> {
        let dwell = self.dwell(history)?;
        let end = if now > dwell.anchor { now } else { dwell.anchor };
        Some(self.record(entity_id, end - dwell.since))
    }
}

/// Score avec la politique par défaut (30 m, 10/15 min)
pub fn score(entity_id: &str, history: &[Ping]) -> Option<RiskRecord> {
    RiskPolicy::default().score(entity_id, history)
}
