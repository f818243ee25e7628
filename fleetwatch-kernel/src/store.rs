/**
 * PING STORE - Historique borné et dédupliqué par entité
 *
 * RÔLE :
 * Seule structure mutable partagée du moteur. Chaque entité possède une liste
 * de pings triée par timestamp décroissant, sans doublon de `ping_id`,
 * tronquée à `bound` éléments.
 *
 * FONCTIONNEMENT :
 * - merge = retrait de l'ancien ping de même id + ajout + tri + troncature
 * - load_snapshot = même chose pour un lot, indépendant de l'ordre du lot
 * - le tri garantit "last-write-by-timestamp wins" : un push en retard ne
 *   remplace jamais le dernier ping connu
 *
 * La borne est le seul mécanisme de backpressure sur la mémoire.
 */

use crate::models::{EntityId, Ping};
use std::cmp::Ordering;
use std::collections::hash_map::Entry;
use std::collections::HashMap;

pub const DEFAULT_HISTORY_BOUND: usize = 50;

/// Ordre total de l'historique : timestamp décroissant, puis ping_id décroissant
fn history_order(a: &Ping, b: &Ping) -> Ordering {
    b.timestamp
        .cmp(&a.timestamp)
        .then_with(|| b.ping_id.cmp(&a.ping_id))
}

fn cmp_reading(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        (a, b) => a.is_some().cmp(&b.is_some()),
    }
}

/// Entre deux lectures de même id dans un même lot, la plus récente gagne.
/// Les autres champs départagent : le gagnant ne dépend jamais de l'ordre du lot.
fn supersedes(candidate: &Ping, current: &Ping) -> bool {
    candidate
        .timestamp
        .cmp(&current.timestamp)
        .then_with(|| candidate.lat.total_cmp(&current.lat))
        .then_with(|| candidate.lon.total_cmp(&current.lon))
        .then_with(|| cmp_reading(candidate.speed, current.speed))
        .then_with(|| cmp_reading(candidate.battery, current.battery))
        == Ordering::Greater
}

#[derive(Debug, Clone)]
pub struct PingStore {
    histories: HashMap<EntityId, Vec<Ping>>,
    bound: usize,
}

impl Default for PingStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_BOUND)
    }
}

impl PingStore {
    pub fn new(bound: usize) -> Self {
        Self {
            histories: HashMap::new(),
            bound: bound.max(1),
        }
    }

    pub fn bound(&self) -> usize {
        self.bound
    }

    /// Fusionne un ping unique et retourne l'historique résultant
    pub fn merge(&mut self, ping: Ping) -> &[Ping] {
        let bound = self.bound;
        let history = self.histories.entry(ping.entity_id.clone()).or_default();
        history.retain(|p| p.ping_id != ping.ping_id);
        history.push(ping);
        history.sort_by(history_order);
        history.truncate(bound);
        history
    }

    /// Fusionne un lot pour une entité ; le résultat ne dépend pas de l'ordre du lot
    pub fn load_snapshot(&mut self, entity_id: &str, pings: Vec<Ping>) -> &[Ping] {
        let mut incoming: HashMap<String, Ping> = HashMap::new();
        for ping in pings.into_iter().filter(|p| p.entity_id == entity_id) {
            match incoming.entry(ping.ping_id.clone()) {
                Entry::Occupied(mut slot) => {
                    if supersedes(&ping, slot.get()) {
                        slot.insert(ping);
                    }
                }
                Entry::Vacant(slot) => {
                    slot.insert(ping);
                }
            }
        }

        if incoming.is_empty() {
            return self.history(entity_id);
        }

        let bound = self.bound;
        let history = self.histories.entry(entity_id.to_string()).or_default();
        history.retain(|p| !incoming.contains_key(&p.ping_id));
        history.extend(incoming.into_values());
        history.sort_by(history_order);
        history.truncate(bound);
        history
    }

    /// Historique d'une entité ; une clé absente = historique vide
    pub fn history(&self, entity_id: &str) -> &[Ping] {
        self.histories
            .get(entity_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn latest(&self, entity_id: &str) -> Option<&Ping> {
        self.history(entity_id).first()
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityId> {
        self.histories.keys()
    }

    pub fn len(&self) -> usize {
        self.histories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histories.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use time::macros::datetime;
    use time::{Duration, OffsetDateTime};

    const T0: OffsetDateTime = datetime!(2024-03-01 12:00:00 UTC);

    fn ping(entity: &str, id: &str, minutes: i64) -> Ping {
        Ping {
            entity_id: entity.to_string(),
            ping_id: id.to_string(),
            lat: -23.55,
            lon: -46.63,
            speed: None,
            battery: None,
            timestamp: T0 + Duration::minutes(minutes),
        }
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut once = PingStore::new(5);
        once.merge(ping("7", "a", 0));
        once.merge(ping("7", "b", 1));

        let mut twice = once.clone();
        once.merge(ping("7", "c", 2));
        twice.merge(ping("7", "c", 2));
        twice.merge(ping("7", "c", 2));

        assert_eq!(once.history("7"), twice.history("7"));
    }

    #[test]
    fn test_merge_keeps_descending_order_and_bound() {
        let mut store = PingStore::new(3);
        for (i, m) in [5, 1, 9, 3, 7, 2].iter().enumerate() {
            store.merge(ping("7", &format!("p{i}"), *m));
            assert!(store.history("7").len() <= 3);
        }
        let minutes: Vec<i64> = store
            .history("7")
            .iter()
            .map(|p| (p.timestamp - T0).whole_minutes())
            .collect();
        assert_eq!(minutes, vec![9, 7, 5]);
    }

    #[test]
    fn test_merge_replaces_same_ping_id() {
        let mut store = PingStore::default();
        store.merge(ping("7", "a", 0));
        let mut updated = ping("7", "a", 0);
        updated.lat = -23.56;
        store.merge(updated);

        let history = store.history("7");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].lat, -23.56);
        let ids: HashSet<_> = history.iter().map(|p| &p.ping_id).collect();
        assert_eq!(ids.len(), history.len());
    }

    #[test]
    fn test_late_push_does_not_regress_latest() {
        let mut store = PingStore::default();
        store.load_snapshot("7", vec![ping("7", "snap", 10)]);
        store.merge(ping("7", "late", 4));
        assert_eq!(store.latest("7").unwrap().ping_id, "snap");
    }

    #[test]
    fn test_snapshot_order_independent() {
        let batch = vec![
            ping("7", "a", 3),
            ping("7", "b", 1),
            ping("7", "c", 8),
            ping("7", "d", 5),
            ping("7", "e", 5),
        ];
        let mut reversed = batch.clone();
        reversed.reverse();
        let mut rotated = batch.clone();
        rotated.rotate_left(2);

        let mut expected = PingStore::new(4);
        expected.load_snapshot("7", batch.clone());

        for permutation in [reversed, rotated] {
            let mut store = PingStore::new(4);
            store.load_snapshot("7", permutation);
            assert_eq!(store.history("7"), expected.history("7"));
        }

        // équivalent à des merges unitaires
        let mut merged = PingStore::new(4);
        for p in batch.into_iter().rev() {
            merged.merge(p);
        }
        assert_eq!(merged.history("7"), expected.history("7"));
    }

    #[test]
    fn test_snapshot_duplicate_ids_keep_newest() {
        let mut store = PingStore::default();
        store.load_snapshot("7", vec![ping("7", "a", 1), ping("7", "a", 4)]);
        let history = store.history("7");
        assert_eq!(history.len(), 1);
        assert_eq!((history[0].timestamp - T0).whole_minutes(), 4);
    }

    #[test]
    fn test_snapshot_duplicates_differing_in_speed_are_order_independent() {
        let mut slow = ping("7", "a", 2);
        slow.speed = Some(10.0);
        let mut fast = ping("7", "a", 2);
        fast.speed = Some(20.0);
        let mut unknown = ping("7", "a", 2);
        unknown.battery = Some(55.0);

        let batch = vec![slow, fast, unknown];
        let mut expected = PingStore::default();
        expected.load_snapshot("7", batch.clone());
        assert_eq!(expected.history("7").len(), 1);
        assert_eq!(expected.history("7")[0].speed, Some(20.0));

        let mut reversed = batch.clone();
        reversed.reverse();
        let mut rotated = batch;
        rotated.rotate_left(1);
        for permutation in [reversed, rotated] {
            let mut store = PingStore::default();
            store.load_snapshot("7", permutation);
            assert_eq!(store.history("7"), expected.history("7"));
        }
    }

    #[test]
    fn test_snapshot_ignores_foreign_entities() {
        let mut store = PingStore::default();
        store.load_snapshot("7", vec![ping("8", "x", 1)]);
        assert!(store.history("7").is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn test_absent_key_is_empty_history() {
        let store = PingStore::default();
        assert!(store.history("nope").is_empty());
        assert!(store.latest("nope").is_none());
    }
}
