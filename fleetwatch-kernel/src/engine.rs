/**
 * FLEET ENGINE - Point de sérialisation unique des pings entrants
 *
 * RÔLE :
 * Possède le PingStore, les métadonnées d'entités et l'accès aux préférences.
 * Expose les vues dérivées (liveness, risque, unités, trajets) et publie les
 * notifications de changement sur l'EventBus.
 *
 * FONCTIONNEMENT :
 * - deux producteurs (poller snapshot, listener MQTT) → une file mpsc
 * - un seul acteur consomme la file et applique chaque événement sous un
 *   unique verrou : les lecteurs voient toujours un historique complet
 * - un tick périodique recalcule les risques (la durée immobile avance
 *   même sans nouveau ping)
 *
 * UTILITÉ :
 * 🎯 Ordre garanti quelle que soit la source : le timestamp décide, pas l'arrivée
 */

use crate::config::FleetConfig;
use crate::events::{EngineEvent, EventBus};
use crate::liveness::{is_offline, offline_for};
use crate::models::{EntityId, EntityMeta, EntityView, Ping, RiskRecord, RoutePoint, UnitReport};
use crate::normalizer::{normalize_meta, normalize_ping, ENTITY_ID};
use crate::prefs::{self, PreferenceStore, PrefsError};
use crate::risk::RiskPolicy;
use crate::route::reconstruct_pings;
use crate::store::PingStore;
use crate::units::{aggregate, UnitMember};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Événement d'ingestion, quelle que soit la source
#[derive(Debug, Clone)]
pub enum IngestEvent {
    /// Lot complet issu du polling
    Snapshot(Vec<Value>),
    /// Un ping isolé issu du canal push
    Push(Value),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub accepted: usize,
    pub dropped: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub history_bound: usize,
    pub offline_threshold: Duration,
    pub risk: RiskPolicy,
    pub route_jump_deg: f64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&FleetConfig::default())
    }
}

impl EngineSettings {
    pub fn from_config(cfg: &FleetConfig) -> Self {
        Self {
            history_bound: cfg.engine.history_bound,
            offline_threshold: Duration::milliseconds(cfg.engine.offline_after_ms),
            risk: cfg.risk,
            route_jump_deg: cfg.routes.jump_threshold_deg,
        }
    }
}

pub struct FleetEngine {
    store: PingStore,
    meta: HashMap<EntityId, EntityMeta>,
    prefs: Arc<dyn PreferenceStore>,
    events: EventBus,
    settings: EngineSettings,
}

pub type SharedEngine = Arc<Mutex<FleetEngine>>;

impl FleetEngine {
    pub fn new(settings: EngineSettings, prefs: Arc<dyn PreferenceStore>, events: EventBus) -> Self {
        Self {
            store: PingStore::new(settings.history_bound),
            meta: HashMap::new(),
            prefs,
            events,
            settings,
        }
    }

    pub fn into_shared(self) -> SharedEngine {
        Arc::new(Mutex::new(self))
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Handle partagé des préférences, utilisable hors du verrou moteur
    pub fn prefs(&self) -> Arc<dyn PreferenceStore> {
        self.prefs.clone()
    }

    pub fn apply(&mut self, event: IngestEvent, now: OffsetDateTime) -> IngestReport {
        match event {
            IngestEvent::Snapshot(records) => self.ingest_snapshot(&records, now),
            IngestEvent::Push(record) => self.ingest_push(&record, now),
        }
    }

    pub fn ingest_push(&mut self, record: &Value, now: OffsetDateTime) -> IngestReport {
        let Some(ping) = normalize_ping(record) else {
            return IngestReport { accepted: 0, dropped: 1 };
        };
        let entity_id = ping.entity_id.clone();
        let before = self.latest_key(&entity_id);
        self.store.merge(ping);
        self.notify(&entity_id, before, now);
        IngestReport { accepted: 1, dropped: 0 }
    }

    pub fn ingest_snapshot(&mut self, records: &[Value], now: OffsetDateTime) -> IngestReport {
        let mut report = IngestReport::default();
        let mut batches: HashMap<EntityId, Vec<Ping>> = HashMap::new();

        for record in records {
            if let Some(entity_id) = ENTITY_ID.text(record) {
                let meta = normalize_meta(record);
                if meta != EntityMeta::default() {
                    self.meta.insert(entity_id, meta);
                }
            }
            match normalize_ping(record) {
                Some(ping) => {
                    report.accepted += 1;
                    batches.entry(ping.entity_id.clone()).or_default().push(ping);
                }
                None => report.dropped += 1,
            }
        }

        let entities = batches.len();
        for (entity_id, pings) in batches {
            let before = self.latest_key(&entity_id);
            self.store.load_snapshot(&entity_id, pings);
            self.notify(&entity_id, before, now);
        }

        debug!(
            entities,
            accepted = report.accepted,
            dropped = report.dropped,
            "[engine] snapshot applied"
        );
        self.events.publish(EngineEvent::SnapshotApplied {
            entities,
            pings: report.accepted,
            dropped: report.dropped,
        });
        report
    }

    fn latest_key(&self, entity_id: &str) -> Option<(String, OffsetDateTime)> {
        self.store
            .latest(entity_id)
            .map(|p| (p.ping_id.clone(), p.timestamp))
    }

    fn notify(&self, entity_id: &str, before: Option<(String, OffsetDateTime)>, now: OffsetDateTime) {
        if let Some(latest) = self.store.latest(entity_id) {
            if before.as_ref() != Some(&(latest.ping_id.clone(), latest.timestamp)) {
                self.events.publish(EngineEvent::EntityUpdated {
                    entity_id: entity_id.to_string(),
                    latest: latest.clone(),
                });
            }
        }
        if let Some(record) = self.risk(entity_id, now) {
            self.events.publish(EngineEvent::RiskRecomputed { record });
        }
    }

    /// Recalcul périodique des risques pour toutes les entités
    pub fn tick(&self, now: OffsetDateTime) {
        for record in self.risks(now) {
            self.events.publish(EngineEvent::RiskRecomputed { record });
        }
    }

    pub fn history(&self, entity_id: &str) -> &[Ping] {
        self.store.history(entity_id)
    }

    pub fn is_offline(&self, entity_id: &str, now: OffsetDateTime) -> bool {
        let latest = self.store.latest(entity_id).map(|p| p.timestamp);
        is_offline(latest, now, self.settings.offline_threshold)
    }

    pub fn risk(&self, entity_id: &str, now: OffsetDateTime) -> Option<RiskRecord> {
        self.settings
            .risk
            .score_at(entity_id, self.store.history(entity_id), now)
    }

    pub fn risks(&self, now: OffsetDateTime) -> Vec<RiskRecord> {
        self.entity_ids()
            .into_iter()
            .filter_map(|id| self.risk(&id, now))
            .collect()
    }

    /// Entités connues : historique ou métadonnées snapshot, triées par id
    pub fn entity_ids(&self) -> Vec<EntityId> {
        let ids: BTreeSet<&EntityId> = self.store.entities().chain(self.meta.keys()).collect();
        ids.into_iter().cloned().collect()
    }

    pub fn entity_count(&self) -> usize {
        self.entity_ids().len()
    }

    pub fn is_active(&self, entity_id: &str) -> bool {
        prefs::is_active(self.prefs.as_ref(), entity_id)
    }

    pub fn set_active(&self, entity_id: &str, active: bool) -> Result<(), PrefsError> {
        prefs::set_active(self.prefs.as_ref(), entity_id, active)?;
        info!(entity_id, active, "[engine] active flag updated");
        Ok(())
    }

    pub fn unit_report(&self, now: OffsetDateTime) -> UnitReport {
        let members: Vec<UnitMember> = self
            .entity_ids()
            .iter()
            .map(|id| UnitMember {
                unit: self.meta.get(id).and_then(|m| m.unit.clone()),
                latest: self.store.latest(id).map(|p| p.timestamp),
                active: self.is_active(id),
            })
            .collect();
        aggregate(&members, now, self.settings.offline_threshold)
    }

    pub fn entity_view(&self, entity_id: &str, now: OffsetDateTime) -> Option<EntityView> {
        let latest = self.store.latest(entity_id).cloned();
        let meta = self.meta.get(entity_id);
        if latest.is_none() && meta.is_none() {
            return None;
        }
        let ts = latest.as_ref().map(|p| p.timestamp);
        Some(EntityView {
            entity_id: entity_id.to_string(),
            name: meta.and_then(|m| m.name.clone()),
            unit: meta.and_then(|m| m.unit.clone()),
            active: self.is_active(entity_id),
            online: !is_offline(ts, now, self.settings.offline_threshold),
            offline_for_seconds: offline_for(ts, now, self.settings.offline_threshold)
                .map(|d| d.whole_seconds()),
            latest,
            risk: self.risk(entity_id, now),
        })
    }

    pub fn entity_views(&self, now: OffsetDateTime) -> Vec<EntityView> {
        self.entity_ids()
            .iter()
            .filter_map(|id| self.entity_view(id, now))
            .collect()
    }

    /// Trajet à partir de l'historique borné en mémoire
    pub fn local_route(&self, entity_id: &str) -> Vec<RoutePoint> {
        reconstruct_pings(self.store.history(entity_id), self.settings.route_jump_deg)
    }
}

/// Acteur unique : consomme la file d'ingestion et le tick de recalcul.
/// Seul `cancel` l'arrête : sans producteur, le tick continue de tourner.
pub fn spawn_engine_actor(
    engine: SharedEngine,
    mut rx: mpsc::Receiver<IngestEvent>,
    tick_every: std::time::Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("[engine] actor started");
        let mut ticker = tokio::time::interval(tick_every);
        let mut queue_open = true;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                next = rx.recv(), if queue_open => match next {
                    Some(event) => {
                        let report = engine.lock().apply(event, OffsetDateTime::now_utc());
                        if report.dropped > 0 {
                            debug!(dropped = report.dropped, "[engine] malformed records dropped");
                        }
                    }
                    None => {
                        info!("[engine] ingest queue closed, ticking only");
                        queue_open = false;
                    }
                },
                _ = ticker.tick() => {
                    engine.lock().tick(OffsetDateTime::now_utc());
                }
            }
        }
        info!("[engine] actor stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RiskLevel;
    use crate::prefs::MemoryPrefs;
    use fleetwatch_devkit::payloads::{epoch_ms, PingPayload};
    use serde_json::json;
    use time::macros::datetime;

    const T0: OffsetDateTime = datetime!(2024-03-01 12:00:00 UTC);

    fn engine() -> FleetEngine {
        FleetEngine::new(EngineSettings::default(), Arc::new(MemoryPrefs::new()), EventBus::default())
    }

    fn at(minutes: i64) -> OffsetDateTime {
        T0 + Duration::minutes(minutes)
    }

    #[test]
    fn test_push_scenario_turns_red() {
        let mut engine = engine();
        let t0 = epoch_ms(T0.unix_timestamp());

        engine.ingest_push(&PingPayload::new(7, -23.55, -46.63, t0).push_message(), at(0));
        engine.ingest_push(
            &PingPayload::new(7, -23.5501, -46.6301, t0 + 5 * 60_000).push_message(),
            at(5),
        );

        let record = engine.risk("7", at(16)).unwrap();
        assert_eq!(record.level, RiskLevel::Red);
        assert_eq!(record.minutes_stationary, 16);
    }

    #[test]
    fn test_snapshot_and_push_share_merge_path() {
        let mut engine = engine();
        let t0 = epoch_ms(T0.unix_timestamp());

        let snapshot: Vec<Value> = vec![
            PingPayload::new(7, -23.55, -46.63, t0 + 10 * 60_000).snapshot_record("Ana", "Campinas"),
            PingPayload::new(8, -22.9, -43.2, t0).snapshot_record("Bia", "Santos"),
            json!({ "NOME": "sem posição", "motoristaId": 9, "UNIDADE": "Santos" }),
        ];
        let report = engine.ingest_snapshot(&snapshot, at(10));
        assert_eq!(report, IngestReport { accepted: 2, dropped: 1 });

        // push en retard : ne régresse pas le dernier ping
        engine.ingest_push(&PingPayload::new(7, -23.0, -46.0, t0).push_message(), at(11));
        assert_eq!(engine.history("7").len(), 2);
        assert_eq!(engine.history("7")[0].timestamp, at(10));

        assert_eq!(engine.entity_ids(), vec!["7", "8", "9"]);
        let view = engine.entity_view("9", at(11)).unwrap();
        assert!(!view.online);
        assert!(view.latest.is_none());
        assert_eq!(view.unit.as_deref(), Some("Santos"));
    }

    #[test]
    fn test_malformed_push_is_dropped() {
        let mut engine = engine();
        let report = engine.ingest_push(&json!({ "lat": 1, "lon": 1 }), T0);
        assert_eq!(report, IngestReport { accepted: 0, dropped: 1 });
        assert!(engine.entity_ids().is_empty());
    }

    #[test]
    fn test_unit_report_uses_liveness_and_active_flag() {
        let mut engine = engine();
        let t0 = epoch_ms(T0.unix_timestamp());
        let snapshot: Vec<Value> = vec![
            PingPayload::new(1, -23.5, -46.6, t0).snapshot_record("A", "Campinas"),
            PingPayload::new(2, -23.5, -46.6, t0 - 10 * 60_000).snapshot_record("B", "Campinas"),
            PingPayload::new(3, -23.5, -46.6, t0).snapshot_record("C", ""),
        ];
        engine.ingest_snapshot(&snapshot, T0);

        let report = engine.unit_report(T0);
        assert_eq!((report.total.total, report.total.online, report.total.offline), (3, 2, 1));

        engine.set_active("2", false).unwrap();
        let report = engine.unit_report(T0);
        assert_eq!((report.total.total, report.total.online, report.total.offline), (2, 2, 0));
        assert_eq!(report.rows[0].unit_name, "Campinas");
        assert_eq!(report.rows[1].unit_name, crate::units::NO_UNIT);
    }

    #[test]
    fn test_events_are_published() {
        let mut engine = engine();
        let mut rx = engine.events().subscribe();
        let t0 = epoch_ms(T0.unix_timestamp());

        engine.ingest_push(&PingPayload::new(7, -23.55, -46.63, t0).push_message(), T0);
        // même ping une seconde fois : pas de nouvel EntityUpdated
        engine.ingest_push(&PingPayload::new(7, -23.55, -46.63, t0).push_message(), T0);

        let mut updates = 0;
        let mut risks = 0;
        while let Ok(event) = rx.try_recv() {
            match event {
                EngineEvent::EntityUpdated { .. } => updates += 1,
                EngineEvent::RiskRecomputed { .. } => risks += 1,
                _ => {}
            }
        }
        assert_eq!(updates, 1);
        assert_eq!(risks, 2);
    }

    #[test]
    fn test_local_route_is_chronological() {
        let mut engine = engine();
        let t0 = epoch_ms(T0.unix_timestamp());
        for (i, lat) in [-23.550, -23.551, -23.552].iter().enumerate() {
            let payload = PingPayload::new(7, *lat, -46.63, t0 + i as i64 * 60_000);
            engine.ingest_push(&payload.push_message(), T0);
        }
        let route = engine.local_route("7");
        let lats: Vec<f64> = route.iter().map(|p| p.lat).collect();
        assert_eq!(lats, vec![-23.550, -23.551, -23.552]);
    }

    #[test]
    fn test_explicit_ping_id_updates_in_place() {
        let mut engine = engine();
        let t0 = epoch_ms(T0.unix_timestamp());

        let first = PingPayload::new(7, -23.55, -46.63, t0).with_ping_id("p-1");
        engine.ingest_push(&first.push_message(), T0);
        let corrected = PingPayload::new(7, -23.56, -46.64, t0)
            .with_ping_id("p-1")
            .with_battery(40.0);
        engine.ingest_push(&corrected.push_message(), T0);

        let history = engine.history("7");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].ping_id, "p-1");
        assert_eq!((history[0].lat, history[0].lon), (-23.56, -46.64));
        assert_eq!(history[0].battery, Some(40.0));

        // même instant sans pingId : id synthétique, lecture distincte
        engine.ingest_push(&PingPayload::new(7, -23.55, -46.63, t0).push_message(), T0);
        let synthetic = format!("7:{t0}");
        let mut ids: Vec<&str> = engine.history("7").iter().map(|p| p.ping_id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec![synthetic.as_str(), "p-1"]);
    }

    async fn wait_for_history(shared: &SharedEngine, entity_id: &str, len: usize) {
        for _ in 0..200 {
            if shared.lock().history(entity_id).len() == len {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("history of {entity_id} never reached {len} pings");
    }

    #[tokio::test]
    async fn test_actor_serializes_both_sources() {
        let shared = engine().into_shared();
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let handle = spawn_engine_actor(
            shared.clone(),
            rx,
            std::time::Duration::from_secs(3600),
            cancel.clone(),
        );

        let t0 = epoch_ms(T0.unix_timestamp());
        tx.send(IngestEvent::Snapshot(vec![
            PingPayload::new(7, -23.55, -46.63, t0).snapshot_record("Ana", "Campinas"),
        ]))
        .await
        .unwrap();
        tx.send(IngestEvent::Push(
            PingPayload::new(7, -23.55, -46.63, t0 + 60_000).push_message(),
        ))
        .await
        .unwrap();

        wait_for_history(&shared, "7", 2).await;
        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_actor_keeps_ticking_without_producers() {
        let shared = engine().into_shared();
        let t0 = epoch_ms(T0.unix_timestamp());
        shared
            .lock()
            .ingest_push(&PingPayload::new(7, -23.55, -46.63, t0).push_message(), T0);
        let mut rx_events = shared.lock().events().subscribe();

        let (tx, rx) = mpsc::channel(1);
        drop(tx);
        let cancel = CancellationToken::new();
        let handle = spawn_engine_actor(
            shared.clone(),
            rx,
            std::time::Duration::from_millis(20),
            cancel.clone(),
        );

        // plusieurs ticks après la fermeture de la file
        let mut risks = 0;
        while risks < 3 {
            let event = tokio::time::timeout(std::time::Duration::from_secs(5), rx_events.recv())
                .await
                .unwrap()
                .unwrap();
            if matches!(event, EngineEvent::RiskRecomputed { .. }) {
                risks += 1;
            }
        }
        assert!(!handle.is_finished());

        cancel.cancel();
        handle.await.unwrap();
    }
}
