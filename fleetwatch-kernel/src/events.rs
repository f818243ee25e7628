use crate::models::{EntityId, Ping, RiskRecord};
use serde::Serialize;
use tokio::sync::broadcast;

/// Notifications émises par le moteur ; la couche d'affichage s'y abonne
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    EntityUpdated { entity_id: EntityId, latest: Ping },
    RiskRecomputed { record: RiskRecord },
    SnapshotApplied { entities: usize, pings: usize, dropped: usize },
    FetchFailed { source: String, error: String },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Sans abonné l'événement est simplement perdu
    pub fn publish(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
