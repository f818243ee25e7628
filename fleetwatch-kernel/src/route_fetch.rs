/**
 * ROUTE FETCHER - Fetch historique à la demande avec annulation par clé
 *
 * RÔLE :
 * Une requête "charger le trajet" pour une clé logique (ex: la vue carte)
 * annule la requête précédente encore en vol pour la même clé : un résultat
 * périmé ne peut jamais écraser un résultat plus récent.
 *
 * FONCTIONNEMENT :
 * - map clé → (génération, CancellationToken)
 * - nouvelle requête = cancel du token précédent + insertion du nouveau
 * - à la fin, la clé n'est libérée que si la génération est toujours la nôtre
 */

use crate::config::RoutesConf;
use crate::fetch::{build_client, get_json, FetchError};
use crate::models::RoutePoint;
use crate::route::{extract_records, reconstruct};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Fenêtre temporelle optionnelle transmise telle quelle à l'amont
#[derive(Debug, Clone, Default)]
pub struct RouteWindow {
    pub from: Option<String>,
    pub to: Option<String>,
}

pub struct RouteFetcher {
    client: reqwest::Client,
    url_template: String,
    jump_threshold_deg: f64,
    generation: AtomicU64,
    in_flight: Mutex<HashMap<String, (u64, CancellationToken)>>,
}

impl RouteFetcher {
    pub fn new(url_template: String, cfg: &RoutesConf) -> Result<Self, FetchError> {
        Ok(Self {
            client: build_client(Duration::from_secs(cfg.timeout_secs))?,
            url_template,
            jump_threshold_deg: cfg.jump_threshold_deg,
            generation: AtomicU64::new(0),
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    pub fn url_for(&self, entity_id: &str) -> String {
        self.url_template.replace("{entity_id}", entity_id)
    }

    /// Enregistre une nouvelle requête pour `key` et annule la précédente
    fn supersede(&self, key: &str) -> (u64, CancellationToken) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let token = CancellationToken::new();
        let previous = self
            .in_flight
            .lock()
            .insert(key.to_string(), (generation, token.clone()));
        if let Some((_, previous)) = previous {
            debug!(key, "[routes] superseding in-flight fetch");
            previous.cancel();
        }
        (generation, token)
    }

    fn release(&self, key: &str, generation: u64) {
        let mut in_flight = self.in_flight.lock();
        if matches!(in_flight.get(key), Some((g, _)) if *g == generation) {
            in_flight.remove(key);
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    async fn fetch_records(&self, entity_id: &str, window: &RouteWindow) -> Result<Vec<Value>, FetchError> {
        let mut request = self.client.get(self.url_for(entity_id));
        if let Some(from) = &window.from {
            request = request.query(&[("from", from)]);
        }
        if let Some(to) = &window.to {
            request = request.query(&[("to", to)]);
        }
        Ok(extract_records(get_json(request).await?))
    }

    /// Fetch + reconstruction ; `FetchError::Cancelled` si une requête plus
    /// récente pour la même clé est arrivée entre-temps
    pub async fn fetch_route(
        &self,
        key: &str,
        entity_id: &str,
        window: &RouteWindow,
    ) -> Result<Vec<RoutePoint>, FetchError> {
        let (generation, token) = self.supersede(key);

        let result = tokio::select! {
            _ = token.cancelled() => Err(FetchError::Cancelled),
            records = self.fetch_records(entity_id, window) => records,
        };
        self.release(key, generation);

        let records = result?;
        let route = reconstruct(&records, self.jump_threshold_deg);
        info!(
            entity_id,
            records = records.len(),
            points = route.len(),
            "[routes] route reconstructed"
        );
        Ok(route)
    }
}
