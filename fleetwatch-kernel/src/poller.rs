/**
 * SNAPSHOT POLLER - Producteur périodique du moteur
 *
 * Toutes les `interval_secs` : GET du snapshot complet (timeout explicite),
 * puis envoi du lot dans la file d'ingestion. Un échec réseau est logué et
 * signalé sur l'EventBus ; le tick suivant réessaie, sans backoff.
 */

use crate::config::SnapshotConf;
use crate::engine::IngestEvent;
use crate::events::{EngineEvent, EventBus};
use crate::fetch::{build_client, get_json, FetchError};
use crate::health::HealthTracker;
use crate::route::extract_records;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct SnapshotPoller {
    client: reqwest::Client,
    url: String,
    interval: Duration,
}

impl SnapshotPoller {
    pub fn new(cfg: &SnapshotConf) -> Result<Self, FetchError> {
        Ok(Self {
            client: build_client(Duration::from_secs(cfg.timeout_secs))?,
            url: cfg.url.clone(),
            interval: Duration::from_secs(cfg.interval_secs.max(1)),
        })
    }

    /// Un cycle de fetch ; accepte un tableau ou un tableau enveloppé
    pub async fn fetch_snapshot(&self) -> Result<Vec<Value>, FetchError> {
        let body = get_json(self.client.get(&self.url)).await?;
        Ok(extract_records(body))
    }

    pub fn spawn(
        self,
        tx: mpsc::Sender<IngestEvent>,
        events: EventBus,
        health: HealthTracker,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(url = %self.url, every = ?self.interval, "[poller] started");
            let mut interval = tokio::time::interval(self.interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }

                let result = tokio::select! {
                    _ = cancel.cancelled() => break,
                    result = self.fetch_snapshot() => result,
                };

                match result {
                    Ok(records) => {
                        health.mark_snapshot_ok(records.len());
                        if records.is_empty() {
                            debug!("[poller] empty snapshot");
                            continue;
                        }
                        if tx.send(IngestEvent::Snapshot(records)).await.is_err() {
                            // l'acteur est arrêté
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "[poller] snapshot fetch failed, retrying next cycle");
                        health.mark_snapshot_failed(e.to_string());
                        events.publish(EngineEvent::FetchFailed {
                            source: "snapshot".into(),
                            error: e.to_string(),
                        });
                    }
                }
            }
            info!("[poller] stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetwatch_devkit::payloads::{epoch_ms, wrap_data, PingPayload};
    use fleetwatch_devkit::upstream::{FakeUpstream, Reply};

    fn conf(url: String, timeout_secs: u64) -> SnapshotConf {
        SnapshotConf {
            url,
            interval_secs: 1,
            timeout_secs,
        }
    }

    #[tokio::test]
    async fn test_fetch_wrapped_snapshot() {
        let t0 = epoch_ms(1_709_294_400);
        let body = wrap_data(vec![
            PingPayload::new(7, -23.55, -46.63, t0).snapshot_record("Ana", "Campinas"),
            PingPayload::new(8, -22.9, -43.2, t0).snapshot_record("Bia", "Santos"),
        ]);
        let upstream = FakeUpstream::start(vec![("/motoristas", Reply::Json(body))])
            .await
            .unwrap();

        let poller = SnapshotPoller::new(&conf(upstream.url("/motoristas"), 5)).unwrap();
        let records = poller.fetch_snapshot().await.unwrap();
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn test_http_error_is_transient_failure() {
        let upstream = FakeUpstream::start(vec![("/motoristas", Reply::Status(503))])
            .await
            .unwrap();
        let poller = SnapshotPoller::new(&conf(upstream.url("/motoristas"), 5)).unwrap();
        assert!(matches!(poller.fetch_snapshot().await, Err(FetchError::Status(503))));
    }

    #[tokio::test]
    async fn test_timeout_is_reported() {
        let upstream = FakeUpstream::start(vec![("/motoristas", Reply::Hang)])
            .await
            .unwrap();
        let poller = SnapshotPoller::new(&conf(upstream.url("/motoristas"), 1)).unwrap();
        assert!(matches!(poller.fetch_snapshot().await, Err(FetchError::Timeout)));
    }

    #[tokio::test]
    async fn test_spawned_poller_feeds_queue() {
        let t0 = epoch_ms(1_709_294_400);
        let upstream = FakeUpstream::start(vec![(
            "/motoristas",
            Reply::Json(serde_json::Value::Array(vec![
                PingPayload::new(7, -23.55, -46.63, t0).snapshot_record("Ana", "Campinas"),
            ])),
        )])
        .await
        .unwrap();

        let (tx, mut rx) = mpsc::channel(4);
        let events = EventBus::default();
        let health = HealthTracker::new();
        let cancel = CancellationToken::new();
        let poller = SnapshotPoller::new(&conf(upstream.url("/motoristas"), 5)).unwrap();
        let handle = poller.spawn(tx, events, health.clone(), cancel.clone());

        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match first {
            IngestEvent::Snapshot(records) => assert_eq!(records.len(), 1),
            other => panic!("unexpected event {other:?}"),
        }

        cancel.cancel();
        handle.await.unwrap();
        assert!(upstream.hits().iter().all(|h| h.starts_with("/motoristas")));
    }
}
