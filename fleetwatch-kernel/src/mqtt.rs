use crate::config::MqttConf;
use crate::engine::IngestEvent;
use crate::health::HealthTracker;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{self, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Payload MQTT → record JSON objet ; le reste est ignoré
pub fn decode_push(payload: &[u8]) -> Option<Value> {
    match serde_json::from_slice::<Value>(payload) {
        Ok(v @ Value::Object(_)) => Some(v),
        Ok(_) | Err(_) => None,
    }
}

/// Producteur push : chaque message du topic devient un `IngestEvent::Push`
pub fn spawn_mqtt_listener(
    cfg: MqttConf,
    tx: mpsc::Sender<IngestEvent>,
    health: HealthTracker,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    task::spawn(async move {
        let mut opts = MqttOptions::new(&cfg.client_id, &cfg.host, cfg.port);
        opts.set_keep_alive(Duration::from_secs(cfg.keep_alive_secs.max(5)));
        let (client, mut eventloop) = AsyncClient::new(opts, 10);
        health.mark_mqtt_connecting();
        info!(host = %cfg.host, port = cfg.port, topic = %cfg.topic, "[mqtt] listener started");

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = eventloop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    health.mark_mqtt_connected();
                    // session propre : on se réabonne à chaque connexion
                    if let Err(e) = client.subscribe(&cfg.topic, QoS::AtLeastOnce).await {
                        warn!(error = ?e, "[mqtt] subscribe failed");
                    }
                }
                Ok(Event::Incoming(Incoming::Publish(p))) if p.topic == cfg.topic => {
                    match decode_push(&p.payload) {
                        Some(record) => {
                            if tx.send(IngestEvent::Push(record)).await.is_err() {
                                break;
                            }
                        }
                        None => debug!(bytes = p.payload.len(), "[mqtt] invalid push payload dropped"),
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = ?e, "[mqtt] connection error");
                    health.increment_reconnects();
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_secs(2)) => {}
                    }
                }
            }
        }

        let _ = client.disconnect().await;
        info!("[mqtt] listener stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetwatch_devkit::payloads::PingPayload;

    #[test]
    fn test_decode_push() {
        let message = PingPayload::new(7, -23.55, -46.63, 1_709_294_400_000)
            .with_speed(12.5)
            .push_message();
        let bytes = serde_json::to_vec(&message).unwrap();
        assert_eq!(decode_push(&bytes), Some(message));

        assert_eq!(decode_push(b"not json"), None);
        assert_eq!(decode_push(b"[1,2]"), None);
        assert_eq!(decode_push(b"42"), None);
    }
}
