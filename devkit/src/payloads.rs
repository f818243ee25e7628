/*!
Builders de payloads pour tests du kernel

Produit les trois dialectes rencontrés en amont pour un même ping:
- push MQTT (camelCase, timestamp epoch ms)
- snapshot pt-BR (MAJUSCULES, décimales à virgule, DATAHORA texte)
- historique (lat/lng, timestamp RFC3339)
*/

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value};

/// Secondes unix → millisecondes unix
pub fn epoch_ms(unix_secs: i64) -> i64 {
    unix_secs * 1000
}

#[derive(Debug, Clone)]
pub struct PingPayload {
    entity_id: i64,
    lat: f64,
    lon: f64,
    timestamp_ms: i64,
    speed: Option<f64>,
    battery: Option<f64>,
    ping_id: Option<String>,
}

impl PingPayload {
    pub fn new(entity_id: i64, lat: f64, lon: f64, timestamp_ms: i64) -> Self {
        Self {
            entity_id,
            lat,
            lon,
            timestamp_ms,
            speed: None,
            battery: None,
            ping_id: None,
        }
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = Some(speed);
        self
    }

    pub fn with_battery(mut self, battery: f64) -> Self {
        self.battery = Some(battery);
        self
    }

    pub fn with_ping_id<S: Into<String>>(mut self, ping_id: S) -> Self {
        self.ping_id = Some(ping_id.into());
        self
    }

    fn datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.timestamp_ms).unwrap_or_default()
    }

    /// Message du canal push
    pub fn push_message(&self) -> Value {
        let mut msg = Map::new();
        msg.insert("entityId".into(), json!(self.entity_id));
        msg.insert("lat".into(), json!(self.lat));
        msg.insert("lon".into(), json!(self.lon));
        msg.insert("timestamp".into(), json!(self.timestamp_ms));
        if let Some(speed) = self.speed {
            msg.insert("speed".into(), json!(speed));
        }
        if let Some(battery) = self.battery {
            msg.insert("battery".into(), json!(battery));
        }
        if let Some(ping_id) = &self.ping_id {
            msg.insert("pingId".into(), json!(ping_id));
        }
        Value::Object(msg)
    }

    /// Ligne de snapshot telle que l'API de polling la renvoie
    pub fn snapshot_record(&self, name: &str, unit: &str) -> Value {
        json!({
            "motoristaId": self.entity_id,
            "NOME": name,
            "UNIDADE": unit,
            "LATITUDE": self.lat.to_string().replace('.', ","),
            "LONGITUDE": self.lon.to_string().replace('.', ","),
            "DATAHORA": self.datetime().format("%Y-%m-%d %H:%M:%S").to_string(),
        })
    }

    /// Point de l'API historique
    pub fn history_record(&self) -> Value {
        json!({
            "lat": self.lat,
            "lng": self.lon,
            "timestamp": self.datetime().to_rfc3339_opts(SecondsFormat::Millis, true),
        })
    }
}

/// Enveloppe `{"data": [...]}`
pub fn wrap_data(records: Vec<Value>) -> Value {
    json!({ "data": records })
}

/// Enveloppe `{"result": [...]}`
pub fn wrap_result(records: Vec<Value>) -> Value {
    json!({ "result": records })
}
