use crate::risk::RiskPolicy;
use crate::route::DEFAULT_JUMP_THRESHOLD_DEG;
use crate::store::DEFAULT_HISTORY_BOUND;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct FleetConfig {
    /// Source push ; absente = pas de listener MQTT
    pub mqtt: Option<MqttConf>,
    /// Source snapshot ; absente = pas de polling
    pub snapshot: Option<SnapshotConf>,
    pub routes: RoutesConf,
    pub engine: EngineConf,
    pub risk: RiskPolicy,
    pub http: HttpConf,
    pub prefs: PrefsConf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    pub topic: String,
    pub client_id: String,
    pub keep_alive_secs: u64,
}

impl Default for MqttConf {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            topic: "fleet/pings@v1".into(),
            client_id: "fleetwatch-kernel".into(),
            keep_alive_secs: 15,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SnapshotConf {
    pub url: String,
    pub interval_secs: u64,
    pub timeout_secs: u64,
}

impl Default for SnapshotConf {
    fn default() -> Self {
        Self {
            url: String::new(),
            interval_secs: 30,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RoutesConf {
    /// ex: "https://api.example/historico/{entity_id}" ; absent = trajet depuis l'historique local
    pub url_template: Option<String>,
    pub timeout_secs: u64,
    pub jump_threshold_deg: f64,
}

impl Default for RoutesConf {
    fn default() -> Self {
        Self {
            url_template: None,
            timeout_secs: 10,
            jump_threshold_deg: DEFAULT_JUMP_THRESHOLD_DEG,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct EngineConf {
    pub history_bound: usize,
    pub offline_after_ms: i64,
    pub tick_secs: u64,
    pub queue_capacity: usize,
    pub event_capacity: usize,
}

impl Default for EngineConf {
    fn default() -> Self {
        Self {
            history_bound: DEFAULT_HISTORY_BOUND,
            offline_after_ms: 120_000,
            tick_secs: 30,
            queue_capacity: 1024,
            event_capacity: 256,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConf {
    pub bind: String,
}

impl Default for HttpConf {
    fn default() -> Self {
        Self { bind: "0.0.0.0:8080".into() }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct PrefsConf {
    /// Fichier JSON des préférences ; absent = stockage mémoire
    pub path: Option<String>,
}

impl Default for PrefsConf {
    fn default() -> Self {
        Self {
            path: Some("./data/prefs.json".into()),
        }
    }
}

impl FleetConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.history_bound == 0 {
            return Err(ConfigError::Invalid("engine.history_bound must be >= 1".into()));
        }
        if self.engine.offline_after_ms < 0 {
            return Err(ConfigError::Invalid("engine.offline_after_ms must be >= 0".into()));
        }
        if self.engine.tick_secs == 0 {
            return Err(ConfigError::Invalid("engine.tick_secs must be >= 1".into()));
        }
        if let Some(snapshot) = &self.snapshot {
            if snapshot.url.trim().is_empty() {
                return Err(ConfigError::Invalid("snapshot.url is empty".into()));
            }
            if snapshot.interval_secs == 0 {
                return Err(ConfigError::Invalid("snapshot.interval_secs must be >= 1".into()));
            }
        }
        if !(self.risk.radius_m > 0.0) {
            return Err(ConfigError::Invalid("risk.radius_m must be > 0".into()));
        }
        Ok(())
    }
}

pub fn parse_config(txt: &str) -> Result<FleetConfig, ConfigError> {
    if txt.trim().is_empty() {
        return Ok(FleetConfig::default());
    }
    let cfg: FleetConfig = serde_yaml::from_str(txt)?;
    cfg.validate()?;
    Ok(cfg)
}

pub async fn load_config() -> FleetConfig {
    let path = std::env::var("FLEETWATCH_CONFIG").unwrap_or_else(|_| "fleetwatch.yaml".into());
    if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        parse_config(&txt).unwrap_or_else(|e| {
            warn!(path = %path, error = %e, "[config] invalid config, using defaults");
            FleetConfig::default()
        })
    } else {
        warn!(path = %path, "[config] no config file, using defaults");
        FleetConfig::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = parse_config("").unwrap();
        assert_eq!(cfg.engine.history_bound, 50);
        assert_eq!(cfg.engine.offline_after_ms, 120_000);
        assert_eq!(cfg.risk.radius_m, 30.0);
        assert!(cfg.mqtt.is_none());
        assert!(cfg.snapshot.is_none());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let cfg = parse_config(
            r#"
snapshot:
  url: "http://upstream/motoristas"
mqtt:
  host: broker
engine:
  history_bound: 20
risk:
  red_after_minutes: 20
"#,
        )
        .unwrap();
        let snapshot = cfg.snapshot.unwrap();
        assert_eq!(snapshot.interval_secs, 30);
        assert_eq!(snapshot.timeout_secs, 10);
        let mqtt = cfg.mqtt.unwrap();
        assert_eq!(mqtt.host, "broker");
        assert_eq!(mqtt.port, 1883);
        assert_eq!(mqtt.topic, "fleet/pings@v1");
        assert_eq!(cfg.engine.history_bound, 20);
        assert_eq!(cfg.risk.red_after_minutes, 20);
        assert_eq!(cfg.risk.amber_after_minutes, 10);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            parse_config("engine:\n  history_bound: 0\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            parse_config("snapshot:\n  url: \"\"\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(parse_config("engine: [1, 2"), Err(ConfigError::Yaml(_))));
    }
}
