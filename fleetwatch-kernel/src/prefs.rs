/**
 * PREFERENCES - Stockage clé/valeur injectable des préférences consommateur
 *
 * RÔLE :
 * Le flag `active` d'une entité appartient au consommateur (dashboard), pas au
 * moteur. Le moteur le lit via ce trait, injecté à la construction : aucun
 * accès à un état global ambiant.
 *
 * FONCTIONNEMENT :
 * - PreferenceStore = get/set sur des valeurs JSON
 * - MemoryPrefs = implémentation volatile (tests, mode sans disque)
 * - JsonFilePrefs = cache mémoire + fichier JSON réécrit à chaque set
 */

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum PrefsError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Contrat get/set commun à tous les backends de préférences
pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;

    fn set(&self, key: &str, value: Value) -> Result<(), PrefsError>;
}

pub fn active_key(entity_id: &str) -> String {
    format!("active:{entity_id}")
}

/// Flag `active` d'une entité ; vrai tant que le consommateur ne l'a pas désactivée
pub fn is_active(prefs: &dyn PreferenceStore, entity_id: &str) -> bool {
    prefs
        .get(&active_key(entity_id))
        .and_then(|v| v.as_bool())
        .unwrap_or(true)
}

pub fn set_active(prefs: &dyn PreferenceStore, entity_id: &str, active: bool) -> Result<(), PrefsError> {
    prefs.set(&active_key(entity_id), Value::Bool(active))
}

#[derive(Debug, Default)]
pub struct MemoryPrefs {
    values: Mutex<HashMap<String, Value>>,
}

impl MemoryPrefs {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPrefs {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<(), PrefsError> {
        self.values.lock().insert(key.to_string(), value);
        Ok(())
    }
}

pub struct JsonFilePrefs {
    /// Chemin du fichier de stockage JSON
    storage_path: PathBuf,
    /// Cache en mémoire
    cache: Mutex<HashMap<String, Value>>,
}

impl JsonFilePrefs {
    pub fn new<P: Into<PathBuf>>(storage_path: P) -> Result<Self, PrefsError> {
        let prefs = Self {
            storage_path: storage_path.into(),
            cache: Mutex::new(HashMap::new()),
        };
        prefs.load_from_disk()?;
        info!(path = ?prefs.storage_path, "[prefs] store initialized");
        Ok(prefs)
    }

    fn load_from_disk(&self) -> Result<(), PrefsError> {
        if !self.storage_path.exists() {
            if let Some(parent) = self.storage_path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            fs::write(&self.storage_path, "{}")?;
        }

        let content = fs::read_to_string(&self.storage_path)?;
        let values: HashMap<String, Value> = if content.trim().is_empty() {
            HashMap::new()
        } else {
            serde_json::from_str(&content)?
        };
        *self.cache.lock() = values;
        Ok(())
    }

    fn save_to_disk(&self, values: &HashMap<String, Value>) -> Result<(), PrefsError> {
        let json = serde_json::to_string_pretty(values)?;
        fs::write(&self.storage_path, json)?;
        Ok(())
    }
}

impl PreferenceStore for JsonFilePrefs {
    fn get(&self, key: &str) -> Option<Value> {
        self.cache.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<(), PrefsError> {
        let mut cache = self.cache.lock();
        cache.insert(key.to_string(), value);
        self.save_to_disk(&cache)
    }
}
