use crate::engine::SharedEngine;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;

#[derive(Debug, Serialize, Deserialize)]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub entities_tracked: u32,
    pub memory_usage_mb: f32,
    pub mqtt_status: String,
    pub mqtt_reconnects: u32,
    pub last_snapshot: Option<SnapshotStatus>,
}

/// Résultat du dernier cycle de polling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotStatus {
    pub ok: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
    pub records: usize,
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    mqtt_reconnects: Arc<AtomicU32>,
    mqtt_status: Arc<Mutex<String>>,
    last_snapshot: Arc<Mutex<Option<SnapshotStatus>>>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            mqtt_reconnects: Arc::new(AtomicU32::new(0)),
            mqtt_status: Arc::new(Mutex::new("disabled".to_string())),
            last_snapshot: Arc::new(Mutex::new(None)),
        }
    }

    pub fn mark_mqtt_connecting(&self) {
        *self.mqtt_status.lock() = "connecting".to_string();
    }

    pub fn mark_mqtt_connected(&self) {
        *self.mqtt_status.lock() = "connected".to_string();
    }

    pub fn increment_reconnects(&self) {
        self.mqtt_reconnects.fetch_add(1, Ordering::Relaxed);
        *self.mqtt_status.lock() = "reconnecting".to_string();
    }

    pub fn mark_snapshot_ok(&self, records: usize) {
        *self.last_snapshot.lock() = Some(SnapshotStatus {
            ok: true,
            at: OffsetDateTime::now_utc(),
            records,
            error: None,
        });
    }

    pub fn mark_snapshot_failed(&self, error: String) {
        *self.last_snapshot.lock() = Some(SnapshotStatus {
            ok: false,
            at: OffsetDateTime::now_utc(),
            records: 0,
            error: Some(error),
        });
    }

    pub fn get_health(&self, engine: &SharedEngine) -> KernelHealth {
        KernelHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            entities_tracked: engine.lock().entity_count() as u32,
            memory_usage_mb: get_memory_usage_mb(),
            mqtt_status: self.mqtt_status.lock().clone(),
            mqtt_reconnects: self.mqtt_reconnects.load(Ordering::Relaxed),
            last_snapshot: self.last_snapshot.lock().clone(),
        }
    }
}

fn get_memory_usage_mb() -> f32 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            let rss_kb = status
                .lines()
                .find(|line| line.starts_with("VmRSS:"))
                .and_then(|line| line.split_whitespace().nth(1))
                .and_then(|kb| kb.parse::<u64>().ok());
            if let Some(kb) = rss_kb {
                return kb as f32 / 1024.0;
            }
        }
    }

    0.0
}
