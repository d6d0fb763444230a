use crate::alerts::AlertLog;
use crate::events::HealthSummary;
use crate::rooms::RoomBroadcaster;
use crate::store::{DeviceRegistry, OccupancyStore};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Process-level health served on `GET /system/health`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub memory_usage_mb: f32,
    pub mqtt_status: String,
    pub mqtt_reconnects: u32,
    pub buses_tracked: usize,
    pub cameras_tracked: usize,
    pub active_alerts: usize,
    pub connections: usize,
    pub last_sweep: Option<HealthSummary>,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    mqtt_reconnects: Arc<AtomicU32>,
    mqtt_status: Arc<Mutex<String>>,
    last_sweep: Arc<Mutex<Option<HealthSummary>>>,
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
            last_sweep: Arc::new(Mutex::new(None)),
        }
    }

    pub fn mark_mqtt_connecting(&self) {
        *self.mqtt_status.lock() = "connecting".to_string();
    }

    pub fn mark_mqtt_connected(&self) {
        *self.mqtt_status.lock() = "connected".to_string();
    }

    pub fn mark_mqtt_disconnected(&self) {
        *self.mqtt_status.lock() = "disconnected".to_string();
    }

    pub fn increment_reconnects(&self) {
        self.mqtt_reconnects.fetch_add(1, Ordering::Relaxed);
        *self.mqtt_status.lock() = "reconnecting".to_string();
    }

    pub fn mqtt_status(&self) -> String {
        self.mqtt_status.lock().clone()
    }

    pub fn record_sweep(&self, summary: &HealthSummary) {
        *self.last_sweep.lock() = Some(summary.clone());
    }

    pub fn last_sweep(&self) -> Option<HealthSummary> {
        self.last_sweep.lock().clone()
    }

    pub async fn get_health(
        &self,
        store: &OccupancyStore,
        devices: &DeviceRegistry,
        alerts: &AlertLog,
        rooms: &RoomBroadcaster,
    ) -> KernelHealth {
        KernelHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            memory_usage_mb: get_memory_usage_mb(),
            mqtt_status: self.mqtt_status(),
            mqtt_reconnects: self.mqtt_reconnects.load(Ordering::Relaxed),
            buses_tracked: store.len(),
            cameras_tracked: devices.len(),
            active_alerts: alerts.active_count().await,
            connections: rooms.connection_count(),
            last_sweep: self.last_sweep(),
        }
    }
}

fn get_memory_usage_mb() -> f32 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            let rss_kb = status
                .lines()
                .find(|l| l.starts_with("VmRSS:"))
                .and_then(|l| l.split_whitespace().nth(1))
                .and_then(|kb| kb.parse::<u64>().ok());
            if let Some(kb) = rss_kb {
                return kb as f32 / 1024.0;
            }
        }
    }
    0.0
}
